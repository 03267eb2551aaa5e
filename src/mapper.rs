//! Random-access byte provider over the archive's backing source.
//!
//! A [`Mapper`] turns `[offset, offset+len)` into a byte vector. It is the
//! only component in the crate that touches the outside world; every other
//! layer works purely on bytes it has already been handed. [`Source`] is the
//! small configuration enum a caller picks a backend from, mirroring the
//! `{PATH, FD, MEMORY, URL}` distinction.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use tracing::trace;

use crate::error::SquashfsError;

/// Default width of the mapper's internal cache chunk, in bytes.
pub const CHUNK_SIZE: u64 = 128 * 1024;

/// Default number of chunks kept resident in the cache.
const CACHE_CAPACITY: usize = 64;

/// Provides read-only, random access to the archive's bytes.
///
/// Implementations must be safe to call from multiple readers
/// concurrently (the archive façade only ever takes `&self`).
pub trait Mapper: Send + Sync {
    /// Total size of the backing source, in bytes.
    fn len(&self) -> u64;

    /// Read exactly `buf.len()` bytes starting at `offset`.
    ///
    /// Fails with [`SquashfsError::MapFailed`] if the requested range
    /// straddles the end of the source.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), SquashfsError>;

    /// Convenience: read `len` bytes starting at `offset` into a fresh `Vec`.
    fn map(&self, offset: u64, len: u64) -> Result<Vec<u8>, SquashfsError> {
        let mut buf = vec![0u8; len as usize];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }
}

/// A file, read through ordinary seek+read calls (no OS-level mmap — the
/// crate's only dependency on the host is `std::fs`/`std::io`, matching how
/// this decoder's upstream lineage treats its own `BufReadSeek` sources).
pub struct FileMapper {
    file: Mutex<File>,
    size: u64,
    offset: u64,
}

impl FileMapper {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SquashfsError> {
        Self::open_with_offset(path, 0)
    }

    pub fn open_with_offset(path: impl AsRef<Path>, offset: u64) -> Result<Self, SquashfsError> {
        let file = File::open(path)?;
        let size = file.metadata()?.len().saturating_sub(offset);
        Ok(Self { file: Mutex::new(file), size, offset })
    }

    pub fn from_file(file: File, offset: u64) -> Result<Self, SquashfsError> {
        let size = file.metadata()?.len().saturating_sub(offset);
        Ok(Self { file: Mutex::new(file), size, offset })
    }
}

impl Mapper for FileMapper {
    fn len(&self) -> u64 {
        self.size
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), SquashfsError> {
        let end = offset.checked_add(buf.len() as u64).ok_or(SquashfsError::IntegerOverflow)?;
        if end > self.size {
            return Err(SquashfsError::MapFailed { offset, len: buf.len() as u64 });
        }
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(self.offset + offset))?;
        file.read_exact(buf)?;
        Ok(())
    }
}

/// An in-memory archive, e.g. one already loaded by the caller or produced
/// by an HTTP range-request prefetch external to this crate.
pub struct MemoryMapper {
    bytes: Vec<u8>,
}

impl MemoryMapper {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl Mapper for MemoryMapper {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), SquashfsError> {
        let start = usize::try_from(offset).map_err(|_| SquashfsError::IntegerOverflow)?;
        let end = start.checked_add(buf.len()).ok_or(SquashfsError::IntegerOverflow)?;
        let slice = self
            .bytes
            .get(start..end)
            .ok_or(SquashfsError::MapFailed { offset, len: buf.len() as u64 })?;
        buf.copy_from_slice(slice);
        Ok(())
    }
}

/// Configuration for selecting a [`Mapper`] backend.
///
/// Mirrors the `{PATH, FD, MEMORY, URL}` source-type enumeration: a caller
/// picks one and the façade constructs the matching mapper.
pub enum Source {
    Path(std::path::PathBuf),
    Fd(File),
    Memory(Vec<u8>),
    /// Accepted for API completeness; constructing a mapper from it fails
    /// with [`SquashfsError::UnsupportedSource`]. Fetching archive bytes over
    /// the network is an external-collaborator concern (see crate docs); a
    /// downstream adapter can implement [`Mapper`] directly against an HTTP
    /// range-request client and bypass `Source` entirely.
    Url(String),
}

impl Source {
    pub fn into_mapper(self) -> Result<Box<dyn Mapper>, SquashfsError> {
        self.into_mapper_with_offset(0)
    }

    /// Like [`Self::into_mapper`], but the archive is assumed to start
    /// `offset` bytes into the backing source (an image appended after a
    /// bootloader or other header, for instance).
    ///
    /// Disk-backed sources (`Path`, `Fd`) come back wrapped in a
    /// [`CachedMapper`], so the archive façade gets the bounded block cache
    /// described in the mapper's contract without every caller having to
    /// remember to opt in. `Memory` is already fully resident, so wrapping it
    /// would only add bookkeeping for no benefit.
    pub fn into_mapper_with_offset(self, offset: u64) -> Result<Box<dyn Mapper>, SquashfsError> {
        match self {
            Source::Path(path) => {
                Ok(Box::new(CachedMapper::new(Box::new(FileMapper::open_with_offset(path, offset)?))))
            }
            Source::Fd(file) => Ok(Box::new(CachedMapper::new(Box::new(FileMapper::from_file(file, offset)?)))),
            Source::Memory(bytes) => {
                let start = usize::try_from(offset).map_err(|_| SquashfsError::IntegerOverflow)?;
                if start > bytes.len() {
                    return Err(SquashfsError::MapFailed { offset, len: 0 });
                }
                Ok(Box::new(MemoryMapper::new(bytes[start..].to_vec())))
            }
            Source::Url(_) => Err(SquashfsError::UnsupportedSource("url")),
        }
    }
}

/// Wraps any [`Mapper`] with a [`BlockCache`] in front of it, so repeated
/// reads of the same region (the id table's first few records, a directory
/// walked twice) skip re-decompressing or re-reading from disk.
pub struct CachedMapper {
    inner: Box<dyn Mapper>,
    cache: BlockCache,
}

impl CachedMapper {
    pub fn new(inner: Box<dyn Mapper>) -> Self {
        Self { inner, cache: BlockCache::new() }
    }
}

impl Mapper for CachedMapper {
    fn len(&self) -> u64 {
        self.inner.len()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), SquashfsError> {
        let bytes = self.cache.read(self.inner.as_ref(), offset, buf.len() as u64)?;
        buf.copy_from_slice(&bytes);
        Ok(())
    }
}

/// Bounded LRU cache of raw byte chunks, keyed by chunk-aligned offset.
///
/// The cache is the only piece of shared mutable state in the crate; the
/// mutex is held only around hashmap mutation and is released before any
/// further I/O, as a long-running mapper read never happens while the lock
/// is held.
pub struct BlockCache {
    chunk_size: u64,
    inner: Mutex<LruState>,
}

struct LruState {
    map: HashMap<u64, Vec<u8>>,
    order: Vec<u64>,
    capacity: usize,
}

impl BlockCache {
    pub fn new() -> Self {
        Self::with_chunk_size(CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: u64) -> Self {
        Self {
            chunk_size,
            inner: Mutex::new(LruState {
                map: HashMap::new(),
                order: Vec::new(),
                capacity: CACHE_CAPACITY,
            }),
        }
    }

    /// Read `[offset, offset+len)` through the cache, fetching whole chunks
    /// from `mapper` on a miss.
    pub fn read(&self, mapper: &dyn Mapper, offset: u64, len: u64) -> Result<Vec<u8>, SquashfsError> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(len as usize);
        let mut pos = offset;
        let end = offset.checked_add(len).ok_or(SquashfsError::IntegerOverflow)?;
        while pos < end {
            let chunk_start = (pos / self.chunk_size) * self.chunk_size;
            let chunk = self.chunk(mapper, chunk_start)?;
            let within = (pos - chunk_start) as usize;
            let take = ((end - pos).min(chunk.len() as u64 - within as u64)) as usize;
            out.extend_from_slice(&chunk[within..within + take]);
            pos += take as u64;
        }
        Ok(out)
    }

    fn chunk(&self, mapper: &dyn Mapper, chunk_start: u64) -> Result<Vec<u8>, SquashfsError> {
        {
            let state = self.inner.lock().unwrap();
            if let Some(chunk) = state.map.get(&chunk_start) {
                return Ok(chunk.clone());
            }
        }
        let chunk_len = self.chunk_size.min(mapper.len().saturating_sub(chunk_start));
        let bytes = mapper.map(chunk_start, chunk_len)?;
        trace!("caching chunk at {chunk_start:#x}, {chunk_len} bytes");
        let mut state = self.inner.lock().unwrap();
        if !state.map.contains_key(&chunk_start) {
            if state.order.len() >= state.capacity {
                if let Some(oldest) = state.order.first().copied() {
                    state.order.remove(0);
                    state.map.remove(&oldest);
                }
            }
            state.order.push(chunk_start);
            state.map.insert(chunk_start, bytes.clone());
        }
        Ok(bytes)
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward-advancing helper over a mapper.
///
/// `advance(skip, size)` yields the next `size` bytes after skipping `skip`.
/// A cursor built without an upper limit (`limit: None`) permits reading
/// past where the caller originally expected the data to end, which the
/// metablock stream relies on when a table's declared size undershoots its
/// actual contents.
pub struct Cursor<'m> {
    mapper: &'m dyn Mapper,
    pos: u64,
    limit: Option<u64>,
}

impl<'m> Cursor<'m> {
    pub fn new(mapper: &'m dyn Mapper, start: u64) -> Self {
        Self { mapper, pos: start, limit: None }
    }

    pub fn with_limit(mapper: &'m dyn Mapper, start: u64, limit: u64) -> Self {
        Self { mapper, pos: start, limit: Some(limit) }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn advance(&mut self, skip: u64, size: u64) -> Result<Vec<u8>, SquashfsError> {
        let start = self.pos.checked_add(skip).ok_or(SquashfsError::IntegerOverflow)?;
        let end = start.checked_add(size).ok_or(SquashfsError::IntegerOverflow)?;
        if let Some(limit) = self.limit {
            if end > limit {
                return Err(SquashfsError::MapFailed { offset: start, len: size });
            }
        }
        let bytes = self.mapper.map(start, size)?;
        self.pos = end;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_mapper_round_trip() {
        let mapper = MemoryMapper::new((0..=255u8).collect());
        let got = mapper.map(10, 5).unwrap();
        assert_eq!(got, vec![10, 11, 12, 13, 14]);
    }

    #[test]
    fn memory_mapper_out_of_range_fails() {
        let mapper = MemoryMapper::new(vec![0; 10]);
        assert!(mapper.map(8, 5).is_err());
    }

    #[test]
    fn block_cache_serves_repeated_reads() {
        let mapper = MemoryMapper::new((0..=255u8).collect());
        let cache = BlockCache::with_chunk_size(16);
        let a = cache.read(&mapper, 3, 10).unwrap();
        let b = cache.read(&mapper, 3, 10).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, (3..13).collect::<Vec<u8>>());
    }

    #[test]
    fn cached_mapper_serves_same_bytes_as_inner() {
        let mapper = CachedMapper::new(Box::new(MemoryMapper::new((0..=255u8).collect())));
        let a = mapper.map(100, 20).unwrap();
        let b = mapper.map(100, 20).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, (100..120).collect::<Vec<u8>>());
    }

    #[test]
    fn source_with_offset_skips_leading_bytes() {
        let source = Source::Memory((0..=255u8).collect());
        let mapper = source.into_mapper_with_offset(10).unwrap();
        assert_eq!(mapper.len(), 246);
        assert_eq!(mapper.map(0, 3).unwrap(), vec![10, 11, 12]);
    }

    #[test]
    fn cursor_advances_and_respects_limit() {
        let mapper = MemoryMapper::new((0..=255u8).collect());
        let mut cursor = Cursor::with_limit(&mapper, 0, 20);
        let first = cursor.advance(0, 10).unwrap();
        assert_eq!(first, (0..10).collect::<Vec<u8>>());
        let second = cursor.advance(0, 10).unwrap();
        assert_eq!(second, (10..20).collect::<Vec<u8>>());
        assert!(cursor.advance(0, 1).is_err());
    }
}

//! File content reader: reconstructs a file inode's bytes from its
//! datablock list plus an optional shared fragment tail.
//!
//! The internal buffer always holds exactly one block-size-aligned chunk at
//! a time — [`FileReader::data`] points at `buffer[seek_pos % block_size]`.
//! Seeking past the buffered chunk evicts it; the next read reloads
//! whichever chunk (a full datablock, or the fragment tail once the
//! datablock list is exhausted) the new position falls in.

use crate::compressor::{CompressionAction, Compressor};
use crate::error::SquashfsError;
use crate::fragment::FragmentTable;
use crate::inode::Inode;
use crate::mapper::Mapper;

pub struct FileReader<'a> {
    mapper: &'a dyn Mapper,
    compression: &'a dyn CompressionAction,
    compressor: Compressor,
    block_size: u32,
    blocks_start: u64,
    block_count: usize,
    block_sizes: Vec<(u32, bool)>,
    fragment_block_index: u32,
    fragment_block_offset: u32,
    fragment_table: Option<&'a FragmentTable>,
    size: u64,
    seek_pos: u64,
    /// Index of the chunk currently in `buf`: `0..block_count` for a
    /// datablock, `block_count` for the fragment tail. `None` until the
    /// first read.
    loaded_chunk: Option<usize>,
    buf: Vec<u8>,
}

impl<'a> FileReader<'a> {
    pub fn new(
        mapper: &'a dyn Mapper,
        compression: &'a dyn CompressionAction,
        compressor: Compressor,
        block_size: u32,
        fragment_table: Option<&'a FragmentTable>,
        inode: &Inode,
    ) -> Result<Self, SquashfsError> {
        if inode.inode_type() != crate::inode::InodeType::File {
            return Err(SquashfsError::NotAFile);
        }
        let block_count = inode.block_count();
        let block_sizes = (0..block_count)
            .map(|i| (inode.block_size(i), inode.block_is_compressed(i)))
            .collect();
        Ok(Self {
            mapper,
            compression,
            compressor,
            block_size,
            blocks_start: inode.blocks_start(),
            block_count,
            block_sizes,
            fragment_block_index: inode.fragment_block_index(),
            fragment_block_offset: inode.fragment_block_offset(),
            fragment_table,
            size: inode.file_size(),
            seek_pos: 0,
            loaded_chunk: None,
            buf: Vec::new(),
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn has_fragment(&self) -> bool {
        self.fragment_block_index != crate::inode::NO_FRAGMENT
    }

    /// Move the read position. Does not itself touch the mapper; the next
    /// [`Self::read`] loads whatever chunk the new position falls in.
    pub fn seek(&mut self, pos: u64) -> Result<(), SquashfsError> {
        if pos > self.size {
            return Err(SquashfsError::SeekOutOfRange { pos, size: self.size });
        }
        self.seek_pos = pos;
        Ok(())
    }

    /// Chunk index `seek_pos` currently falls in: a datablock index, or
    /// `block_count` for the fragment tail.
    fn chunk_for(&self, pos: u64) -> usize {
        (pos / self.block_size as u64) as usize
    }

    fn chunk_offset(&self, chunk: usize) -> u64 {
        chunk as u64 * self.block_size as u64
    }

    /// Decompressed length of `chunk`. Every datablock but the last is
    /// exactly `block_size`; the last datablock is also `block_size` when a
    /// fragment holds the file's tail, but otherwise shrinks to whatever's
    /// left of the file (`size` need not be a multiple of `block_size`). The
    /// fragment chunk (`chunk == block_count`) is always the remainder.
    fn chunk_len(&self, chunk: usize) -> u64 {
        if chunk < self.block_count {
            if chunk == self.block_count - 1 && !self.has_fragment() {
                self.size - self.chunk_offset(chunk)
            } else {
                self.block_size as u64
            }
        } else {
            self.size - self.chunk_offset(chunk)
        }
    }

    fn on_disk_offset(&self, block_index: usize) -> u64 {
        let mut offset = self.blocks_start;
        for size in self.block_sizes.iter().take(block_index) {
            offset += size.0 as u64;
        }
        offset
    }

    fn load_chunk(&mut self, chunk: usize) -> Result<(), SquashfsError> {
        if self.loaded_chunk == Some(chunk) {
            return Ok(());
        }
        self.buf = if chunk < self.block_count {
            let (size, compressed) = self.block_sizes[chunk];
            let offset = self.on_disk_offset(chunk);
            let raw = self.mapper.map(offset, size as u64)?;
            if compressed {
                let mut out = Vec::with_capacity(self.block_size as usize);
                self.compression.decompress(&raw, &mut out, self.compressor)?;
                out
            } else {
                raw
            }
        } else {
            if !self.has_fragment() {
                return Err(SquashfsError::NoFragment);
            }
            let table = self.fragment_table.ok_or(SquashfsError::NoFragmentTable)?;
            let fragment = table.get(self.mapper, self.compression, self.compressor, self.fragment_block_index)?;
            let tail_len = (self.size - self.chunk_offset(self.block_count)) as u32;
            let mut dst = Vec::new();
            fragment.append_to_buffer(
                self.mapper,
                self.compression,
                self.compressor,
                self.block_size,
                self.fragment_block_offset,
                tail_len,
                &mut dst,
            )?;
            dst
        };
        self.loaded_chunk = Some(chunk);
        Ok(())
    }

    /// The buffered chunk's bytes from the current seek position onward (up
    /// to the end of that chunk). Loads the owning chunk first if needed.
    pub fn data(&mut self) -> Result<&[u8], SquashfsError> {
        if self.seek_pos >= self.size {
            return Ok(&[]);
        }
        let chunk = self.chunk_for(self.seek_pos);
        self.load_chunk(chunk)?;
        let within = (self.seek_pos - self.chunk_offset(chunk)) as usize;
        Ok(&self.buf[within..])
    }

    /// Read up to `out.len()` bytes starting at the current seek position,
    /// advancing it by the number of bytes copied. Returns `0` at EOF.
    pub fn read(&mut self, out: &mut [u8]) -> Result<usize, SquashfsError> {
        let mut total = 0;
        while total < out.len() && self.seek_pos < self.size {
            let chunk = self.chunk_for(self.seek_pos);
            let chunk_len = self.chunk_len(chunk);
            self.load_chunk(chunk)?;
            let within = (self.seek_pos - self.chunk_offset(chunk)) as usize;
            let available = (chunk_len as usize).saturating_sub(within);
            let n = (out.len() - total).min(available);
            out[total..total + n].copy_from_slice(&self.buf[within..within + n]);
            total += n;
            self.seek_pos += n as u64;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compressor::DefaultCompressor;
    use crate::inode::{BasicFile, DataSize, InodeHeader, InodeId, InodeInner};
    use crate::mapper::MemoryMapper;

    fn file_inode(blocks_start: u32, block_sizes: Vec<u32>, frag_index: u32, file_size: u32) -> Inode {
        Inode {
            id: InodeId::BasicFile,
            header: InodeHeader::default(),
            inner: InodeInner::BasicFile(BasicFile {
                blocks_start,
                frag_index,
                block_offset: 0,
                file_size,
                block_sizes: block_sizes.into_iter().map(|s| DataSize::new(s | (1 << 24))).collect(),
            }),
        }
    }

    #[test]
    fn reads_whole_file_across_two_blocks() {
        let mut image = Vec::new();
        image.extend_from_slice(b"0123456789"); // block 0 (size 10, block_size 10)
        image.extend_from_slice(b"abcde"); // block 1 (size 5, final partial block)
        let mapper = MemoryMapper::new(image);

        let inode = file_inode(0, vec![10, 5], crate::inode::NO_FRAGMENT, 15);
        let mut reader = FileReader::new(&mapper, &DefaultCompressor, Compressor::None, 10, None, &inode).unwrap();

        let mut out = vec![0u8; 15];
        let n = reader.read(&mut out).unwrap();
        assert_eq!(n, 15);
        assert_eq!(&out, b"0123456789abcde");
        assert_eq!(reader.read(&mut [0u8; 1]).unwrap(), 0);
    }

    #[test]
    fn seek_into_second_block_reads_remainder() {
        let mut image = Vec::new();
        image.extend_from_slice(b"0123456789");
        image.extend_from_slice(b"abcde");
        let mapper = MemoryMapper::new(image);

        let inode = file_inode(0, vec![10, 5], crate::inode::NO_FRAGMENT, 15);
        let mut reader = FileReader::new(&mapper, &DefaultCompressor, Compressor::None, 10, None, &inode).unwrap();
        reader.seek(12).unwrap();
        let mut out = vec![0u8; 3];
        reader.read(&mut out).unwrap();
        assert_eq!(&out, b"cde");
    }

    #[test]
    fn reads_fragment_tail_via_fragment_table() {
        use crate::fragment::FragmentTable;

        let mut frag_image = Vec::new();
        frag_image.extend_from_slice(&16u64.to_le_bytes()); // first-level pointer -> record at 16
        let mut record = Vec::new();
        record.extend_from_slice(&1000u64.to_le_bytes()); // fragment.start (placeholder, fixed below)
        record.extend_from_slice(&(20u32 | (1 << 24)).to_le_bytes()); // size: 20 bytes, uncompressed
        record.extend_from_slice(&0u32.to_le_bytes()); // unused
        frag_image.extend(record);
        let frag_table_start = 0u64;
        let frag_block_start = frag_image.len() as u64;
        frag_image.extend_from_slice(b"xxxxxxxxxxhellotail!"); // 20 bytes, tail = "hellotail!" at offset 10
        // patch fragment.start to point at frag_block_start
        frag_image[16..24].copy_from_slice(&frag_block_start.to_le_bytes());

        let mapper = MemoryMapper::new(frag_image);
        let table = FragmentTable::read(&mapper, frag_table_start, 1).unwrap();

        let mut inode = file_inode(0, vec![], 0, 10);
        if let InodeInner::BasicFile(f) = &mut inode.inner {
            f.block_offset = 10;
        }
        let mut reader =
            FileReader::new(&mapper, &DefaultCompressor, Compressor::None, 0x10000, Some(&table), &inode).unwrap();
        let mut out = vec![0u8; 10];
        reader.read(&mut out).unwrap();
        assert_eq!(&out, b"hellotail!");
    }
}

//! Directory iterator: a forward-only, single-pass walk of a directory
//! inode's entries, with an index-accelerated `lookup` for extended
//! directories.
//!
//! A directory's contents decode directly off a [`MetablockStream`], one
//! [`FragmentHeader`] and its `DirEntry` records at a time, rather than
//! being collected up front — large directories (thousands of entries) cost
//! no more memory to walk than small ones.

use deku::prelude::*;

use crate::compressor::{CompressionAction, Compressor};
use crate::directory::{index_lookup, DirEntry, DirectoryIndex, FragmentHeader};
use crate::error::SquashfsError;
use crate::inode::{Inode, InodeId, InodeType};
use crate::mapper::Mapper;
use crate::metadata::MetablockStream;

/// One decoded directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: Vec<u8>,
    pub inode_type: InodeType,
    /// Inode reference suitable for [`crate::inode::Inode::read`] once
    /// seeked against the inode table's `MetablockStream`.
    pub inode_ref: u64,
    pub inode_number: u32,
}

/// Streaming iterator over one directory inode's entries.
pub struct DirReader<'a> {
    mapper: &'a dyn Mapper,
    compression: &'a dyn CompressionAction,
    compressor: Compressor,
    dir_table_start: u64,
    block_index: u32,
    block_offset: u16,
    /// Raw on-disk directory `file_size` (includes the format's "+3" header
    /// overhead quirk).
    size: usize,
    dir_index: Vec<DirectoryIndex>,
    stream: MetablockStream<'a>,
    consumed: usize,
    remaining_in_fragment: u32,
    fragment_start: u32,
    fragment_base_inode: u32,
}

impl<'a> DirReader<'a> {
    /// Construct a reader positioned at the start of `inode`'s directory
    /// contents. Fails with [`SquashfsError::NotADirectory`] if `inode`
    /// isn't a directory.
    pub fn new(
        mapper: &'a dyn Mapper,
        compression: &'a dyn CompressionAction,
        compressor: Compressor,
        dir_table_start: u64,
        inode: &Inode,
    ) -> Result<Self, SquashfsError> {
        let (block_index, block_offset) =
            inode.directory_location().ok_or(SquashfsError::NotADirectory)?;
        let mut reader = Self {
            mapper,
            compression,
            compressor,
            dir_table_start,
            block_index,
            block_offset,
            size: inode.file_size() as usize,
            dir_index: inode.directory_index().to_vec(),
            stream: MetablockStream::new(mapper, compression, compressor),
            consumed: 0,
            remaining_in_fragment: 0,
            fragment_start: 0,
            fragment_base_inode: 0,
        };
        reader.reset_to_start()?;
        Ok(reader)
    }

    fn reset_to_start(&mut self) -> Result<(), SquashfsError> {
        self.stream = MetablockStream::new(self.mapper, self.compression, self.compressor);
        self.stream.seek(self.dir_table_start, self.block_index as u64, self.block_offset)?;
        self.consumed = 0;
        self.remaining_in_fragment = 0;
        Ok(())
    }

    /// An empty directory's `file_size` still carries 3 bytes of header
    /// overhead even though it has zero fragments.
    fn at_end(&self) -> bool {
        self.remaining_in_fragment == 0 && self.consumed + 3 >= self.size
    }

    fn read_fragment_header(&mut self) -> Result<(), SquashfsError> {
        let bytes = self.stream.take(12)?;
        let mut reader = Reader::new(&mut bytes.as_slice());
        let header = FragmentHeader::from_reader_with_ctx(&mut reader, deku::ctx::Endian::Little)?;
        self.remaining_in_fragment = header.entry_count();
        self.fragment_start = header.start;
        self.fragment_base_inode = header.inode_num;
        self.consumed += 12;
        Ok(())
    }

    fn read_entry(&mut self) -> Result<DirEntryInfo, SquashfsError> {
        // The trailing `name` field's length isn't known until the fixed
        // 8-byte prefix (which carries `name_size`) has been read, so this
        // pulls the record in two pieces straight off the stream rather
        // than guessing a size up front.
        let fixed = self.stream.take(8)?;
        let name_size = u16::from_le_bytes([fixed[6], fixed[7]]) as usize + 1;
        let mut full = fixed;
        full.extend(self.stream.take(name_size)?);
        let mut reader = Reader::new(&mut full.as_slice());
        let entry = DirEntry::from_reader_with_ctx(&mut reader, deku::ctx::Endian::Little)?;
        self.consumed += entry.on_disk_size();

        Ok(DirEntryInfo {
            inode_type: InodeId::into_base_type(entry.t).into(),
            inode_ref: entry.inode_ref(self.fragment_start),
            inode_number: entry.inode_number(self.fragment_base_inode),
            name: entry.name,
        })
    }

    /// Advance to, and return, the next entry. Returns `None` once every
    /// fragment's entries have been visited.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Result<DirEntryInfo, SquashfsError>> {
        if self.at_end() {
            return None;
        }
        if self.remaining_in_fragment == 0 {
            if let Err(e) = self.read_fragment_header() {
                return Some(Err(e));
            }
        }
        let result = self.read_entry();
        self.remaining_in_fragment -= 1;
        Some(result)
    }

    /// Find the entry named `name`, resuming the scan from the
    /// extended-directory index's best jump point when one exists.
    ///
    /// An index entry only ever positions the scan — [`index_lookup`]'s
    /// prefix-guard comparison can return an entry whose name merely sorts
    /// at or before `name`, so the loop below always re-checks each visited
    /// entry's full name before reporting a match.
    pub fn lookup(&mut self, name: &[u8]) -> Result<Option<DirEntryInfo>, SquashfsError> {
        if let Some(index_entry) = index_lookup(&self.dir_index, name) {
            self.stream = MetablockStream::new(self.mapper, self.compression, self.compressor);
            self.stream.seek(self.dir_table_start, index_entry.start as u64, 0)?;
            self.consumed = index_entry.index as usize;
            self.remaining_in_fragment = 0;
        } else {
            self.reset_to_start()?;
        }
        while let Some(item) = self.next() {
            let item = item?;
            if item.name == name {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compressor::DefaultCompressor;
    use crate::inode::{BasicDirectory, InodeHeader, InodeInner};
    use crate::mapper::MemoryMapper;

    fn uncompressed_metablock(payload: &[u8]) -> Vec<u8> {
        let mut block = Vec::new();
        let len = (payload.len() as u16) | (1 << 15);
        block.extend_from_slice(&len.to_le_bytes());
        block.extend_from_slice(payload);
        block
    }

    fn entry_bytes(offset: u16, inode_offset: i16, t: u16, name: &[u8]) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&offset.to_le_bytes());
        b.extend_from_slice(&inode_offset.to_le_bytes());
        b.extend_from_slice(&t.to_le_bytes());
        b.extend_from_slice(&((name.len() - 1) as u16).to_le_bytes());
        b.extend_from_slice(name);
        b
    }

    /// A single-fragment directory containing `a` then `b`, rooted at
    /// `dir_table_start = 0` in a standalone memory image.
    fn two_entry_dir() -> (MemoryMapper, Inode, usize) {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1u32.to_le_bytes()); // count - 1 = 1 -> 2 entries
        payload.extend_from_slice(&0u32.to_le_bytes()); // start
        payload.extend_from_slice(&100u32.to_le_bytes()); // inode_num base
        payload.extend(entry_bytes(0, 0, 2, b"a"));
        payload.extend(entry_bytes(16, 1, 2, b"b"));
        let dir_size = payload.len();

        let image = uncompressed_metablock(&payload);
        let mapper = MemoryMapper::new(image);

        let inode = Inode {
            id: InodeId::BasicDirectory,
            header: InodeHeader::default(),
            inner: InodeInner::BasicDirectory(BasicDirectory {
                block_index: 0,
                link_count: 2,
                file_size: (dir_size + 3) as u16,
                block_offset: 0,
                parent_inode: 0,
            }),
        };
        (mapper, inode, dir_size)
    }

    #[test]
    fn walks_two_entries_in_order() {
        let (mapper, inode, _) = two_entry_dir();
        let mut dir =
            DirReader::new(&mapper, &DefaultCompressor, Compressor::None, 0, &inode).unwrap();
        let first = dir.next().unwrap().unwrap();
        assert_eq!(first.name, b"a");
        assert_eq!(first.inode_number, 100);
        assert_eq!(first.inode_type, InodeType::File);

        let second = dir.next().unwrap().unwrap();
        assert_eq!(second.name, b"b");
        assert_eq!(second.inode_number, 101);

        assert!(dir.next().is_none());
    }

    #[test]
    fn lookup_finds_entry_by_name() {
        let (mapper, inode, _) = two_entry_dir();
        let mut dir =
            DirReader::new(&mapper, &DefaultCompressor, Compressor::None, 0, &inode).unwrap();
        let found = dir.lookup(b"b").unwrap().unwrap();
        assert_eq!(found.inode_number, 101);
        assert!(dir.lookup(b"missing").unwrap().is_none());
    }

    #[test]
    fn non_directory_inode_is_rejected() {
        let mapper = MemoryMapper::new(vec![0u8; 16]);
        let inode = Inode {
            id: InodeId::BasicSymlink,
            header: InodeHeader::default(),
            inner: InodeInner::BasicSymlink(crate::inode::BasicSymlink {
                link_count: 1,
                target_size: 1,
                target_path: b"a".to_vec(),
            }),
        };
        let err = DirReader::new(&mapper, &DefaultCompressor, Compressor::None, 0, &inode)
            .unwrap_err();
        assert!(matches!(err, SquashfsError::NotADirectory));
    }
}

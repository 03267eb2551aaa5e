//! Fragment table: the shared tail-block pool small files' last datablock is
//! packed into.

use deku::prelude::*;

use crate::compressor::{CompressionAction, Compressor};
use crate::error::SquashfsError;
use crate::inode::DataSize;
use crate::mapper::Mapper;
use crate::table::LookupTable;

/// One entry of the fragment table: where a fragment block lives on disk,
/// and its (de)compressed size.
#[derive(Debug, Copy, Clone, PartialEq, Eq, DekuRead)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct Fragment {
    pub start: u64,
    pub size: DataSize,
    /// Reserved; always zero on disk.
    pub unused: u32,
}

/// Lazily-resolved view over the archive's fragment table.
pub struct FragmentTable {
    table: LookupTable,
}

impl FragmentTable {
    pub fn read(mapper: &dyn Mapper, frag_table: u64, frag_count: u32) -> Result<Self, SquashfsError> {
        const RECORD_SIZE: usize = 16;
        Ok(Self { table: LookupTable::read(mapper, frag_table, frag_count, RECORD_SIZE)? })
    }

    pub fn len(&self) -> u32 {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn get(
        &self,
        mapper: &dyn Mapper,
        compression: &dyn CompressionAction,
        compressor: Compressor,
        index: u32,
    ) -> Result<Fragment, SquashfsError> {
        self.table.get(mapper, compression, compressor, index)
    }
}

impl Fragment {
    /// Decompress this fragment block and append the `len` bytes starting at
    /// `offset` within it to `dst` — a file's fragment tail is always a
    /// sub-range of the shared block the fragment table entry describes.
    ///
    /// `block_size` is the archive's datablock size, the largest a
    /// decompressed fragment block can ever be; the output buffer is
    /// pre-sized to it up front the same way the datablock path does, since
    /// some codecs (lz4, lzo, zstd's buffer API) write into existing spare
    /// capacity rather than growing the `Vec` themselves.
    pub fn append_to_buffer(
        &self,
        mapper: &dyn Mapper,
        compression: &dyn CompressionAction,
        compressor: Compressor,
        block_size: u32,
        offset: u32,
        len: u32,
        dst: &mut Vec<u8>,
    ) -> Result<(), SquashfsError> {
        let raw = mapper.map(self.start, self.size.size() as u64)?;
        let block = if self.size.uncompressed() {
            raw
        } else {
            let mut out = Vec::with_capacity(block_size as usize);
            compression.decompress(&raw, &mut out, compressor)?;
            out
        };
        let start = offset as usize;
        let end = start.checked_add(len as usize).ok_or(SquashfsError::IntegerOverflow)?;
        let slice = block
            .get(start..end)
            .ok_or(SquashfsError::SizeMismatch("fragment tail exceeds decompressed block size"))?;
        dst.extend_from_slice(slice);
        Ok(())
    }
}

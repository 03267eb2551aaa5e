//! Generic two-level lookup table
//!
//! The id table, export table, and xattr id table are all the same shape: a
//! contiguous array of 64-bit metablock outer offsets (the first level),
//! each pointing at a run of metablocks holding `element_count * element_size`
//! packed fixed-size records (the second level). [`LookupTable`] reads the
//! first level once at construction and resolves individual records lazily.

use deku::prelude::*;

use crate::compressor::{CompressionAction, Compressor};
use crate::error::SquashfsError;
use crate::mapper::Mapper;
use crate::metadata::{MetablockStream, METADATA_MAXSIZE};

/// Sentinel used throughout the format for "this table is absent".
pub const NOT_SET: u64 = 0xffff_ffff_ffff_ffff;

/// A two-level table of fixed-size records, indexed by position.
pub struct LookupTable {
    /// First-level array: one metablock outer offset per 8192-byte run of
    /// records.
    block_offsets: Vec<u64>,
    element_count: u32,
    element_size: usize,
}

impl LookupTable {
    /// Read the first-level pointer array for a table whose records start at
    /// `table_start` and whose total record count is `element_count`.
    ///
    /// The first-level array itself is stored uncompressed, directly in the
    /// archive (not inside a metablock), immediately at `table_start`.
    pub fn read(
        mapper: &dyn Mapper,
        table_start: u64,
        element_count: u32,
        element_size: usize,
    ) -> Result<Self, SquashfsError> {
        let records_per_block = METADATA_MAXSIZE / element_size;
        let block_count = element_count as usize / records_per_block.max(1)
            + usize::from(element_count as usize % records_per_block.max(1) != 0);

        let mut block_offsets = Vec::with_capacity(block_count);
        for i in 0..block_count {
            let bytes = mapper.map(table_start + (i as u64 * 8), 8)?;
            let mut reader = Reader::new(&mut bytes.as_slice());
            let offset = u64::from_reader_with_ctx(&mut reader, deku::ctx::Endian::Little)?;
            block_offsets.push(offset);
        }

        Ok(Self { block_offsets, element_count, element_size })
    }

    pub fn len(&self) -> u32 {
        self.element_count
    }

    pub fn is_empty(&self) -> bool {
        self.element_count == 0
    }

    /// Fetch the raw bytes of record `index`.
    pub fn get_bytes(
        &self,
        mapper: &dyn Mapper,
        compression: &dyn CompressionAction,
        compressor: Compressor,
        index: u32,
    ) -> Result<Vec<u8>, SquashfsError> {
        if index >= self.element_count {
            return Err(SquashfsError::SizeMismatch("lookup table index out of range"));
        }
        let records_per_block = METADATA_MAXSIZE / self.element_size;
        let block_index = index as usize / records_per_block;
        let within_block = (index as usize % records_per_block) * self.element_size;

        let base = *self
            .block_offsets
            .get(block_index)
            .ok_or(SquashfsError::SizeMismatch("lookup table block index out of range"))?;

        let mut stream = MetablockStream::new(mapper, compression, compressor);
        stream.seek(base, 0, 0)?;
        stream.take(within_block + self.element_size).map(|mut bytes| bytes.split_off(within_block))
    }

    /// Fetch and decode record `index` as `T`.
    pub fn get<'a, T>(
        &self,
        mapper: &dyn Mapper,
        compression: &dyn CompressionAction,
        compressor: Compressor,
        index: u32,
    ) -> Result<T, SquashfsError>
    where
        T: DekuReader<'a, deku::ctx::Endian>,
    {
        let bytes = self.get_bytes(mapper, compression, compressor, index)?;
        let mut reader = Reader::new(&mut bytes.as_slice());
        Ok(T::from_reader_with_ctx(&mut reader, deku::ctx::Endian::Little)?)
    }
}

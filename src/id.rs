//! Id table: resolves the small integer stored in an inode header's `uid`
//! and `gid` fields to a 32-bit user or group id.

use deku::prelude::*;

use crate::compressor::{CompressionAction, Compressor};
use crate::error::SquashfsError;
use crate::mapper::Mapper;
use crate::table::LookupTable;

#[derive(Debug, Copy, Clone, DekuRead, PartialEq, Eq)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct Id {
    pub num: u32,
}

/// Lazily-resolved view over the archive's id table.
pub struct IdTable {
    table: LookupTable,
}

impl IdTable {
    pub fn read(mapper: &dyn Mapper, id_table: u64, id_count: u16) -> Result<Self, SquashfsError> {
        const RECORD_SIZE: usize = 4;
        Ok(Self { table: LookupTable::read(mapper, id_table, id_count as u32, RECORD_SIZE)? })
    }

    pub fn len(&self) -> u32 {
        self.table.len()
    }

    /// Resolve the id table index stored in an inode header to a uid/gid.
    pub fn get(
        &self,
        mapper: &dyn Mapper,
        compression: &dyn CompressionAction,
        compressor: Compressor,
        index: u16,
    ) -> Result<u32, SquashfsError> {
        let id: Id = self.table.get(mapper, compression, compressor, index as u32)?;
        Ok(id.num)
    }
}

//! NFS export table: maps an inode *number* to the inode *reference* needed
//! to actually decode it, supporting stateless NFS file handles.

use deku::prelude::*;

use crate::compressor::{CompressionAction, Compressor};
use crate::error::SquashfsError;
use crate::mapper::Mapper;
use crate::table::LookupTable;

#[derive(Debug, Copy, Clone, DekuRead, PartialEq, Eq)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct Export {
    pub inode_ref: u64,
}

/// Lazily-resolved view over the archive's export table.
///
/// Indexed by `inode_number - 1` (inode numbers are 1-based).
pub struct ExportTable {
    table: LookupTable,
}

impl ExportTable {
    pub fn read(mapper: &dyn Mapper, export_table: u64, inode_count: u32) -> Result<Self, SquashfsError> {
        const RECORD_SIZE: usize = 8;
        Ok(Self { table: LookupTable::read(mapper, export_table, inode_count, RECORD_SIZE)? })
    }

    pub fn len(&self) -> u32 {
        self.table.len()
    }

    pub fn get(
        &self,
        mapper: &dyn Mapper,
        compression: &dyn CompressionAction,
        compressor: Compressor,
        inode_number: u32,
    ) -> Result<u64, SquashfsError> {
        if inode_number == 0 {
            return Err(SquashfsError::SizeMismatch("inode numbers are 1-based"));
        }
        let export: Export = self.table.get(mapper, compression, compressor, inode_number - 1)?;
        Ok(export.inode_ref)
    }
}

//! The 96-byte archive header.
//!
//! [`SuperBlock::read`] maps the first 96 bytes of the archive through the
//! [`Mapper`], validates them, and exposes the eight section start offsets
//! every other component roots itself at.

use deku::prelude::*;

use crate::compressor::Compressor;
use crate::mapper::Mapper;
use crate::error::SquashfsError;

/// Raw magic bytes of a little-endian SquashFS 4.0 archive (`"hsqs"`, i.e.
/// the integer `0x73717368` read as a little-endian `u32`).
pub const MAGIC: [u8; 4] = *b"hsqs";

/// Sentinel used throughout the format to mark a section as absent.
pub const NOT_SET: u64 = 0xffff_ffff_ffff_ffff;

/// Minimum permitted `block_size` (4 KiB).
pub const MIN_BLOCK_SIZE: u32 = 0x1000;

/// Maximum permitted `block_size` (1 MiB).
pub const MAX_BLOCK_SIZE: u32 = 0x10_0000;

/// Size in bytes of the on-disk superblock.
pub const SUPERBLOCK_SIZE: u64 = 96;

#[rustfmt::skip]
#[derive(Copy, Clone, Debug)]
pub enum Flags {
    InodesStoredUncompressed    = 0b0000_0000_0000_0001,
    DataBlockStoredUncompressed = 0b0000_0000_0000_0010,
    Unused                      = 0b0000_0000_0000_0100,
    FragmentsStoredUncompressed = 0b0000_0000_0000_1000,
    NoFragments                 = 0b0000_0000_0001_0000,
    FragmentsAlwaysGenerated    = 0b0000_0000_0010_0000,
    DataHasBeenDeduplicated     = 0b0000_0000_0100_0000,
    Exportable                  = 0b0000_0000_1000_0000,
    XattrsStoredUncompressed    = 0b0000_0001_0000_0000,
    NoXattrs                    = 0b0000_0010_0000_0000,
    CompressorOptions           = 0b0000_0100_0000_0000,
}

/// Fixed 96-byte archive header.
///
/// All multi-byte integers are little-endian; the struct has no padding.
#[derive(Debug, Copy, Clone, DekuRead, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct SuperBlock {
    pub magic: [u8; 4],
    pub inode_count: u32,
    pub mod_time: u32,
    pub block_size: u32,
    pub frag_count: u32,
    pub compressor: Compressor,
    pub block_log: u16,
    pub flags: u16,
    pub id_count: u16,
    pub version_major: u16,
    pub version_minor: u16,
    pub root_inode: u64,
    pub bytes_used: u64,
    pub id_table: u64,
    pub xattr_table: u64,
    pub inode_table: u64,
    pub dir_table: u64,
    pub frag_table: u64,
    pub export_table: u64,
}

impl SuperBlock {
    /// Map and validate the superblock at the start of the archive.
    ///
    /// Checks: magic, version (must be 4.0), block size in range and
    /// consistent with `block_log`, and `bytes_used <= mapper.len()`.
    pub fn read(mapper: &dyn Mapper) -> Result<Self, SquashfsError> {
        let bytes = mapper.map(0, SUPERBLOCK_SIZE)?;
        let mut reader = Reader::new(&mut bytes.as_slice());
        let sb = SuperBlock::from_reader_with_ctx(&mut reader, ())?;

        if sb.magic != MAGIC {
            return Err(SquashfsError::WrongMagic);
        }
        if sb.version_major != 4 || sb.version_minor != 0 {
            return Err(SquashfsError::UnsupportedVersion(sb.version_major, sb.version_minor));
        }

        let power_of_two = sb.block_size != 0 && (sb.block_size & (sb.block_size - 1)) == 0;
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&sb.block_size) || !power_of_two {
            return Err(SquashfsError::BlockSizeMismatch {
                block_size: sb.block_size,
                block_log: sb.block_log,
            });
        }
        if sb.block_size != 1u32 << sb.block_log {
            return Err(SquashfsError::BlockSizeMismatch {
                block_size: sb.block_size,
                block_log: sb.block_log,
            });
        }

        if sb.bytes_used > mapper.len() {
            return Err(SquashfsError::SizeMismatch("bytes_used exceeds archive length"));
        }
        for (name, section) in [
            ("id_table", sb.id_table),
            ("inode_table", sb.inode_table),
            ("dir_table", sb.dir_table),
        ] {
            if section > sb.bytes_used {
                return Err(SquashfsError::SizeMismatch(name_static(name)));
            }
        }
        for (name, section) in [
            ("xattr_table", sb.xattr_table),
            ("frag_table", sb.frag_table),
            ("export_table", sb.export_table),
        ] {
            if section != NOT_SET && section > sb.bytes_used {
                return Err(SquashfsError::SizeMismatch(name_static(name)));
            }
        }

        Ok(sb)
    }

    fn flag(&self, f: Flags) -> bool {
        self.flags & (f as u16) != 0
    }

    pub fn inodes_uncompressed(&self) -> bool {
        self.flag(Flags::InodesStoredUncompressed)
    }

    pub fn data_block_stored_uncompressed(&self) -> bool {
        self.flag(Flags::DataBlockStoredUncompressed)
    }

    pub fn fragments_stored_uncompressed(&self) -> bool {
        self.flag(Flags::FragmentsStoredUncompressed)
    }

    pub fn has_fragments(&self) -> bool {
        !self.flag(Flags::NoFragments) && self.frag_table != NOT_SET
    }

    pub fn fragments_always_generated(&self) -> bool {
        self.flag(Flags::FragmentsAlwaysGenerated)
    }

    pub fn data_has_been_deduplicated(&self) -> bool {
        self.flag(Flags::DataHasBeenDeduplicated)
    }

    pub fn has_export_table(&self) -> bool {
        self.flag(Flags::Exportable) && self.export_table != NOT_SET
    }

    pub fn xattrs_stored_uncompressed(&self) -> bool {
        self.flag(Flags::XattrsStoredUncompressed)
    }

    pub fn has_xattrs(&self) -> bool {
        !self.flag(Flags::NoXattrs) && self.xattr_table != NOT_SET
    }

    pub fn has_compression_options(&self) -> bool {
        self.flag(Flags::CompressorOptions)
    }
}

/// `SizeMismatch` wants a `&'static str`; the table name literals above are
/// already static, this just documents the coercion at the call site.
fn name_static(s: &'static str) -> &'static str {
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::MemoryMapper;

    fn valid_superblock_bytes() -> Vec<u8> {
        let mut b = Vec::with_capacity(96);
        b.extend_from_slice(&MAGIC);
        b.extend_from_slice(&0u32.to_le_bytes()); // inode_count
        b.extend_from_slice(&0u32.to_le_bytes()); // mod_time
        b.extend_from_slice(&0x20000u32.to_le_bytes()); // block_size 128KiB
        b.extend_from_slice(&0u32.to_le_bytes()); // frag_count
        b.extend_from_slice(&4u16.to_le_bytes()); // compressor xz
        b.extend_from_slice(&0x11u16.to_le_bytes()); // block_log
        b.extend_from_slice(&0u16.to_le_bytes()); // flags
        b.extend_from_slice(&0u16.to_le_bytes()); // id_count
        b.extend_from_slice(&4u16.to_le_bytes()); // version_major
        b.extend_from_slice(&0u16.to_le_bytes()); // version_minor
        b.extend_from_slice(&0u64.to_le_bytes()); // root_inode
        b.extend_from_slice(&96u64.to_le_bytes()); // bytes_used
        b.extend_from_slice(&0u64.to_le_bytes()); // id_table
        b.extend_from_slice(&NOT_SET.to_le_bytes()); // xattr_table
        b.extend_from_slice(&0u64.to_le_bytes()); // inode_table
        b.extend_from_slice(&0u64.to_le_bytes()); // dir_table
        b.extend_from_slice(&NOT_SET.to_le_bytes()); // frag_table
        b.extend_from_slice(&NOT_SET.to_le_bytes()); // export_table
        assert_eq!(b.len(), 96);
        b
    }

    #[test]
    fn reads_valid_superblock() {
        let mapper = MemoryMapper::new(valid_superblock_bytes());
        let sb = SuperBlock::read(&mapper).unwrap();
        assert_eq!(sb.block_size, 0x20000);
        assert!(!sb.has_fragments());
        assert!(!sb.has_export_table());
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut bytes = valid_superblock_bytes();
        bytes[0] = b'x';
        let mapper = MemoryMapper::new(bytes);
        assert!(matches!(SuperBlock::read(&mapper), Err(SquashfsError::WrongMagic)));
    }

    #[test]
    fn rejects_short_archive() {
        let mapper = MemoryMapper::new(vec![0u8; 10]);
        assert!(SuperBlock::read(&mapper).is_err());
    }

    #[test]
    fn rejects_block_log_mismatch() {
        let mut bytes = valid_superblock_bytes();
        bytes[22..24].copy_from_slice(&0x10u16.to_le_bytes()); // wrong block_log
        let mapper = MemoryMapper::new(bytes);
        assert!(matches!(
            SuperBlock::read(&mapper),
            Err(SquashfsError::BlockSizeMismatch { .. })
        ));
    }

    #[test]
    fn rejects_bytes_used_overflow() {
        let mut bytes = valid_superblock_bytes();
        bytes[40..48].copy_from_slice(&1_000_000u64.to_le_bytes()); // bytes_used
        let mapper = MemoryMapper::new(bytes);
        assert!(matches!(SuperBlock::read(&mapper), Err(SquashfsError::SizeMismatch(_))));
    }
}

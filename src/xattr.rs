//! Extended attributes.
//!
//! No in-tree Rust SquashFS reader implements xattr decoding; this module is
//! translated from the xattr table and xattr iterator of the reference C
//! decoder (`sqsh-tools`) into the crate's own metablock/table plumbing.
//!
//! Layout: the xattr section starts with a 16-byte header (`xattr_table`
//! from the superblock) naming where the xattr *value* data lives and how
//! many xattr id records exist; right after the header sits a normal
//! two-level [`LookupTable`] of 16-byte xattr id records, one per distinct
//! `xattr_index` an inode can reference. Each record names a metablock
//! reference and an entry count; walking that many key/value pairs out of a
//! [`MetablockStream`] rooted at the header's value-table offset yields one
//! inode's full xattr set. A value can be indirect: its 8-byte payload is
//! itself a metablock reference to the real, larger value stored elsewhere
//! in the same section (deduplicating repeated values across inodes).

use deku::prelude::*;

use crate::compressor::{CompressionAction, Compressor};
use crate::error::SquashfsError;
use crate::mapper::Mapper;
use crate::metadata::{join_ref, MetablockStream};
use crate::table::LookupTable;

/// Sentinel stored in an inode's `xattr_index` field meaning "no xattrs".
pub const NO_XATTR: u32 = 0xffff_ffff;

const RECORD_SIZE: usize = 16;
const HEADER_SIZE: u64 = 16;

/// Bit of an xattr key's `type` field marking its value as indirect.
const INDIRECT_FLAG: u16 = 0x0100;

#[derive(Debug, Copy, Clone, PartialEq, Eq, DekuRead)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
struct XattrIdTableHeader {
    xattr_table_start: u64,
    xattr_ids: u32,
    #[allow(dead_code)]
    unused: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, DekuRead)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
struct XattrLookupRecord {
    xattr_ref: u64,
    count: u32,
    size: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, DekuRead)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
struct KeyHeader {
    kind: u16,
    name_size: u16,
}

/// Resolved prefix namespace of one xattr entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum XattrPrefix {
    User,
    Trusted,
    Security,
}

impl XattrPrefix {
    fn from_bits(bits: u16) -> Result<Self, SquashfsError> {
        match bits & !INDIRECT_FLAG {
            0 => Ok(Self::User),
            1 => Ok(Self::Trusted),
            2 => Ok(Self::Security),
            _ => Err(SquashfsError::CorruptedOrInvalid),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user.",
            Self::Trusted => "trusted.",
            Self::Security => "security.",
        }
    }
}

/// One decoded extended attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XattrEntry {
    pub prefix: XattrPrefix,
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl XattrEntry {
    /// The attribute's full name, e.g. `user.comment`.
    pub fn full_name(&self) -> Vec<u8> {
        let mut out = self.prefix.as_str().as_bytes().to_vec();
        out.extend_from_slice(&self.name);
        out
    }

    /// Compare this entry's full name (`prefix ++ name`) against `other`
    /// without allocating, so callers can match on a full xattr name (e.g.
    /// `"user.comment"`) without first materializing [`Self::full_name`].
    pub fn fullname_cmp(&self, other: &[u8]) -> bool {
        let prefix = self.prefix.as_str().as_bytes();
        other.len() == prefix.len() + self.name.len()
            && other.starts_with(prefix)
            && &other[prefix.len()..] == self.name.as_slice()
    }
}

/// Archive-wide handle to the xattr section: the header plus the id lookup
/// table. Obtained once and reused across inodes.
pub struct XattrTable {
    header: XattrIdTableHeader,
    ids: LookupTable,
}

impl XattrTable {
    pub fn read(mapper: &dyn Mapper, xattr_table: u64) -> Result<Self, SquashfsError> {
        let header_bytes = mapper.map(xattr_table, HEADER_SIZE)?;
        let mut reader = Reader::new(&mut header_bytes.as_slice());
        let header = XattrIdTableHeader::from_reader_with_ctx(&mut reader, deku::ctx::Endian::Little)?;
        let ids = LookupTable::read(mapper, xattr_table + HEADER_SIZE, header.xattr_ids, RECORD_SIZE)?;
        Ok(Self { header, ids })
    }

    pub fn len(&self) -> u32 {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Iterator over one inode's extended attributes.
///
/// An inode whose `xattr_index` is [`NO_XATTR`] yields an iterator that is
/// immediately exhausted — this is not an error. An inode with a real index
/// but no archive-wide xattr table is the corrupt-archive case the
/// reference decoder calls out explicitly: constructing the iterator then
/// fails with [`SquashfsError::NoXattrTable`] rather than silently
/// returning no attributes.
pub struct XattrIterator<'a> {
    mapper: &'a dyn Mapper,
    compression: &'a dyn CompressionAction,
    compressor: Compressor,
    xattr_table_start: u64,
    stream: MetablockStream<'a>,
    remaining: u32,
}

impl<'a> XattrIterator<'a> {
    pub fn new(
        mapper: &'a dyn Mapper,
        compression: &'a dyn CompressionAction,
        compressor: Compressor,
        xattr_table: Option<&XattrTable>,
        xattr_index: u32,
    ) -> Result<Self, SquashfsError> {
        if xattr_index == NO_XATTR {
            return Ok(Self {
                mapper,
                compression,
                compressor,
                xattr_table_start: 0,
                stream: MetablockStream::new(mapper, compression, compressor),
                remaining: 0,
            });
        }
        let table = xattr_table.ok_or(SquashfsError::NoXattrTable)?;
        let record: XattrLookupRecord = table.ids.get(mapper, compression, compressor, xattr_index)?;

        let mut stream = MetablockStream::new(mapper, compression, compressor);
        stream.seek_ref(table.header.xattr_table_start, record.xattr_ref)?;
        stream.ensure(record.size as usize)?;

        Ok(Self {
            mapper,
            compression,
            compressor,
            xattr_table_start: table.header.xattr_table_start,
            stream,
            remaining: record.count,
        })
    }

    fn read_value(stream: &mut MetablockStream<'_>) -> Result<(u16, Vec<u8>), SquashfsError> {
        let size_bytes = stream.take(4)?;
        let vsize = u32::from_le_bytes(size_bytes.try_into().unwrap());
        let value = stream.take(vsize as usize)?;
        Ok((vsize as u16, value))
    }

    fn load_indirect(&mut self, indirect_ref_bytes: &[u8]) -> Result<Vec<u8>, SquashfsError> {
        let reference = u64::from_le_bytes(indirect_ref_bytes.try_into().unwrap());
        let mut out_of_line = MetablockStream::new(self.mapper, self.compression, self.compressor);
        out_of_line.seek_ref(self.xattr_table_start, reference)?;
        let (_, value) = Self::read_value(&mut out_of_line)?;
        Ok(value)
    }
}

impl<'a> Iterator for XattrIterator<'a> {
    type Item = Result<XattrEntry, SquashfsError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let result = (|| {
            let key_bytes = self.stream.take(4)?;
            let mut reader = Reader::new(&mut key_bytes.as_slice());
            let key = KeyHeader::from_reader_with_ctx(&mut reader, deku::ctx::Endian::Little)?;
            let prefix = XattrPrefix::from_bits(key.kind)?;
            let name = self.stream.take(key.name_size as usize)?;

            let (vsize, value) = Self::read_value(&mut self.stream)?;
            let value = if key.kind & INDIRECT_FLAG != 0 {
                if vsize != 8 {
                    return Err(SquashfsError::SizeMismatch("indirect xattr value must be 8 bytes"));
                }
                self.load_indirect(&value)?
            } else {
                value
            };

            Ok(XattrEntry { prefix, name, value })
        })();
        self.remaining -= 1;
        Some(result)
    }
}

//! Inode table: the 14 on-disk inode variants and their shared header.
//!
//! Inodes are stored back-to-back in the metadata section rooted at
//! `superblock.inode_table`, addressed by a 48:16 packed reference (see
//! [`crate::metadata::split_ref`]). [`Inode::read`] decodes exactly one,
//! starting at an arbitrary inner offset inside the inode table's
//! [`MetablockStream`].

use deku::prelude::*;

use crate::directory::DirectoryIndex;
use crate::error::SquashfsError;
use crate::metadata::MetablockStream;

/// Size, in bytes, a [`BasicFile`]/[`ExtendedFile`] datablock list entry
/// occupies, packed as a 32-bit size with the top bit marking
/// "stored uncompressed".
const DATA_STORED_UNCOMPRESSED: u32 = 1 << 24;

#[derive(Copy, Clone, Debug, PartialEq, Eq, DekuRead)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct DataSize(u32);

impl DataSize {
    /// Build a `DataSize` from its packed on-disk representation (top bit
    /// marks "stored uncompressed").
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn uncompressed(&self) -> bool {
        self.0 & DATA_STORED_UNCOMPRESSED != 0
    }

    pub fn size(&self) -> u32 {
        self.0 & !DATA_STORED_UNCOMPRESSED
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, DekuRead)]
#[deku(id_type = "u16", endian = "endian", ctx = "endian: deku::ctx::Endian")]
#[rustfmt::skip]
pub enum InodeId {
    BasicDirectory          = 1,
    BasicFile               = 2,
    BasicSymlink            = 3,
    BasicBlockDevice        = 4,
    BasicCharacterDevice    = 5,
    BasicFifo               = 6,
    BasicSocket             = 7,
    ExtendedDirectory       = 8,
    ExtendedFile            = 9,
    ExtendedSymlink         = 10,
    ExtendedBlockDevice     = 11,
    ExtendedCharacterDevice = 12,
    ExtendedFifo            = 13,
    ExtendedSocket          = 14,
}

impl InodeId {
    /// Collapse an extended variant to the basic type a directory entry
    /// records it as (directory entries never record "extended").
    pub fn into_base_type(self) -> Self {
        match self {
            Self::ExtendedDirectory => Self::BasicDirectory,
            Self::ExtendedFile => Self::BasicFile,
            Self::ExtendedSymlink => Self::BasicSymlink,
            Self::ExtendedBlockDevice => Self::BasicBlockDevice,
            Self::ExtendedCharacterDevice => Self::BasicCharacterDevice,
            Self::ExtendedFifo => Self::BasicFifo,
            Self::ExtendedSocket => Self::BasicSocket,
            other => other,
        }
    }

    pub fn is_directory(self) -> bool {
        matches!(self, Self::BasicDirectory | Self::ExtendedDirectory)
    }

    pub fn is_file(self) -> bool {
        matches!(self, Self::BasicFile | Self::ExtendedFile)
    }

    pub fn is_symlink(self) -> bool {
        matches!(self, Self::BasicSymlink | Self::ExtendedSymlink)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, DekuRead)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct InodeHeader {
    pub permissions: u16,
    /// index into the id table
    pub uid: u16,
    /// index into the id table
    pub gid: u16,
    pub mtime: u32,
    pub inode_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, DekuRead)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct BasicDirectory {
    pub block_index: u32,
    pub link_count: u32,
    pub file_size: u16,
    pub block_offset: u16,
    pub parent_inode: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, DekuRead)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct ExtendedDirectory {
    pub link_count: u32,
    pub file_size: u32,
    pub block_index: u32,
    pub parent_inode: u32,
    #[deku(assert = "*index_count < 256")]
    pub index_count: u16,
    pub block_offset: u16,
    pub xattr_index: u32,
    #[deku(count = "*index_count")]
    pub dir_index: Vec<DirectoryIndex>,
}

fn block_count(block_size: u32, block_log: u16, frag_index: u32, file_size: u64) -> u64 {
    const NO_FRAGMENT: u32 = 0xffff_ffff;
    if frag_index == NO_FRAGMENT {
        (file_size + u64::from(block_size) - 1) >> block_log
    } else {
        file_size >> block_log
    }
}

#[derive(Debug, Clone, PartialEq, Eq, DekuRead)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian, block_size: u32, block_log: u16")]
pub struct BasicFile {
    pub blocks_start: u32,
    pub frag_index: u32,
    pub block_offset: u32,
    pub file_size: u32,
    #[deku(count = "block_count(block_size, block_log, *frag_index, *file_size as u64)")]
    pub block_sizes: Vec<DataSize>,
}

impl BasicFile {
    pub fn has_fragment(&self) -> bool {
        self.frag_index != 0xffff_ffff
    }
}

#[derive(Debug, Clone, PartialEq, Eq, DekuRead)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian, block_size: u32, block_log: u16")]
pub struct ExtendedFile {
    pub blocks_start: u64,
    pub file_size: u64,
    pub sparse: u64,
    pub link_count: u32,
    pub frag_index: u32,
    pub block_offset: u32,
    pub xattr_index: u32,
    #[deku(count = "block_count(block_size, block_log, *frag_index, *file_size)")]
    pub block_sizes: Vec<DataSize>,
}

impl ExtendedFile {
    pub fn has_fragment(&self) -> bool {
        self.frag_index != 0xffff_ffff
    }
}

impl From<&ExtendedFile> for BasicFile {
    fn from(ex: &ExtendedFile) -> Self {
        Self {
            blocks_start: ex.blocks_start as u32,
            frag_index: ex.frag_index,
            block_offset: ex.block_offset,
            file_size: ex.file_size as u32,
            block_sizes: ex.block_sizes.clone(),
        }
    }
}

#[derive(Clone, PartialEq, Eq, DekuRead)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct BasicSymlink {
    pub link_count: u32,
    #[deku(assert = "*target_size < 4096")]
    pub target_size: u32,
    #[deku(count = "target_size")]
    pub target_path: Vec<u8>,
}

impl std::fmt::Debug for BasicSymlink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicSymlink")
            .field("link_count", &self.link_count)
            .field("target_size", &self.target_size)
            .field("target_path", &String::from_utf8_lossy(&self.target_path))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, DekuRead)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct ExtendedSymlink {
    pub link_count: u32,
    #[deku(assert = "*target_size < 4096")]
    pub target_size: u32,
    #[deku(count = "target_size")]
    pub target_path: Vec<u8>,
    pub xattr_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, DekuRead)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct BasicDeviceSpecialFile {
    pub link_count: u32,
    pub device_number: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, DekuRead)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct ExtendedDeviceSpecialFile {
    pub link_count: u32,
    pub device_number: u32,
    pub xattr_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, DekuRead)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct BasicIpc {
    pub link_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, DekuRead)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct ExtendedIpc {
    pub link_count: u32,
    pub xattr_index: u32,
}

/// Extract a [`BasicDeviceSpecialFile`]'s 32-bit packed `(major, minor)`
/// device number the way `mknod(2)` expects it.
pub fn device_major_minor(device_number: u32) -> (u32, u32) {
    (device_number >> 8, device_number & 0xff)
}

#[derive(Debug, Clone, PartialEq, Eq, DekuRead)]
#[deku(ctx = "endian: deku::ctx::Endian, block_size: u32, block_log: u16")]
#[deku(endian = "endian")]
pub enum InodeInner {
    #[deku(id = "InodeId::BasicDirectory")]
    BasicDirectory(BasicDirectory),
    #[deku(id = "InodeId::BasicFile")]
    BasicFile(#[deku(ctx = "block_size, block_log")] BasicFile),
    #[deku(id = "InodeId::BasicSymlink")]
    BasicSymlink(BasicSymlink),
    #[deku(id = "InodeId::BasicBlockDevice")]
    BasicBlockDevice(BasicDeviceSpecialFile),
    #[deku(id = "InodeId::BasicCharacterDevice")]
    BasicCharacterDevice(BasicDeviceSpecialFile),
    #[deku(id = "InodeId::BasicFifo")]
    BasicFifo(BasicIpc),
    #[deku(id = "InodeId::BasicSocket")]
    BasicSocket(BasicIpc),
    #[deku(id = "InodeId::ExtendedDirectory")]
    ExtendedDirectory(ExtendedDirectory),
    #[deku(id = "InodeId::ExtendedFile")]
    ExtendedFile(#[deku(ctx = "block_size, block_log")] ExtendedFile),
    #[deku(id = "InodeId::ExtendedSymlink")]
    ExtendedSymlink(ExtendedSymlink),
    #[deku(id = "InodeId::ExtendedBlockDevice")]
    ExtendedBlockDevice(ExtendedDeviceSpecialFile),
    #[deku(id = "InodeId::ExtendedCharacterDevice")]
    ExtendedCharacterDevice(ExtendedDeviceSpecialFile),
    #[deku(id = "InodeId::ExtendedFifo")]
    ExtendedFifo(ExtendedIpc),
    #[deku(id = "InodeId::ExtendedSocket")]
    ExtendedSocket(ExtendedIpc),
}

/// One decoded inode: its type tag, the header all variants share, and the
/// type-specific payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub id: InodeId,
    pub header: InodeHeader,
    pub inner: InodeInner,
}

impl Inode {
    /// Decode the inode at the stream's current position. The caller is
    /// responsible for having `seek`'d the stream to the inode's reference
    /// first (see [`crate::metadata::MetablockStream::seek_ref`]).
    ///
    /// `MetablockStream` implements `Read`, pulling and decompressing
    /// further metablocks on demand, so a variant that straddles a
    /// metablock boundary (an extended directory's index entries, most
    /// commonly) decodes transparently.
    pub fn read(
        stream: &mut MetablockStream<'_>,
        block_size: u32,
        block_log: u16,
    ) -> Result<Self, SquashfsError> {
        let mut reader = Reader::new(stream);
        let id = InodeId::from_reader_with_ctx(&mut reader, deku::ctx::Endian::Little)?;
        let header = InodeHeader::from_reader_with_ctx(&mut reader, deku::ctx::Endian::Little)?;
        let inner =
            InodeInner::from_reader_with_ctx(&mut reader, (deku::ctx::Endian::Little, block_size, block_log))?;
        Ok(Inode { id, header, inner })
    }
}

/// Sentinel meaning "no fragment"/"no xattrs" (the two packed-`u32` uses of
/// `0xFFFF_FFFF` named in §3 of the format's data model).
pub const NO_FRAGMENT: u32 = 0xffff_ffff;
pub const NO_XATTR: u32 = 0xffff_ffff;

/// Inode type, normalized to the 7 values a directory entry or caller cares
/// about (basic and extended variants of the same kind collapse together).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InodeType {
    Directory,
    File,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

impl From<InodeId> for InodeType {
    fn from(id: InodeId) -> Self {
        match id.into_base_type() {
            InodeId::BasicDirectory => Self::Directory,
            InodeId::BasicFile => Self::File,
            InodeId::BasicSymlink => Self::Symlink,
            InodeId::BasicBlockDevice => Self::BlockDevice,
            InodeId::BasicCharacterDevice => Self::CharDevice,
            InodeId::BasicFifo => Self::Fifo,
            InodeId::BasicSocket => Self::Socket,
            _ => unreachable!("into_base_type always yields a basic variant"),
        }
    }
}

impl Inode {
    pub fn inode_type(&self) -> InodeType {
        self.id.into()
    }

    pub fn mode(&self) -> u16 {
        self.header.permissions
    }

    pub fn uid_index(&self) -> u16 {
        self.header.uid
    }

    pub fn gid_index(&self) -> u16 {
        self.header.gid
    }

    pub fn mtime(&self) -> u32 {
        self.header.mtime
    }

    pub fn inode_number(&self) -> u32 {
        self.header.inode_number
    }

    /// Location of this directory's contents in the directory table, as
    /// `(block_index, block_offset)` relative to `superblock.dir_table`.
    /// `None` for non-directory inodes.
    pub fn directory_location(&self) -> Option<(u32, u16)> {
        match &self.inner {
            InodeInner::BasicDirectory(d) => Some((d.block_index, d.block_offset)),
            InodeInner::ExtendedDirectory(d) => Some((d.block_index, d.block_offset)),
            _ => None,
        }
    }

    /// The extended-directory lookup index, if this is an extended
    /// directory inode that carries one.
    pub fn directory_index(&self) -> &[DirectoryIndex] {
        match &self.inner {
            InodeInner::ExtendedDirectory(d) => &d.dir_index,
            _ => &[],
        }
    }

    pub fn hard_link_count(&self) -> u32 {
        match &self.inner {
            InodeInner::BasicDirectory(d) => d.link_count,
            InodeInner::ExtendedDirectory(d) => d.link_count,
            InodeInner::BasicFile(_) => 1,
            InodeInner::ExtendedFile(f) => f.link_count,
            InodeInner::BasicSymlink(s) => s.link_count,
            InodeInner::ExtendedSymlink(s) => s.link_count,
            InodeInner::BasicBlockDevice(d) | InodeInner::BasicCharacterDevice(d) => d.link_count,
            InodeInner::ExtendedBlockDevice(d) | InodeInner::ExtendedCharacterDevice(d) => d.link_count,
            InodeInner::BasicFifo(i) | InodeInner::BasicSocket(i) => i.link_count,
            InodeInner::ExtendedFifo(i) | InodeInner::ExtendedSocket(i) => i.link_count,
        }
    }

    /// File or directory byte size; zero for every other type. For
    /// directories this is the on-disk `file_size - 3` quirk, unadjusted
    /// (callers wanting the true entry-byte-count subtract 3 themselves).
    pub fn file_size(&self) -> u64 {
        match &self.inner {
            InodeInner::BasicDirectory(d) => d.file_size as u64,
            InodeInner::ExtendedDirectory(d) => d.file_size as u64,
            InodeInner::BasicFile(f) => f.file_size as u64,
            InodeInner::ExtendedFile(f) => f.file_size,
            _ => 0,
        }
    }

    /// Absolute on-disk offset of this file's first datablock. Zero for
    /// non-file inodes.
    pub fn blocks_start(&self) -> u64 {
        match &self.inner {
            InodeInner::BasicFile(f) => f.blocks_start as u64,
            InodeInner::ExtendedFile(f) => f.blocks_start,
            _ => 0,
        }
    }

    pub fn block_count(&self) -> usize {
        match &self.inner {
            InodeInner::BasicFile(f) => f.block_sizes.len(),
            InodeInner::ExtendedFile(f) => f.block_sizes.len(),
            _ => 0,
        }
    }

    /// On-disk size of datablock `i`. Zero if out of range or not a file.
    pub fn block_size(&self, i: usize) -> u32 {
        match &self.inner {
            InodeInner::BasicFile(f) => f.block_sizes.get(i).map_or(0, DataSize::size),
            InodeInner::ExtendedFile(f) => f.block_sizes.get(i).map_or(0, DataSize::size),
            _ => 0,
        }
    }

    /// Whether datablock `i` is stored compressed. `false` if out of range
    /// or not a file.
    pub fn block_is_compressed(&self, i: usize) -> bool {
        match &self.inner {
            InodeInner::BasicFile(f) => f.block_sizes.get(i).is_some_and(|b| !b.uncompressed()),
            InodeInner::ExtendedFile(f) => f.block_sizes.get(i).is_some_and(|b| !b.uncompressed()),
            _ => false,
        }
    }

    /// Index into the fragment table, or [`NO_FRAGMENT`] if this file has
    /// no fragment (or isn't a file).
    pub fn fragment_block_index(&self) -> u32 {
        match &self.inner {
            InodeInner::BasicFile(f) => f.frag_index,
            InodeInner::ExtendedFile(f) => f.frag_index,
            _ => NO_FRAGMENT,
        }
    }

    pub fn fragment_block_offset(&self) -> u32 {
        match &self.inner {
            InodeInner::BasicFile(f) => f.block_offset,
            InodeInner::ExtendedFile(f) => f.block_offset,
            _ => 0,
        }
    }

    /// Raw symlink target bytes (not zero-terminated). Empty for
    /// non-symlinks.
    pub fn symlink_target(&self) -> &[u8] {
        match &self.inner {
            InodeInner::BasicSymlink(s) => &s.target_path,
            InodeInner::ExtendedSymlink(s) => &s.target_path,
            _ => &[],
        }
    }

    /// Packed `(major, minor)` device number; zero for non-device inodes.
    pub fn device_number(&self) -> u32 {
        match &self.inner {
            InodeInner::BasicBlockDevice(d) | InodeInner::BasicCharacterDevice(d) => d.device_number,
            InodeInner::ExtendedBlockDevice(d) | InodeInner::ExtendedCharacterDevice(d) => d.device_number,
            _ => 0,
        }
    }

    /// Index into the xattr id table, or [`NO_XATTR`]. Basic variants always
    /// report the sentinel: the basic encoding has no slot for it.
    pub fn xattr_index(&self) -> u32 {
        match &self.inner {
            InodeInner::ExtendedDirectory(d) => d.xattr_index,
            InodeInner::ExtendedFile(f) => f.xattr_index,
            InodeInner::ExtendedSymlink(s) => s.xattr_index,
            InodeInner::ExtendedBlockDevice(d) | InodeInner::ExtendedCharacterDevice(d) => d.xattr_index,
            InodeInner::ExtendedFifo(i) | InodeInner::ExtendedSocket(i) => i.xattr_index,
            _ => NO_XATTR,
        }
    }
}

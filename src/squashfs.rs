//! Archive façade: owns the mapper, the decoded superblock, and lazily
//! constructs the id/export/fragment/xattr tables the first time a caller
//! actually needs one.
//!
//! Everything else in the crate takes its mapper/compression/compressor
//! arguments explicitly; `Squashfs` exists purely to hold those together so
//! callers don't have to thread them through by hand.

use std::sync::OnceLock;

use deku::prelude::*;
use tracing::{debug, info, trace};

use crate::compressor::{CompressionAction, CompressionOptions, Compressor, DefaultCompressor};
use crate::dir::DirReader;
use crate::error::SquashfsError;
use crate::export::ExportTable;
use crate::file::FileReader;
use crate::fragment::FragmentTable;
use crate::id::IdTable;
use crate::inode::Inode;
use crate::mapper::{Mapper, Source};
use crate::metadata::{read_block, MetablockStream};
use crate::path;
use crate::superblock::SuperBlock;
use crate::xattr::{XattrIterator, XattrTable};

pub struct Squashfs {
    mapper: Box<dyn Mapper>,
    compression: Box<dyn CompressionAction>,
    superblock: SuperBlock,
    compression_options: Option<CompressionOptions>,
    id_table: OnceLock<Result<IdTable, SquashfsError>>,
    export_table: OnceLock<Result<ExportTable, SquashfsError>>,
    fragment_table: OnceLock<Result<FragmentTable, SquashfsError>>,
    xattr_table: OnceLock<Result<XattrTable, SquashfsError>>,
}

impl Squashfs {
    /// Open an archive through the default codec table.
    pub fn open(source: Source) -> Result<Self, SquashfsError> {
        Self::open_with_offset(source, 0)
    }

    /// Same as [`Self::open`], but the archive starts `offset` bytes into
    /// the backing source.
    pub fn open_with_offset(source: Source, offset: u64) -> Result<Self, SquashfsError> {
        let mapper = source.into_mapper_with_offset(offset)?;
        Self::from_mapper(mapper)
    }

    /// Build an archive over an already-constructed [`Mapper`], using the
    /// codec table that ships with the crate.
    pub fn from_mapper(mapper: Box<dyn Mapper>) -> Result<Self, SquashfsError> {
        Self::from_mapper_with_compression(mapper, Box::new(DefaultCompressor))
    }

    /// Same as [`Self::from_mapper`], but with a caller-supplied codec
    /// table (to plug in a vendor-specific compressor under a reused
    /// numeric id, for instance).
    pub fn from_mapper_with_compression(
        mapper: Box<dyn Mapper>,
        compression: Box<dyn CompressionAction>,
    ) -> Result<Self, SquashfsError> {
        let superblock = SuperBlock::read(mapper.as_ref())?;
        trace!("{superblock:#08x?}");
        info!("opened archive: {} inodes, compressor {:?}", superblock.inode_count, superblock.compressor);

        let compression_options = if superblock.compressor != Compressor::None
            && superblock.has_compression_options()
        {
            let (bytes, _) = read_block(
                mapper.as_ref(),
                crate::superblock::SUPERBLOCK_SIZE,
                compression.as_ref(),
                superblock.compressor,
            )?;
            let mut reader = Reader::new(&mut bytes.as_slice());
            CompressionOptions::from_reader_with_ctx(
                &mut reader,
                (deku::ctx::Endian::Little, superblock.compressor),
            )
            .ok()
        } else {
            None
        };

        Ok(Self {
            mapper,
            compression,
            superblock,
            compression_options,
            id_table: OnceLock::new(),
            export_table: OnceLock::new(),
            fragment_table: OnceLock::new(),
            xattr_table: OnceLock::new(),
        })
    }

    pub fn superblock(&self) -> &SuperBlock {
        &self.superblock
    }

    pub fn compression_options(&self) -> Option<&CompressionOptions> {
        self.compression_options.as_ref()
    }

    fn compression(&self) -> &dyn CompressionAction {
        self.compression.as_ref()
    }

    /// Decode the inode named by `inode_ref` (a 48:16 packed reference
    /// relative to `superblock.inode_table`, as produced by a directory
    /// entry, the root inode field, or an export table lookup).
    pub fn inode(&self, inode_ref: u64) -> Result<Inode, SquashfsError> {
        debug!("loading inode at reference {inode_ref:#x}");
        let mut stream = MetablockStream::new(self.mapper.as_ref(), self.compression(), self.superblock.compressor);
        stream.seek_ref(self.superblock.inode_table, inode_ref)?;
        Inode::read(&mut stream, self.superblock.block_size, self.superblock.block_log)
    }

    /// Decode the archive's root directory inode.
    pub fn root_inode(&self) -> Result<Inode, SquashfsError> {
        self.inode(self.superblock.root_inode)
    }

    /// Iterate `inode`'s directory entries.
    pub fn read_dir<'a>(&'a self, inode: &Inode) -> Result<DirReader<'a>, SquashfsError> {
        DirReader::new(self.mapper.as_ref(), self.compression(), self.superblock.compressor, self.superblock.dir_table, inode)
    }

    /// Open `inode`'s file content for reading.
    pub fn open_file<'a>(&'a self, inode: &Inode) -> Result<FileReader<'a>, SquashfsError> {
        let fragment_table = if inode.fragment_block_index() != crate::inode::NO_FRAGMENT {
            Some(self.fragment_table()?)
        } else {
            None
        };
        FileReader::new(
            self.mapper.as_ref(),
            self.compression(),
            self.superblock.compressor,
            self.superblock.block_size,
            fragment_table,
            inode,
        )
    }

    /// Iterate `inode`'s extended attributes.
    pub fn xattrs<'a>(&'a self, inode: &Inode) -> Result<XattrIterator<'a>, SquashfsError> {
        let table = if inode.xattr_index() == crate::inode::NO_XATTR {
            None
        } else {
            Some(self.xattr_table()?)
        };
        XattrIterator::new(self.mapper.as_ref(), self.compression(), self.superblock.compressor, table, inode.xattr_index())
    }

    /// Resolve a `/`-separated path, starting at the archive root, to an
    /// inode reference.
    pub fn resolve(&self, path: &str) -> Result<u64, SquashfsError> {
        path::resolve(
            self.mapper.as_ref(),
            self.compression(),
            self.superblock.compressor,
            self.superblock.dir_table,
            self.superblock.block_size,
            self.superblock.block_log,
            self.superblock.inode_table,
            self.superblock.root_inode,
            path,
        )
    }

    /// Resolve an inode header's `uid`/`gid` table index to the real id.
    pub fn resolve_id(&self, index: u16) -> Result<u32, SquashfsError> {
        self.id_table()?.get(self.mapper.as_ref(), self.compression(), self.superblock.compressor, index)
    }

    /// Resolve an inode *number* (e.g. from an NFS file handle) to the
    /// inode reference needed to decode it.
    pub fn export_lookup(&self, inode_number: u32) -> Result<u64, SquashfsError> {
        self.export_table()?.get(self.mapper.as_ref(), self.compression(), self.superblock.compressor, inode_number)
    }

    fn id_table(&self) -> Result<&IdTable, SquashfsError> {
        match self.id_table.get_or_init(|| {
            IdTable::read(self.mapper.as_ref(), self.superblock.id_table, self.superblock.id_count)
        }) {
            Ok(table) => Ok(table),
            Err(_) => Err(SquashfsError::SizeMismatch("id table failed to initialize")),
        }
    }

    fn export_table(&self) -> Result<&ExportTable, SquashfsError> {
        if !self.superblock.has_export_table() {
            return Err(SquashfsError::NoExportTable);
        }
        match self.export_table.get_or_init(|| {
            ExportTable::read(self.mapper.as_ref(), self.superblock.export_table, self.superblock.inode_count)
        }) {
            Ok(table) => Ok(table),
            Err(_) => Err(SquashfsError::NoExportTable),
        }
    }

    fn fragment_table(&self) -> Result<&FragmentTable, SquashfsError> {
        if !self.superblock.has_fragments() {
            return Err(SquashfsError::NoFragmentTable);
        }
        match self.fragment_table.get_or_init(|| {
            FragmentTable::read(self.mapper.as_ref(), self.superblock.frag_table, self.superblock.frag_count)
        }) {
            Ok(table) => Ok(table),
            Err(_) => Err(SquashfsError::NoFragmentTable),
        }
    }

    fn xattr_table(&self) -> Result<&XattrTable, SquashfsError> {
        if !self.superblock.has_xattrs() {
            return Err(SquashfsError::NoXattrTable);
        }
        match self.xattr_table.get_or_init(|| XattrTable::read(self.mapper.as_ref(), self.superblock.xattr_table)) {
            Ok(table) => Ok(table),
            Err(_) => Err(SquashfsError::NoXattrTable),
        }
    }
}

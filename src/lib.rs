//! Read-only decoder for [SquashFS](https://en.wikipedia.org/wiki/SquashFS)
//! 4.0 archives: mounting, traversing the directory tree, and extracting
//! inode metadata, file contents, and extended attributes.
//!
//! This crate only reads; it has no writer or archive-creation path.
//!
//! ```rust,no_run
//! # use squashfs_core::{Squashfs, Source};
//! let archive = Squashfs::open(Source::Path("image.squashfs".into())).unwrap();
//! let root = archive.root_inode().unwrap();
//! let mut dir = archive.read_dir(&root).unwrap();
//! while let Some(entry) = dir.next() {
//!     let entry = entry.unwrap();
//!     println!("{}", String::from_utf8_lossy(&entry.name));
//! }
//! ```
//!
//! # Features
#![cfg_attr(feature = "document-features", doc = document_features::document_features!())]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod compressor;
mod dir;
mod directory;
mod error;
mod export;
mod file;
mod fragment;
mod id;
mod inode;
mod mapper;
mod metadata;
mod path;
mod squashfs;
mod superblock;
mod table;
mod xattr;

pub use crate::compressor::{
    CompressionAction, CompressionOptions, Compressor, DefaultCompressor, Gzip, Lz4, Lzo, Xz, XzFilter, Zstd,
};
pub use crate::dir::{DirEntryInfo, DirReader};
pub use crate::directory::DirectoryIndex;
pub use crate::error::SquashfsError;
pub use crate::export::Export;
pub use crate::file::FileReader;
pub use crate::fragment::Fragment;
pub use crate::id::Id;
pub use crate::inode::{
    device_major_minor, BasicDeviceSpecialFile, BasicDirectory, BasicFile, BasicIpc, BasicSymlink, DataSize,
    ExtendedDeviceSpecialFile, ExtendedDirectory, ExtendedFile, ExtendedIpc, ExtendedSymlink, Inode, InodeId,
    InodeType,
};
pub use crate::mapper::{BlockCache, CachedMapper, Cursor, FileMapper, Mapper, MemoryMapper, Source};
pub use crate::metadata::{join_ref, split_ref};
pub use crate::squashfs::Squashfs;
pub use crate::superblock::{Flags, SuperBlock, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
pub use crate::xattr::{XattrEntry, XattrIterator, XattrPrefix};

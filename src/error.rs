//! Errors

use std::io;

use thiserror::Error;

use crate::compressor::Compressor;

/// Errors produced while parsing or traversing a SquashFS archive.
///
/// Variants are grouped loosely along the taxonomy used throughout the
/// design notes: format errors (the bytes are not a valid archive),
/// integrity errors (the bytes are internally inconsistent), absence errors
/// (a requested table or record does not exist), and resource/operation
/// errors (I/O failure, or a call that doesn't apply to the inode at hand).
#[derive(Error, Debug)]
pub enum SquashfsError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("deku error: {0:?}")]
    Deku(#[from] deku::DekuError),

    #[error("string error: {0:?}")]
    StrUtf8(#[from] std::str::Utf8Error),

    // -- format --
    #[error("wrong magic: expected 0x73717368")]
    WrongMagic,

    #[error("archive version {0}.{1} is not supported, only 4.0")]
    UnsupportedVersion(u16, u16),

    #[error("block size {block_size} does not match block_log {block_log}")]
    BlockSizeMismatch { block_size: u32, block_log: u16 },

    #[error("metablock declares {0} bytes of payload, exceeding the 8192 byte limit")]
    MetablockTooBig(usize),

    #[error("unknown inode type {0}")]
    UnknownInodeType(u16),

    #[error("unsupported compression: {0:?}, enable the matching cargo feature")]
    UnsupportedCompression(Compressor),

    #[error("corrupted or invalid squashfs image")]
    CorruptedOrInvalid,

    // -- integrity --
    #[error("integer overflow computing an offset")]
    IntegerOverflow,

    #[error("seek position {pos} is out of range for a {size} byte file")]
    SeekOutOfRange { pos: u64, size: u64 },

    #[error("size mismatch: {0}")]
    SizeMismatch(&'static str),

    // -- absence --
    #[error("no such file or directory")]
    NoSuchFile,

    #[error("path component is not a directory")]
    NotADirectory,

    #[error("operation requires a file inode")]
    NotAFile,

    #[error("inode has no fragment")]
    NoFragment,

    #[error("archive has no fragment table")]
    NoFragmentTable,

    #[error("archive has no export table")]
    NoExportTable,

    #[error("archive has no xattr table")]
    NoXattrTable,

    #[error("archive has no compression options")]
    NoCompressionOptions,

    // -- resource / operation --
    #[error("mapper read of [{offset}, {offset}+{len}) failed: the range is outside the archive")]
    MapFailed { offset: u64, len: u64 },

    #[error("source backend is not supported by this build: {0}")]
    UnsupportedSource(&'static str),

    #[error("decompression failed")]
    DecompressFailed,

    #[error("invalid file path in the squashfs image")]
    InvalidFilePath,
}

impl From<SquashfsError> for io::Error {
    fn from(value: SquashfsError) -> Self {
        use SquashfsError::*;
        match value {
            Io(io) => io,
            NoSuchFile => Self::new(io::ErrorKind::NotFound, value),
            UnsupportedCompression(_) | UnsupportedSource(_) => {
                Self::new(io::ErrorKind::Unsupported, value)
            }
            SeekOutOfRange { .. } => Self::new(io::ErrorKind::InvalidInput, value),
            _ => Self::new(io::ErrorKind::InvalidData, value),
        }
    }
}

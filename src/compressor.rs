//! Compression dispatch
//!
//! A single uniform entry point, [`CompressionAction::decompress`], turns the
//! on-disk bytes of a metablock or datablock into their plaintext. Which
//! codec runs is selected by the [`Compressor`] id stored in the superblock;
//! the per-codec option records ([`CompressionOptions`]) are parsed from the
//! optional options metablock that immediately follows the superblock when
//! `Flags::COMPRESSOR_OPTIONS` is set, but this read-only decoder does not
//! need to interpret most of their fields to decompress correctly — they
//! exist for the record and for tools that want to display them.

use std::io::Read;

use deku::prelude::*;
#[cfg(feature = "gzip")]
use flate2::read::ZlibDecoder;
#[cfg(feature = "xz")]
use liblzma::read::XzDecoder;
use tracing::trace;

use crate::error::SquashfsError;

#[derive(Copy, Clone, Debug, PartialEq, Eq, DekuRead, DekuWrite, Default, Hash)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
#[deku(id_type = "u16")]
#[rustfmt::skip]
pub enum Compressor {
    None = 0,
    Gzip = 1,
    Lzma = 2,
    Lzo =  3,
    #[default]
    Xz =   4,
    Lz4 =  5,
    Zstd = 6,
}

/// Per-codec compression options, found in the optional metablock directly
/// after the superblock when `Flags::COMPRESSOR_OPTIONS` is set.
#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian, compressor: Compressor")]
#[deku(id = "compressor")]
pub enum CompressionOptions {
    #[deku(id = "Compressor::Gzip")]
    Gzip(Gzip),

    #[deku(id = "Compressor::Lzo")]
    Lzo(Lzo),

    #[deku(id = "Compressor::Xz")]
    Xz(Xz),

    #[deku(id = "Compressor::Lz4")]
    Lz4(Lz4),

    #[deku(id = "Compressor::Zstd")]
    Zstd(Zstd),

    #[deku(id = "Compressor::Lzma")]
    Lzma,
}

#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct Gzip {
    pub compression_level: u32,
    pub window_size: u16,
    pub strategies: u16,
}

#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct Lzo {
    pub algorithm: u32,
    pub compression_level: u32,
}

#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct Xz {
    pub dictionary_size: u32,
    pub filters: XzFilter,
    // Present in images produced by some vendor toolchains (OpenWrt); the
    // kernel decoder ignores them, and so do we.
    #[deku(cond = "!deku::reader.end()")]
    pub bit_opts: Option<u16>,
    #[deku(cond = "!deku::reader.end()")]
    pub fb: Option<u16>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct XzFilter(pub u32);

impl XzFilter {
    pub fn x86(&self) -> bool {
        self.0 & 0x0001 == 0x0001
    }

    pub fn powerpc(&self) -> bool {
        self.0 & 0x0002 == 0x0002
    }

    pub fn ia64(&self) -> bool {
        self.0 & 0x0004 == 0x0004
    }

    pub fn arm(&self) -> bool {
        self.0 & 0x0008 == 0x0008
    }

    pub fn armthumb(&self) -> bool {
        self.0 & 0x0010 == 0x0010
    }

    pub fn sparc(&self) -> bool {
        self.0 & 0x0020 == 0x0020
    }
}

#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct Lz4 {
    pub version: u32,
    pub flags: u32,
}

#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct Zstd {
    pub compression_level: u32,
}

/// Abstraction over the decompress-one-block operation.
///
/// Supplied so that an archive built with a vendor-specific codec under the
/// same numeric compressor id can be read by plugging in a different
/// implementation; most callers just want [`DefaultCompressor`].
pub trait CompressionAction {
    /// Decompress `bytes` (the on-disk payload of one metablock or
    /// datablock) into `out`, appending to whatever `out` already contains.
    fn decompress(&self, bytes: &[u8], out: &mut Vec<u8>, compressor: Compressor) -> Result<(), SquashfsError>;
}

/// The codec table used by `squashfs-tools` and the Linux kernel.
#[derive(Copy, Clone, Default)]
pub struct DefaultCompressor;

impl CompressionAction for DefaultCompressor {
    fn decompress(&self, bytes: &[u8], out: &mut Vec<u8>, compressor: Compressor) -> Result<(), SquashfsError> {
        match compressor {
            Compressor::None => out.extend_from_slice(bytes),
            #[cfg(feature = "gzip")]
            Compressor::Gzip => {
                let mut decoder = ZlibDecoder::new(bytes);
                decoder.read_to_end(out).map_err(|_| SquashfsError::DecompressFailed)?;
            }
            #[cfg(feature = "xz")]
            Compressor::Xz => {
                let mut decoder = XzDecoder::new(bytes);
                decoder.read_to_end(out).map_err(|_| SquashfsError::DecompressFailed)?;
            }
            #[cfg(feature = "lzo")]
            Compressor::Lzo => {
                let start = out.len();
                out.resize(out.capacity().max(start + 1), 0);
                let (decompressed, error) = rust_lzo::LZOContext::decompress_to_slice(bytes, &mut out[start..]);
                let out_size = decompressed.len();
                out.truncate(start + out_size);
                if error != rust_lzo::LZOError::OK {
                    return Err(SquashfsError::DecompressFailed);
                }
            }
            #[cfg(feature = "zstd")]
            Compressor::Zstd => {
                let mut decoder = zstd::bulk::Decompressor::new().map_err(|_| SquashfsError::DecompressFailed)?;
                decoder
                    .decompress_to_buffer(bytes, out)
                    .map_err(|_| SquashfsError::DecompressFailed)?;
            }
            #[cfg(feature = "lz4")]
            Compressor::Lz4 => {
                let start = out.len();
                out.resize(out.capacity().max(start + 1), 0u8);
                let out_size =
                    lz4_flex::decompress_into(bytes, &mut out[start..]).map_err(|_| SquashfsError::DecompressFailed)?;
                out.truncate(start + out_size);
            }
            #[allow(unreachable_patterns)]
            _ => return Err(SquashfsError::UnsupportedCompression(compressor)),
        }
        Ok(())
    }
}

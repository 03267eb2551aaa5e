//! Metablock reader and metablock stream
//!
//! A metablock is the unit of random access into every metadata section
//! (inode table, directory table, fragment/export/xattr tables): a 2-byte
//! header followed by at most 8192 bytes of payload, independently
//! compressed. [`read_block`] decodes one; [`MetablockStream`] stitches a
//! chain of them into the logical byte buffer the rest of the crate reads
//! structured records out of.

use std::io;

use deku::prelude::*;
use tracing::trace;

use crate::compressor::{CompressionAction, Compressor};
use crate::error::SquashfsError;
use crate::mapper::Mapper;

/// Maximum decompressed size of one metablock's payload.
pub const METADATA_MAXSIZE: usize = 0x2000;

/// Set in the on-disk header when the payload is stored uncompressed.
const METADATA_UNCOMPRESSED: u16 = 1 << 15;

/// Check the is-compressed bit of a raw metablock header.
pub fn is_compressed(len: u16) -> bool {
    len & METADATA_UNCOMPRESSED == 0
}

/// Strip the is-compressed bit, yielding the on-disk payload length.
pub fn payload_len(len: u16) -> u16 {
    len & !METADATA_UNCOMPRESSED
}

/// Read one metablock at `offset`: parse its header, then decompress (or
/// copy, if the uncompressed flag is set) its payload.
///
/// Returns the decompressed bytes and the total on-disk size of the
/// metablock (`2 + declared payload length`), so callers can advance their
/// outer offset.
pub fn read_block(
    mapper: &dyn Mapper,
    offset: u64,
    compression: &dyn CompressionAction,
    compressor: Compressor,
) -> Result<(Vec<u8>, u64), SquashfsError> {
    let header_bytes = mapper.map(offset, 2)?;
    let mut reader = Reader::new(&mut header_bytes.as_slice());
    let raw_len = u16::from_reader_with_ctx(&mut reader, deku::ctx::Endian::Little)?;

    let len = payload_len(raw_len) as usize;
    if len > METADATA_MAXSIZE {
        return Err(SquashfsError::MetablockTooBig(len));
    }

    let payload = mapper.map(offset + 2, len as u64)?;
    let bytes = if is_compressed(raw_len) {
        trace!("metablock at {offset:#x}: {len} compressed bytes");
        let mut out = Vec::with_capacity(METADATA_MAXSIZE);
        compression.decompress(&payload, &mut out, compressor)?;
        if out.len() > METADATA_MAXSIZE {
            return Err(SquashfsError::MetablockTooBig(out.len()));
        }
        out
    } else {
        trace!("metablock at {offset:#x}: {len} uncompressed bytes");
        payload
    };

    Ok((bytes, 2 + len as u64))
}

/// Decompose a 64-bit metablock/inode reference into `(outer_offset,
/// inner_offset)`.
pub fn split_ref(reference: u64) -> (u64, u16) {
    (reference >> 16, (reference & 0xffff) as u16)
}

/// Reassemble a metablock/inode reference from its two components.
pub fn join_ref(outer_offset: u64, inner_offset: u16) -> u64 {
    (outer_offset << 16) | inner_offset as u64
}

/// Logical byte stream formed by concatenating consecutive metablocks'
/// decompressed payloads, rooted at a section's base outer offset.
///
/// `ensure(n)` pulls additional metablocks until at least `n` bytes are
/// available past the current inner offset; bytes already read during the
/// current seek's lifetime are never discarded, so repeated `ensure` calls
/// for a growing `n` are cheap.
pub struct MetablockStream<'a> {
    mapper: &'a dyn Mapper,
    compression: &'a dyn CompressionAction,
    compressor: Compressor,
    /// Absolute offset of the next metablock to pull.
    next_outer: u64,
    /// Decompressed bytes accumulated so far, starting at the seek's inner
    /// offset (i.e. already trimmed).
    buf: Vec<u8>,
    /// Read cursor into `buf`.
    pos: usize,
}

impl<'a> MetablockStream<'a> {
    pub fn new(mapper: &'a dyn Mapper, compression: &'a dyn CompressionAction, compressor: Compressor) -> Self {
        Self { mapper, compression, compressor, next_outer: 0, buf: Vec::new(), pos: 0 }
    }

    /// Reset the stream to begin at metablock `base + outer_delta`, skipping
    /// `inner_offset` bytes of its decompressed payload.
    pub fn seek(&mut self, base: u64, outer_delta: u64, inner_offset: u16) -> Result<(), SquashfsError> {
        self.next_outer = base.checked_add(outer_delta).ok_or(SquashfsError::IntegerOverflow)?;
        self.buf.clear();
        self.pos = 0;
        if inner_offset > 0 {
            self.ensure(inner_offset as usize)?;
            self.buf.drain(0..inner_offset as usize);
        }
        Ok(())
    }

    /// Same as [`Self::seek`], but decomposes a packed metablock reference.
    pub fn seek_ref(&mut self, base: u64, reference: u64) -> Result<(), SquashfsError> {
        let (outer, inner) = split_ref(reference);
        self.seek(base, outer, inner)
    }

    /// Pull additional metablocks until at least `n` bytes are available.
    pub fn ensure(&mut self, n: usize) -> Result<(), SquashfsError> {
        while self.data_size() < n {
            let (bytes, on_disk_size) = read_block(self.mapper, self.next_outer, self.compression, self.compressor)?;
            self.next_outer = self.next_outer.checked_add(on_disk_size).ok_or(SquashfsError::IntegerOverflow)?;
            self.buf.extend_from_slice(&bytes);
        }
        Ok(())
    }

    /// The bytes currently available, starting at the stream's read cursor.
    pub fn data(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    /// Number of bytes currently available past the read cursor.
    pub fn data_size(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Advance the read cursor by `n` bytes (must already be available via
    /// `ensure`).
    pub fn consume(&mut self, n: usize) {
        self.pos += n;
    }

    /// `ensure(n)` then return and consume the next `n` bytes as an owned
    /// buffer.
    pub fn take(&mut self, n: usize) -> Result<Vec<u8>, SquashfsError> {
        self.ensure(n)?;
        let bytes = self.buf[self.pos..self.pos + n].to_vec();
        self.consume(n);
        Ok(bytes)
    }

    /// The absolute outer offset of the next metablock that would be pulled.
    pub fn next_outer_offset(&self) -> u64 {
        self.next_outer
    }
}

/// Lets a [`MetablockStream`] be handed directly to `deku::Reader`, which
/// pulls bytes as needed rather than requiring a single contiguous slice
/// up front. A read of 0 means the section's metablocks have run out.
impl io::Read for MetablockStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.data_size() == 0 && self.ensure(1).is_err() {
            return Ok(0);
        }
        let n = buf.len().min(self.data_size());
        buf[..n].copy_from_slice(&self.data()[..n]);
        self.consume(n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compressor::DefaultCompressor;
    use crate::mapper::MemoryMapper;

    fn uncompressed_metablock(payload: &[u8]) -> Vec<u8> {
        let mut block = Vec::new();
        let len = (payload.len() as u16) | METADATA_UNCOMPRESSED;
        block.extend_from_slice(&len.to_le_bytes());
        block.extend_from_slice(payload);
        block
    }

    #[test]
    fn reads_single_uncompressed_block() {
        let mut image = uncompressed_metablock(b"hello world");
        image.extend_from_slice(&[0; 16]);
        let mapper = MemoryMapper::new(image);
        let (bytes, size) = read_block(&mapper, 0, &DefaultCompressor, Compressor::None).unwrap();
        assert_eq!(bytes, b"hello world");
        assert_eq!(size, 2 + 11);
    }

    #[test]
    fn rejects_oversized_payload() {
        let mut image = Vec::new();
        let bad_len: u16 = 8193 | METADATA_UNCOMPRESSED;
        image.extend_from_slice(&bad_len.to_le_bytes());
        image.extend_from_slice(&vec![0u8; 8193]);
        let mapper = MemoryMapper::new(image);
        let err = read_block(&mapper, 0, &DefaultCompressor, Compressor::None).unwrap_err();
        assert!(matches!(err, SquashfsError::MetablockTooBig(_)));
    }

    #[test]
    fn stream_spans_multiple_blocks() {
        let mut image = Vec::new();
        image.extend(uncompressed_metablock(b"0123456789"));
        image.extend(uncompressed_metablock(b"abcdefghij"));
        let mapper = MemoryMapper::new(image);
        let mut stream = MetablockStream::new(&mapper, &DefaultCompressor, Compressor::None);
        stream.seek(0, 0, 0).unwrap();
        let bytes = stream.take(15).unwrap();
        assert_eq!(bytes, b"0123456789abcde");
    }

    #[test]
    fn seek_with_inner_offset_skips_bytes() {
        let image = uncompressed_metablock(b"0123456789");
        let mapper = MemoryMapper::new(image);
        let mut stream = MetablockStream::new(&mapper, &DefaultCompressor, Compressor::None);
        stream.seek(0, 0, 3).unwrap();
        assert_eq!(stream.take(4).unwrap(), b"3456");
    }

    #[test]
    fn split_and_join_ref_round_trip() {
        let reference = join_ref(0x1234_5678, 0xbeef);
        assert_eq!(split_ref(reference), (0x1234_5678, 0xbeef));
    }
}

//! Compression hook for packet bodies.
//!
//! The engine does not pick a compression algorithm. Callers register a
//! [`Compressor`] and a [`Decompressor`]; any `Fn(&[u8]) -> io::Result<Vec<u8>>`
//! closure satisfies either trait.

use std::io;

/// Bodies longer than this are compressed when a compressor is registered
pub const DEFAULT_COMPRESS_THRESHOLD: usize = 100;

/// Compresses outbound packet bodies
pub trait Compressor: Send + Sync {
    /// Compress a serialized body
    fn compress(&self, input: &[u8]) -> io::Result<Vec<u8>>;
}

/// Restores inbound packet bodies flagged as compressed
pub trait Decompressor: Send + Sync {
    /// Decompress a body received with the zip flag set
    fn decompress(&self, input: &[u8]) -> io::Result<Vec<u8>>;
}

impl<F> Compressor for F
where
    F: Fn(&[u8]) -> io::Result<Vec<u8>> + Send + Sync,
{
    fn compress(&self, input: &[u8]) -> io::Result<Vec<u8>> {
        self(input)
    }
}

impl<F> Decompressor for F
where
    F: Fn(&[u8]) -> io::Result<Vec<u8>> + Send + Sync,
{
    fn decompress(&self, input: &[u8]) -> io::Result<Vec<u8>> {
        self(input)
    }
}

//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Incomplete header or packet (need more data)
    #[error("incomplete packet")]
    Incomplete,

    /// Declared packet length is shorter than the fixed header
    #[error("packet length {0} shorter than header")]
    Length(u16),

    /// Body does not fit in a single packet
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Unknown operation byte
    #[error("unknown operation {0}")]
    Operation(u8),

    /// Zip flag other than 0 or 1
    #[error("invalid zip flag {0}")]
    ZipFlag(u8),

    /// Compressor failed
    #[error("compress failed: {0}")]
    Compress(#[source] std::io::Error),

    /// Decompressor failed
    #[error("decompress failed: {0}")]
    Decompress(#[source] std::io::Error),

    /// Compressed packet arrived but no decompressor is registered
    #[error("compressed packet but no decompressor registered")]
    MissingDecompressor,
}

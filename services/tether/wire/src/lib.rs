//! Packet framing, fixed headers, compression hooks, and body encoding for tether.
//!
//! This crate provides the wire protocol spoken by tether channels: a
//! length-prefixed envelope with a fixed 12-byte header, an optional
//! compression step for large bodies, and the default CBOR body codec.
//!
//! ## Features
//!
//! - **Fixed Header**: 12-byte big-endian header, protocol version 1
//! - **Zero-Copy I/O**: Uses `Bytes`/`BytesMut` for minimal allocations
//! - **Compression Hook**: Pluggable compressor applied above a size threshold
//! - **CBOR Bodies**: `ciborium` encoding with empty-body defaults
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | u16 total_length     | header (12) + body length  |
//! +----------------------+----------------------------+
//! | u8 operation         | 1 = heartbeat, 4 = message |
//! +----------------------+----------------------------+
//! | u8 zip               | 1 if body is compressed    |
//! +----------------------+----------------------------+
//! | u32 unique_id        | correlation id             |
//! +----------------------+----------------------------+
//! | u32 message_id       | message type id            |
//! +----------------------+----------------------------+
//! | body                 | variable (0..65523B)       |
//! +----------------------+----------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod compress;
pub mod error;
pub mod frame;
pub mod header;

// Re-export main types
pub use codec::{decode_body, encode_body, CodecError};
pub use compress::{Compressor, Decompressor, DEFAULT_COMPRESS_THRESHOLD};
pub use error::WireError;
pub use frame::{open_body, Packet, PacketDecoder, PacketEncoder};
pub use header::{
    Operation, PacketHeader, MAX_BODY_SIZE, MAX_PACKET_SIZE, PACKET_HEADER_SIZE, PROTOCOL_VERSION,
};

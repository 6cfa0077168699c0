//! Packet framing for the wire protocol.
//!
//! [`PacketEncoder`] appends header plus body to an outbound buffer and applies
//! the compression policy. [`PacketDecoder`] splits complete packets off a byte
//! stream; channels reassemble with their own fixed buffer and reuse
//! [`open_body`] for the decompression step.

use crate::compress::{Compressor, Decompressor, DEFAULT_COMPRESS_THRESHOLD};
use crate::header::{Operation, PacketHeader, PACKET_HEADER_SIZE};
use crate::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// One framed unit: header plus (decompressed) body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Header as received; `compressed` reflects the wire flag
    pub header: PacketHeader,
    /// Body bytes after decompression
    pub body: Bytes,
}

/// Encodes packets and applies the compression threshold
#[derive(Clone)]
pub struct PacketEncoder {
    compressor: Option<Arc<dyn Compressor>>,
    compress_threshold: usize,
}

impl PacketEncoder {
    /// Create an encoder that never compresses
    pub fn new() -> Self {
        Self {
            compressor: None,
            compress_threshold: DEFAULT_COMPRESS_THRESHOLD,
        }
    }

    /// Compress bodies longer than `threshold` bytes with `compressor`
    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>, threshold: usize) -> Self {
        self.compressor = Some(compressor);
        self.compress_threshold = threshold;
        self
    }

    /// Append a framed packet for `body` to `dst`, returning the header written
    pub fn encode(
        &self,
        operation: Operation,
        unique_id: u32,
        message_id: u32,
        body: &[u8],
        dst: &mut BytesMut,
    ) -> Result<PacketHeader, WireError> {
        let compressed = match &self.compressor {
            Some(compressor) if body.len() > self.compress_threshold => Some(
                compressor
                    .compress(body)
                    .map_err(WireError::Compress)?,
            ),
            _ => None,
        };

        let payload = compressed.as_deref().unwrap_or(body);
        let mut header = PacketHeader::new(operation, unique_id, message_id, payload.len())?;
        header.compressed = compressed.is_some();

        dst.reserve(PACKET_HEADER_SIZE + payload.len());
        header.encode(dst);
        dst.put_slice(payload);

        trace!(
            "Encoded packet message_id={} unique_id={} body={}B compressed={}",
            message_id,
            unique_id,
            payload.len(),
            header.compressed
        );
        Ok(header)
    }
}

impl Default for PacketEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PacketEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketEncoder")
            .field("compressor", &self.compressor.is_some())
            .field("compress_threshold", &self.compress_threshold)
            .finish()
    }
}

/// Restore a body according to its header's zip flag
pub fn open_body(
    header: &PacketHeader,
    body: Bytes,
    decompressor: Option<&dyn Decompressor>,
) -> Result<Bytes, WireError> {
    if !header.compressed {
        return Ok(body);
    }

    let decompressor = decompressor.ok_or(WireError::MissingDecompressor)?;
    decompressor
        .decompress(&body)
        .map(Bytes::from)
        .map_err(WireError::Decompress)
}

/// Streaming packet decoder
#[derive(Default)]
pub struct PacketDecoder {
    decompressor: Option<Arc<dyn Decompressor>>,
}

impl PacketDecoder {
    /// Create a decoder without a decompressor
    pub fn new() -> Self {
        Self { decompressor: None }
    }

    /// Decompress flagged bodies with `decompressor`
    pub fn with_decompressor(mut self, decompressor: Arc<dyn Decompressor>) -> Self {
        self.decompressor = Some(decompressor);
        self
    }

    /// Decode one packet from the buffer, or `None` if more bytes are needed
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Packet>, WireError> {
        if buf.len() < PACKET_HEADER_SIZE {
            return Ok(None);
        }

        let header = PacketHeader::decode(&mut &buf[..PACKET_HEADER_SIZE])?;
        let total = header.packet_length as usize;
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }

        let mut packet = buf.split_to(total);
        packet.advance(PACKET_HEADER_SIZE);
        let body = open_body(&header, packet.freeze(), self.decompressor.as_deref())?;

        Ok(Some(Packet { header, body }))
    }
}

impl fmt::Debug for PacketDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketDecoder")
            .field("decompressor", &self.decompressor.is_some())
            .finish()
    }
}

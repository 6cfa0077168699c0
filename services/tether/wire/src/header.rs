//! Fixed packet header for the wire protocol.
//!
//! Every packet starts with a 12-byte big-endian header carrying the total
//! packet length, the operation tag, the zip flag, the correlation id, and
//! the message type id.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

/// Wire protocol version (fixed 12-byte header variant)
pub const PROTOCOL_VERSION: u8 = 1;

/// Packet header size in bytes
pub const PACKET_HEADER_SIZE: usize = 12;

/// Largest packet the u16 length prefix can describe
pub const MAX_PACKET_SIZE: usize = u16::MAX as usize;

/// Largest body that fits in one packet
pub const MAX_BODY_SIZE: usize = MAX_PACKET_SIZE - PACKET_HEADER_SIZE;

/// Operation tag carried in every header
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Keep-alive frame
    Heartbeat = 0x01,
    /// Request, response, or notification
    Message = 0x04,
}

impl TryFrom<u8> for Operation {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Operation::Heartbeat),
            0x04 => Ok(Operation::Message),
            _ => Err(crate::WireError::Operation(value)),
        }
    }
}

/// Packet header (12 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    /// Header plus body length
    pub packet_length: u16,
    /// Operation tag
    pub operation: Operation,
    /// Body is compressed
    pub compressed: bool,
    /// Correlation id linking a response to its request
    pub unique_id: u32,
    /// Message type id
    pub message_id: u32,
}

impl PacketHeader {
    /// Create a header for a body of `body_len` bytes
    pub fn new(
        operation: Operation,
        unique_id: u32,
        message_id: u32,
        body_len: usize,
    ) -> Result<Self, crate::WireError> {
        if body_len > MAX_BODY_SIZE {
            return Err(crate::WireError::Size(body_len));
        }

        Ok(Self {
            packet_length: (PACKET_HEADER_SIZE + body_len) as u16,
            operation,
            compressed: false,
            unique_id,
            message_id,
        })
    }

    /// Length of the fixed header
    pub fn header_length(&self) -> usize {
        PACKET_HEADER_SIZE
    }

    /// Length of the body that follows the header
    pub fn body_length(&self) -> usize {
        (self.packet_length as usize).saturating_sub(PACKET_HEADER_SIZE)
    }

    /// Encode the header to bytes (big-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(PACKET_HEADER_SIZE);
        buf.put_u16(self.packet_length);
        buf.put_u8(self.operation as u8);
        buf.put_u8(self.compressed as u8);
        buf.put_u32(self.unique_id);
        buf.put_u32(self.message_id);
    }

    /// Decode the header from bytes (big-endian)
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, crate::WireError> {
        if buf.remaining() < PACKET_HEADER_SIZE {
            return Err(crate::WireError::Incomplete);
        }

        let packet_length = buf.get_u16();
        if (packet_length as usize) < PACKET_HEADER_SIZE {
            return Err(crate::WireError::Length(packet_length));
        }

        let operation = Operation::try_from(buf.get_u8())?;
        let compressed = match buf.get_u8() {
            0 => false,
            1 => true,
            other => return Err(crate::WireError::ZipFlag(other)),
        };
        let unique_id = buf.get_u32();
        let message_id = buf.get_u32();

        Ok(Self {
            packet_length,
            operation,
            compressed,
            unique_id,
            message_id,
        })
    }
}

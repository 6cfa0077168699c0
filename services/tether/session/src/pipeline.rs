//! Send and receive state for the channel pipeline.

use crate::message::MessageObject;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use tether_wire::{
    Operation, PacketEncoder, PacketHeader, WireError, MAX_BODY_SIZE, PACKET_HEADER_SIZE,
};
use thiserror::Error;

/// Outbound message could not be framed
#[derive(Error, Debug)]
pub(crate) enum SerializeError {
    #[error("message {message_id} body: {source}")]
    Body {
        message_id: u32,
        source: tether_wire::CodecError,
    },
    #[error("message {message_id} framing: {source}")]
    Frame { message_id: u32, source: WireError },
}

/// Serialize `message` and append its packet to `dst`
pub(crate) fn serialize_message(
    encoder: &PacketEncoder,
    message: &MessageObject,
    scratch: &mut Vec<u8>,
    dst: &mut BytesMut,
) -> Result<PacketHeader, SerializeError> {
    let message_id = message.message_id();
    scratch.clear();
    message
        .encode_body(scratch)
        .map_err(|source| SerializeError::Body { message_id, source })?;

    let operation = if message.is_heartbeat() {
        Operation::Heartbeat
    } else {
        Operation::Message
    };
    encoder
        .encode(operation, message.unique_id(), message_id, scratch, dst)
        .map_err(|source| SerializeError::Frame { message_id, source })
}

/// Outbound FIFO queue plus the reusable write buffer
#[derive(Debug)]
pub(crate) struct SendState {
    queue: Mutex<VecDeque<MessageObject>>,
    buffer: Mutex<BytesMut>,
    writing: AtomicBool,
}

impl SendState {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            buffer: Mutex::new(BytesMut::with_capacity(capacity)),
            writing: AtomicBool::new(false),
        }
    }

    pub(crate) fn push(&self, message: MessageObject) {
        self.queue.lock().push_back(message);
    }

    pub(crate) fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Claim the writer; false while a previous flush is still in flight
    pub(crate) fn begin_flush(&self) -> bool {
        self.writing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn end_flush(&self) {
        self.writing.store(false, Ordering::Release);
    }

    pub(crate) fn is_flushing(&self) -> bool {
        self.writing.load(Ordering::Acquire)
    }

    pub(crate) fn drain(&self) -> Vec<MessageObject> {
        self.queue.lock().drain(..).collect()
    }

    pub(crate) fn take_buffer(&self) -> BytesMut {
        mem::take(&mut *self.buffer.lock())
    }

    /// Hand the flushed buffer back for reuse
    pub(crate) fn restore_buffer(&self, mut buffer: BytesMut) {
        buffer.clear();
        *self.buffer.lock() = buffer;
    }

    /// Drop queued messages and release the writer
    pub(crate) fn clear(&self) {
        self.queue.lock().clear();
        self.buffer.lock().clear();
        self.end_flush();
    }
}

/// Inbound reassembly: header, then body, repeat
#[derive(Debug)]
pub(crate) struct ReceiveState {
    buffer: Box<[u8]>,
    filled: usize,
    target: usize,
    header: Option<PacketHeader>,
}

impl ReceiveState {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0u8; capacity.max(PACKET_HEADER_SIZE)].into_boxed_slice(),
            filled: 0,
            target: PACKET_HEADER_SIZE,
            header: None,
        }
    }

    /// Space for the next read; never extends past the current expectation
    pub(crate) fn unfilled(&mut self) -> &mut [u8] {
        &mut self.buffer[self.filled..self.target]
    }

    pub(crate) fn expecting_header(&self) -> bool {
        self.header.is_none()
    }

    /// Record `n` freshly read bytes; yields a packet once a body completes
    pub(crate) fn advance(&mut self, n: usize) -> Result<Option<(PacketHeader, Bytes)>, WireError> {
        self.filled += n;
        if self.filled < self.target {
            return Ok(None);
        }

        match self.header.take() {
            None => {
                let header = PacketHeader::decode(&mut &self.buffer[..PACKET_HEADER_SIZE])?;
                let body_len = header.body_length();
                if body_len > MAX_BODY_SIZE || body_len > self.buffer.len() {
                    return Err(WireError::Size(body_len));
                }

                self.filled = 0;
                if body_len == 0 {
                    self.target = PACKET_HEADER_SIZE;
                    return Ok(Some((header, Bytes::new())));
                }
                self.target = body_len;
                self.header = Some(header);
                Ok(None)
            }
            Some(header) => {
                let body = Bytes::copy_from_slice(&self.buffer[..self.target]);
                self.filled = 0;
                self.target = PACKET_HEADER_SIZE;
                Ok(Some((header, body)))
            }
        }
    }
}

//! Error types for channels, RPC calls, and the message registry.

use std::fmt;
use std::time::Duration;
use tether_wire::{CodecError, WireError};
use thiserror::Error;

/// Error categories surfaced through [`ChannelEvent::Error`](crate::ChannelEvent)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Address could not be parsed or resolved
    AddressResolution = 1,
    /// Connect, send, or receive failed in the transport
    Transport = 2,
    /// Outbound message could not be serialized
    Serialize = 3,
    /// Inbound header was malformed
    DeserializeHeader = 4,
    /// Inbound body could not be decompressed or decoded
    DeserializeBody = 5,
    /// Heartbeat miss threshold exceeded
    MissedHeartbeat = 6,
    /// RPC call timed out
    RpcTimeout = 7,
    /// Operation attempted on a disposed channel
    Disposed = 8,
}

impl ErrorKind {
    /// Stable numeric code, also used as the close code for fatal errors
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Short lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::AddressResolution => "address resolution",
            ErrorKind::Transport => "transport",
            ErrorKind::Serialize => "serialize",
            ErrorKind::DeserializeHeader => "deserialize header",
            ErrorKind::DeserializeBody => "deserialize body",
            ErrorKind::MissedHeartbeat => "missed heartbeat",
            ErrorKind::RpcTimeout => "rpc timeout",
            ErrorKind::Disposed => "disposed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single RPC call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// No matching reply within the call's timeout
    #[error("rpc {unique_id} (message {message_id}) timed out after {timeout:?}")]
    Timeout {
        /// Correlation id of the call
        unique_id: u32,
        /// Message id of the request
        message_id: u32,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// Channel closed while the call was pending
    #[error("rpc {0} cancelled: channel closed")]
    Cancelled(u32),

    /// Reply arrived but is not the awaited type
    #[error("unexpected reply: expected message {expected}, got {actual}")]
    UnexpectedReply {
        /// Message id of the awaited type
        expected: u32,
        /// Message id that arrived
        actual: u32,
    },

    /// Table timeout below the minimum
    #[error("rpc timeout {0:?} below minimum of 3s")]
    TimeoutTooShort(Duration),
}

impl RpcError {
    /// Error category for event reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::Timeout { .. } => ErrorKind::RpcTimeout,
            RpcError::Cancelled(_) => ErrorKind::Disposed,
            RpcError::UnexpectedReply { .. } => ErrorKind::DeserializeBody,
            RpcError::TimeoutTooShort(_) => ErrorKind::RpcTimeout,
        }
    }
}

/// Message registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Two different types registered under one message id
    #[error("duplicate message id {id}: {existing} and {new}")]
    DuplicateId {
        /// Conflicting message id
        id: u32,
        /// Type already registered
        existing: &'static str,
        /// Type being registered
        new: &'static str,
    },

    /// No decoder for an inbound message id
    #[error("unknown message id {0}")]
    UnknownId(u32),

    /// Body codec failure
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Channel and manager errors
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Channel is not connected
    #[error("channel {0} is not connected")]
    NotConnected(String),

    /// Channel was shut down
    #[error("channel {0} is disposed")]
    Disposed(String),

    /// Address string could not be parsed
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Channel name is empty
    #[error("channel name must not be empty")]
    InvalidName,

    /// Channel name already registered
    #[error("channel {0} already exists")]
    DuplicateChannel(String),

    /// Configuration rejected
    #[error("invalid config: {0}")]
    Config(String),

    /// No tokio runtime to drive I/O
    #[error("no tokio runtime available")]
    NoRuntime,

    /// RPC call failed
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Framing failure
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Registry or body codec failure
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ChannelError {
    /// Error category for event reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChannelError::NotConnected(_) => ErrorKind::Transport,
            ChannelError::Disposed(_) => ErrorKind::Disposed,
            ChannelError::InvalidAddress(_) => ErrorKind::AddressResolution,
            ChannelError::InvalidName
            | ChannelError::DuplicateChannel(_)
            | ChannelError::Config(_)
            | ChannelError::NoRuntime => ErrorKind::Transport,
            ChannelError::Rpc(e) => e.kind(),
            ChannelError::Wire(_) => ErrorKind::DeserializeHeader,
            ChannelError::Registry(_) => ErrorKind::DeserializeBody,
        }
    }
}

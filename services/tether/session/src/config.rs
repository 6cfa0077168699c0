//! Channel configuration.

use crate::error::ChannelError;
use crate::message::{Message, MessageObject};
use crate::rpc::{RpcHooks, DEFAULT_RPC_TIMEOUT, MIN_RPC_TIMEOUT};
use crate::transport::{TcpTransport, Transport};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tether_wire::{Compressor, Decompressor, DEFAULT_COMPRESS_THRESHOLD, MAX_PACKET_SIZE};

/// Builds the heartbeat message sent each interval
pub type HeartbeatFactory = Arc<dyn Fn() -> MessageObject + Send + Sync>;

/// Default interval between heartbeats
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of missed heartbeats tolerated before closing
pub const DEFAULT_MISS_HEARTBEAT_COUNT_BY_CLOSE: u32 = 10;

/// Default receive buffer size
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 64 * 1024;

/// Configuration for one channel
#[derive(Clone)]
pub struct ChannelConfig {
    /// Default RPC timeout (at least 3s)
    pub rpc_timeout: Duration,
    /// Heartbeat interval; zero disables heartbeats
    pub heartbeat_interval: Duration,
    /// Close once more than this many heartbeats go unanswered
    pub miss_heartbeat_count_by_close: u32,
    /// Any inbound packet clears the miss counter
    pub reset_heartbeat_on_receive: bool,
    /// Send heartbeats (can be toggled at runtime)
    pub focus_heartbeat: bool,
    /// Compress bodies longer than this when a compressor is set
    pub compress_threshold: usize,
    /// Fixed inbound reassembly buffer size
    pub receive_buffer_size: usize,
    /// Connect capability
    pub transport: Arc<dyn Transport>,
    /// Outbound compression
    pub compressor: Option<Arc<dyn Compressor>>,
    /// Inbound decompression
    pub decompressor: Option<Arc<dyn Decompressor>>,
    /// Heartbeat message source; heartbeats are disabled without one
    pub heartbeat: Option<HeartbeatFactory>,
    /// RPC lifecycle observers
    pub rpc_hooks: Option<Arc<dyn RpcHooks>>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            miss_heartbeat_count_by_close: DEFAULT_MISS_HEARTBEAT_COUNT_BY_CLOSE,
            reset_heartbeat_on_receive: true,
            focus_heartbeat: true,
            compress_threshold: DEFAULT_COMPRESS_THRESHOLD,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            transport: Arc::new(TcpTransport),
            compressor: None,
            decompressor: None,
            heartbeat: None,
            rpc_hooks: None,
        }
    }
}

impl ChannelConfig {
    /// Use `transport` for connections
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Compress outbound bodies above `threshold` bytes
    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>, threshold: usize) -> Self {
        self.compressor = Some(compressor);
        self.compress_threshold = threshold;
        self
    }

    /// Decompress inbound bodies flagged as compressed
    pub fn with_decompressor(mut self, decompressor: Arc<dyn Decompressor>) -> Self {
        self.decompressor = Some(decompressor);
        self
    }

    /// Send `M::default()` as the heartbeat
    pub fn with_heartbeat<M: Message>(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat = Some(Arc::new(|| MessageObject::new(M::default())));
        self
    }

    /// Custom heartbeat factory
    pub fn with_heartbeat_factory(mut self, interval: Duration, factory: HeartbeatFactory) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat = Some(factory);
        self
    }

    /// Attach RPC hooks
    pub fn with_rpc_hooks(mut self, hooks: Arc<dyn RpcHooks>) -> Self {
        self.rpc_hooks = Some(hooks);
        self
    }

    /// Check limits before a channel is built
    pub fn validate(&self) -> Result<(), ChannelError> {
        if self.rpc_timeout < MIN_RPC_TIMEOUT {
            return Err(ChannelError::Config(format!(
                "rpc_timeout {:?} is below the {:?} minimum",
                self.rpc_timeout, MIN_RPC_TIMEOUT
            )));
        }
        if self.receive_buffer_size < MAX_PACKET_SIZE {
            return Err(ChannelError::Config(format!(
                "receive_buffer_size {} cannot hold a {} byte packet",
                self.receive_buffer_size, MAX_PACKET_SIZE
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("rpc_timeout", &self.rpc_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field(
                "miss_heartbeat_count_by_close",
                &self.miss_heartbeat_count_by_close,
            )
            .field("reset_heartbeat_on_receive", &self.reset_heartbeat_on_receive)
            .field("focus_heartbeat", &self.focus_heartbeat)
            .field("compress_threshold", &self.compress_threshold)
            .field("receive_buffer_size", &self.receive_buffer_size)
            .field("transport", &self.transport)
            .field("compressor", &self.compressor.is_some())
            .field("decompressor", &self.decompressor.is_some())
            .field("heartbeat", &self.heartbeat.is_some())
            .field("rpc_hooks", &self.rpc_hooks.is_some())
            .finish()
    }
}

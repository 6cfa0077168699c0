//! Client-side channels for tether: connection state machine, send/receive
//! pipeline, heartbeats, RPC correlation, and the channel manager.
//!
//! This crate turns the framing in `tether-wire` into long-lived named
//! channels. I/O runs on tokio tasks; message dispatch, heartbeats, and RPC
//! timeouts advance only when the host calls [`ChannelManager::update`] with
//! the real time elapsed since the previous call.
//!
//! ## Features
//!
//! - **Channels**: connect, send, call, close, with state reported as events
//! - **Pipeline**: FIFO outbound queue flushed once per tick, one write in flight
//! - **Heartbeats**: configurable interval and miss threshold
//! - **RPC**: requests correlated to replies by unique id, with timeouts
//! - **Transports**: TCP, in-memory duplex, WebSocket, and TLS (`tls` feature)
//!
//! ## Example
//!
//! ```rust,no_run
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//! use tether_session::{
//!     ChannelConfig, ChannelEvent, ChannelManager, Message, MessageKind, MessageRegistry,
//! };
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct Login {
//!     user: String,
//! }
//!
//! impl Message for Login {
//!     const MESSAGE_ID: u32 = 10;
//!     const KIND: MessageKind = MessageKind::Request;
//! }
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct LoginResult {
//!     code: i32,
//! }
//!
//! impl Message for LoginResult {
//!     const MESSAGE_ID: u32 = 11;
//!     const KIND: MessageKind = MessageKind::Response;
//!     fn error_code(&self) -> i32 {
//!         self.code
//!     }
//! }
//!
//! # async fn example() -> anyhow::Result<()> {
//! let registry = MessageRegistry::builder().register::<LoginResult>()?.build();
//! let manager = ChannelManager::new(registry)?;
//! let mut events = manager.subscribe();
//!
//! let game = manager.create_channel("game", ChannelConfig::default())?;
//! game.connect("127.0.0.1:7000", None)?;
//!
//! // Drive the channels from the host loop
//! let mut ticker = tokio::time::interval(Duration::from_millis(16));
//! loop {
//!     ticker.tick().await;
//!     manager.update(Duration::from_millis(16));
//!     if let Ok(ChannelEvent::Connected { .. }) = events.try_recv() {
//!         break;
//!     }
//! }
//!
//! let caller = game.clone();
//! let reply = tokio::spawn(async move {
//!     caller.call::<LoginResult>(Login { user: "ada".into() }).await
//! });
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod config;
pub mod error;
pub mod event;
mod keepalive;
pub mod manager;
pub mod message;
mod pipeline;
pub mod registry;
pub mod rpc;
pub mod transport;

// Re-export main types
pub use channel::{Channel, ChannelState, ChannelStats};
pub use config::{
    ChannelConfig, HeartbeatFactory, DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_MISS_HEARTBEAT_COUNT_BY_CLOSE, DEFAULT_RECEIVE_BUFFER_SIZE,
};
pub use error::{ChannelError, ErrorKind, RegistryError, RpcError};
pub use event::{ChannelEvent, CloseReason, UserData};
pub use manager::ChannelManager;
pub use message::{next_unique_id, AnyMessage, Message, MessageKind, MessageObject};
pub use registry::{Handler, MessageRegistry, MessageRegistryBuilder};
pub use rpc::{
    CallOptions, PendingReply, Reply, RpcHooks, RpcTable, DEFAULT_RPC_TIMEOUT, MIN_RPC_TIMEOUT,
};
pub use transport::{
    BoxedReader, BoxedWriter, Connection, DuplexTransport, Endpoint, Scheme, TcpTransport,
    Transport, WebSocketTransport,
};

// Re-export TLS functionality when available
#[cfg(feature = "tls")]
pub use transport::tls::{make_client_config, TlsTransport};

//! Channel state machine.
//!
//! A [`Channel`] is one logical connection to a remote peer. Connects, reads,
//! and writes run as tokio tasks; everything else happens in
//! [`Channel::update`], which the host calls at its own cadence:
//!
//! 1. flush the outbound queue (one write in flight at a time)
//! 2. heartbeat accounting
//! 3. dispatch inbound messages (RPC replies first, then handlers)
//! 4. RPC timeout sweep
//!
//! Every I/O task holds the closed flag of the link it was started for and
//! checks it before touching channel state, so a task that outlives its
//! connection can never mutate the next one.

use crate::config::ChannelConfig;
use crate::error::{ChannelError, ErrorKind};
use crate::event::{ChannelEvent, CloseReason, EventBus, UserData};
use crate::keepalive::{HeartbeatAction, HeartbeatState};
use crate::message::{Message, MessageObject};
use crate::pipeline::{serialize_message, ReceiveState, SendState};
use crate::registry::MessageRegistry;
use crate::rpc::{CallOptions, PendingReply, Reply, RpcTable};
use crate::transport::{BoxedReader, BoxedWriter, Endpoint};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_wire::{open_body, PacketEncoder, PacketHeader};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No connection
    Disconnected,
    /// Resolve and connect in flight
    Connecting,
    /// Serving traffic
    Connected,
    /// Close in progress
    Closing,
}

/// Snapshot of channel counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    /// Lifecycle state
    pub state: ChannelState,
    /// Packets written since connect
    pub sent_packets: u64,
    /// Packets received since connect
    pub received_packets: u64,
    /// Current heartbeat miss count
    pub miss_count: u32,
    /// Time since the last heartbeat interval elapsed
    pub heartbeat_elapsed: Duration,
    /// Outstanding RPC calls
    pub pending_calls: usize,
    /// Messages waiting for the next flush
    pub queued: usize,
}

#[derive(Debug, Default)]
struct LogFilter {
    send: HashSet<u32>,
    receive: HashSet<u32>,
}

/// One established connection
struct Link {
    closed: Arc<AtomicBool>,
    writer: Arc<tokio::sync::Mutex<BoxedWriter>>,
    reader: JoinHandle<()>,
    peer: SocketAddr,
}

struct ChannelInner {
    name: String,
    config: ChannelConfig,
    registry: Arc<MessageRegistry>,
    events: Arc<EventBus>,
    runtime: Handle,
    encoder: PacketEncoder,
    state: Mutex<ChannelState>,
    active: AtomicBool,
    disposed: AtomicBool,
    focus_heartbeat: AtomicBool,
    reset_heartbeat_on_receive: AtomicBool,
    epoch: AtomicU64,
    link: Mutex<Option<Link>>,
    send: SendState,
    inbound: Mutex<VecDeque<MessageObject>>,
    heartbeat: Mutex<HeartbeatState>,
    rpc: RpcTable,
    log_filter: RwLock<LogFilter>,
    sent_packets: AtomicU64,
    received_packets: AtomicU64,
}

/// Handle to a named channel; clones share the same connection
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    pub(crate) fn new(
        name: String,
        config: ChannelConfig,
        registry: Arc<MessageRegistry>,
        events: Arc<EventBus>,
        runtime: Handle,
    ) -> Result<Self, ChannelError> {
        config.validate()?;

        let rpc = RpcTable::new(config.rpc_timeout)?.with_hooks(config.rpc_hooks.clone());
        let mut encoder = PacketEncoder::new();
        if let Some(compressor) = &config.compressor {
            encoder = encoder.with_compressor(compressor.clone(), config.compress_threshold);
        }

        Ok(Self {
            inner: Arc::new(ChannelInner {
                send: SendState::new(config.receive_buffer_size),
                heartbeat: Mutex::new(HeartbeatState::new(config.heartbeat_interval)),
                focus_heartbeat: AtomicBool::new(config.focus_heartbeat),
                reset_heartbeat_on_receive: AtomicBool::new(config.reset_heartbeat_on_receive),
                name,
                registry,
                events,
                runtime,
                encoder,
                rpc,
                config,
                state: Mutex::new(ChannelState::Disconnected),
                active: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                link: Mutex::new(None),
                inbound: Mutex::new(VecDeque::new()),
                log_filter: RwLock::new(LogFilter::default()),
                sent_packets: AtomicU64::new(0),
                received_packets: AtomicU64::new(0),
            }),
        })
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Lifecycle state
    pub fn state(&self) -> ChannelState {
        *self.inner.state.lock()
    }

    /// Connected and serving traffic
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Shut down for good
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Remote address of the current connection
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.link.lock().as_ref().map(|link| link.peer)
    }

    /// Counter snapshot
    pub fn stats(&self) -> ChannelStats {
        let (miss_count, heartbeat_elapsed) = {
            let heartbeat = self.inner.heartbeat.lock();
            (heartbeat.miss_count(), heartbeat.elapsed())
        };
        ChannelStats {
            state: self.state(),
            sent_packets: self.inner.sent_packets.load(Ordering::Relaxed),
            received_packets: self.inner.received_packets.load(Ordering::Relaxed),
            miss_count,
            heartbeat_elapsed,
            pending_calls: self.inner.rpc.len(),
            queued: self.inner.send.queued(),
        }
    }

    /// Start connecting to `address`; the outcome arrives as an event
    ///
    /// An existing connection is closed first. A second connect while one is
    /// already in flight is ignored.
    pub fn connect(&self, address: &str, user_data: Option<UserData>) -> Result<(), ChannelError> {
        let inner = &self.inner;
        if self.is_disposed() {
            let err = ChannelError::Disposed(inner.name.clone());
            inner.emit_error(ErrorKind::Disposed, None, err.to_string());
            return Err(err);
        }

        let endpoint = match Endpoint::parse(address) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                inner.emit_error(ErrorKind::AddressResolution, None, err.to_string());
                return Err(err);
            }
        };

        if self.state() == ChannelState::Connected {
            inner.close(CloseReason::Normal, 0);
        }

        let epoch = {
            let mut state = inner.state.lock();
            if *state != ChannelState::Disconnected {
                warn!(channel = %inner.name, "Connect to {} ignored: channel is {:?}", endpoint, *state);
                return Ok(());
            }
            *state = ChannelState::Connecting;
            inner.epoch.fetch_add(1, Ordering::AcqRel) + 1
        };
        // Nothing queues or counts until the connection is published
        inner.reset_counters();

        info!(channel = %inner.name, "Connecting to {}", endpoint);
        let task = Arc::clone(inner);
        inner
            .runtime
            .spawn(async move { task.run_connect(endpoint, user_data, epoch).await });
        Ok(())
    }

    /// Close the connection; a no-op when already closed
    pub fn close(&self, reason: CloseReason, code: u16) {
        self.inner.close(reason, code);
    }

    /// Close and refuse further use
    pub fn shutdown(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner
            .close(CloseReason::Disposed, ErrorKind::Disposed.code());
        debug!(channel = %self.inner.name, "Channel disposed");
    }

    /// Queue a message for the next flush
    pub fn send(&self, message: impl Into<MessageObject>) -> Result<(), ChannelError> {
        self.inner.enqueue(message.into())
    }

    /// Register an RPC and queue the request; a pending call with the same id is reused
    pub fn begin_call(
        &self,
        request: MessageObject,
        options: CallOptions,
    ) -> Result<PendingReply, ChannelError> {
        let inner = &self.inner;
        inner.ensure_sendable()?;

        let unique_id = request.unique_id();
        let (pending, fresh) = inner.rpc.call(&request, options);
        if !fresh {
            return Ok(pending);
        }
        if let Err(err) = inner.enqueue(request) {
            inner.rpc.remove(unique_id);
            return Err(err);
        }
        Ok(pending)
    }

    /// Send a request and await its typed reply
    pub async fn call<R: Message>(
        &self,
        request: impl Into<MessageObject>,
    ) -> Result<Reply<R>, ChannelError> {
        self.call_with(request, CallOptions::default()).await
    }

    /// [`call`](Self::call) with per-call options
    pub async fn call_with<R: Message>(
        &self,
        request: impl Into<MessageObject>,
        options: CallOptions,
    ) -> Result<Reply<R>, ChannelError> {
        let pending = self.begin_call(request.into(), options)?;
        let message = pending.wait().await?;
        Ok(Reply::new(message)?)
    }

    /// Drive the channel by `delta` of real elapsed time
    pub fn update(&self, delta: Duration) {
        let inner = &self.inner;
        if !inner.active.load(Ordering::Acquire) {
            return;
        }
        inner.process_send();
        inner.process_heartbeat(delta);
        inner.process_received();
        inner.rpc.sweep(delta);
    }

    /// Change the heartbeat interval; zero disables heartbeats
    pub fn set_heartbeat_interval(&self, interval: Duration) {
        self.inner.heartbeat.lock().set_interval(interval);
    }

    /// Current heartbeat interval
    pub fn heartbeat_interval(&self) -> Duration {
        self.inner.heartbeat.lock().interval()
    }

    /// Pause or resume heartbeat sends; misses are still counted
    pub fn set_focus_heartbeat(&self, focus: bool) {
        self.inner.focus_heartbeat.store(focus, Ordering::Release);
    }

    /// Whether inbound packets clear the heartbeat miss count
    pub fn set_reset_heartbeat_on_receive(&self, reset: bool) {
        self.inner
            .reset_heartbeat_on_receive
            .store(reset, Ordering::Release);
    }

    /// Current reset-on-receive setting
    pub fn reset_heartbeat_on_receive(&self) -> bool {
        self.inner.reset_heartbeat_on_receive.load(Ordering::Acquire)
    }

    /// Suppress per-message debug logs for these message ids
    pub fn set_ignored_log_ids(
        &self,
        send: impl IntoIterator<Item = u32>,
        receive: impl IntoIterator<Item = u32>,
    ) {
        let mut filter = self.inner.log_filter.write();
        filter.send = send.into_iter().collect();
        filter.receive = receive.into_iter().collect();
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

impl ChannelInner {
    fn emit(&self, event: ChannelEvent) {
        self.events.publish(event);
    }

    fn emit_error(&self, kind: ErrorKind, transport: Option<io::ErrorKind>, message: String) {
        error!(channel = %self.name, "Channel error [{}]: {}", kind, message);
        self.emit(ChannelEvent::Error {
            channel: self.name.clone(),
            kind,
            transport,
            message,
        });
    }

    fn ensure_sendable(&self) -> Result<(), ChannelError> {
        if self.disposed.load(Ordering::Acquire) {
            let err = ChannelError::Disposed(self.name.clone());
            self.emit_error(ErrorKind::Disposed, None, err.to_string());
            return Err(err);
        }
        if !self.active.load(Ordering::Acquire) {
            let err = ChannelError::NotConnected(self.name.clone());
            self.emit_error(ErrorKind::Transport, None, err.to_string());
            return Err(err);
        }
        Ok(())
    }

    fn enqueue(&self, message: MessageObject) -> Result<(), ChannelError> {
        self.ensure_sendable()?;
        self.send.push(message);
        Ok(())
    }

    fn reset_counters(&self) {
        self.send.clear();
        self.inbound.lock().clear();
        self.heartbeat.lock().reset();
        self.sent_packets.store(0, Ordering::Relaxed);
        self.received_packets.store(0, Ordering::Relaxed);
    }

    async fn run_connect(
        self: Arc<Self>,
        endpoint: Endpoint,
        user_data: Option<UserData>,
        epoch: u64,
    ) {
        let addr = match endpoint.resolve().await {
            Ok(addr) => addr,
            Err(e) => {
                self.fail_connect(
                    epoch,
                    ErrorKind::AddressResolution,
                    Some(e.kind()),
                    format!("failed to resolve {}: {}", endpoint, e),
                );
                return;
            }
        };

        let connection = match self.config.transport.connect(&endpoint, addr).await {
            Ok(connection) => connection,
            Err(e) => {
                self.fail_connect(
                    epoch,
                    ErrorKind::Transport,
                    Some(e.kind()),
                    format!("failed to connect to {} ({}): {}", endpoint, addr, e),
                );
                return;
            }
        };

        let peer = connection.peer;
        {
            let mut state = self.state.lock();
            if *state != ChannelState::Connecting || self.epoch.load(Ordering::Acquire) != epoch {
                debug!(channel = %self.name, "Dropping stale connection to {}", peer);
                return;
            }

            let closed = Arc::new(AtomicBool::new(false));
            let reader = self.runtime.spawn(Arc::clone(&self).receive_loop(
                connection.reader,
                Arc::clone(&closed),
            ));
            *self.link.lock() = Some(Link {
                closed,
                writer: Arc::new(tokio::sync::Mutex::new(connection.writer)),
                reader,
                peer,
            });
            *state = ChannelState::Connected;
            self.active.store(true, Ordering::Release);

            // Published before the reader can report a close
            info!(channel = %self.name, "Connected to {}", peer);
            self.emit(ChannelEvent::Connected {
                channel: self.name.clone(),
                user_data,
            });
        }
    }

    fn fail_connect(
        &self,
        epoch: u64,
        kind: ErrorKind,
        transport: Option<io::ErrorKind>,
        message: String,
    ) {
        {
            let mut state = self.state.lock();
            if *state != ChannelState::Connecting || self.epoch.load(Ordering::Acquire) != epoch {
                return;
            }
            *state = ChannelState::Disconnected;
        }
        self.emit_error(kind, transport, message);
    }

    async fn receive_loop(self: Arc<Self>, mut reader: BoxedReader, closed: Arc<AtomicBool>) {
        let mut state = ReceiveState::new(self.config.receive_buffer_size);
        loop {
            let read = reader.read(state.unfilled()).await;
            if closed.load(Ordering::Acquire) {
                return;
            }

            let n = match read {
                Ok(0) => {
                    debug!(channel = %self.name, "Peer closed the connection");
                    self.close_link(&closed, CloseReason::RemoteClosed, ErrorKind::Transport.code());
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    self.emit_error(
                        ErrorKind::Transport,
                        Some(e.kind()),
                        format!("receive failed: {}", e),
                    );
                    self.close_link(&closed, CloseReason::TransportError, ErrorKind::Transport.code());
                    return;
                }
            };

            let (header, body) = match state.advance(n) {
                Ok(Some(packet)) => packet,
                Ok(None) => continue,
                Err(e) => {
                    self.emit_error(
                        ErrorKind::DeserializeHeader,
                        None,
                        format!("bad packet header: {}", e),
                    );
                    self.close_link(&closed, CloseReason::ProtocolError, ErrorKind::DeserializeHeader.code());
                    return;
                }
            };

            if let Err(message) = self.accept_packet(header, body) {
                self.emit_error(ErrorKind::DeserializeBody, None, message);
                self.close_link(&closed, CloseReason::ProtocolError, ErrorKind::DeserializeBody.code());
                return;
            }
        }
    }

    /// Decompress and decode one packet onto the inbound queue
    fn accept_packet(&self, header: PacketHeader, body: Bytes) -> Result<(), String> {
        let body = open_body(&header, body, self.config.decompressor.as_deref()).map_err(|e| {
            format!("message {} body: {}", header.message_id, e)
        })?;
        let message = self
            .registry
            .decode(header.message_id, header.unique_id, &body)
            .map_err(|e| format!("message {} decode: {}", header.message_id, e))?;

        if !self.log_filter.read().receive.contains(&header.message_id) {
            debug!(
                channel = %self.name,
                "Received {} unique_id={} ({}B{})",
                message.type_name(),
                header.unique_id,
                header.body_length(),
                if header.compressed { ", compressed" } else { "" }
            );
        }

        self.inbound.lock().push_back(message);
        self.received_packets.fetch_add(1, Ordering::Relaxed);
        if self.reset_heartbeat_on_receive.load(Ordering::Acquire) {
            self.heartbeat.lock().on_receive();
        }
        Ok(())
    }

    fn process_send(self: &Arc<Self>) {
        if !self.send.begin_flush() {
            return;
        }

        let link = self
            .link
            .lock()
            .as_ref()
            .map(|link| (Arc::clone(&link.writer), Arc::clone(&link.closed)));
        let Some((writer, closed)) = link else {
            self.send.end_flush();
            return;
        };

        let messages = self.send.drain();
        if messages.is_empty() {
            self.send.end_flush();
            return;
        }

        let mut buffer = self.send.take_buffer();
        let mut scratch = Vec::new();
        for message in &messages {
            if let Err(e) = serialize_message(&self.encoder, message, &mut scratch, &mut buffer) {
                self.send.restore_buffer(buffer);
                self.send.end_flush();
                self.emit_error(ErrorKind::Serialize, None, e.to_string());
                self.close(CloseReason::SerializeError, ErrorKind::Serialize.code());
                return;
            }
            if !self.log_filter.read().send.contains(&message.message_id()) {
                debug!(
                    channel = %self.name,
                    "Sending {} unique_id={}",
                    message.type_name(),
                    message.unique_id()
                );
            }
        }

        let count = messages.len() as u64;
        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            let result = {
                let mut writer = writer.lock().await;
                match writer.write_all(&buffer).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                }
            };
            if closed.load(Ordering::Acquire) {
                return;
            }

            match result {
                Ok(()) => {
                    inner.sent_packets.fetch_add(count, Ordering::Relaxed);
                    inner.send.restore_buffer(buffer);
                    inner.send.end_flush();
                }
                Err(e) => {
                    inner.send.end_flush();
                    inner.emit_error(ErrorKind::Transport, Some(e.kind()), format!("send failed: {}", e));
                    inner.close_link(&closed, CloseReason::TransportError, ErrorKind::Transport.code());
                }
            }
        });
    }

    fn process_heartbeat(&self, delta: Duration) {
        let Some(factory) = &self.config.heartbeat else {
            return;
        };
        let action = self
            .heartbeat
            .lock()
            .tick(delta, self.config.miss_heartbeat_count_by_close);

        match action {
            HeartbeatAction::Idle => {}
            HeartbeatAction::Close { miss_count } => {
                warn!(
                    channel = %self.name,
                    "Missed {} heartbeats, closing",
                    miss_count
                );
                self.close(CloseReason::MissedHeartbeat, ErrorKind::MissedHeartbeat.code());
            }
            HeartbeatAction::Send { prior_misses } => {
                if !self.focus_heartbeat.load(Ordering::Acquire) {
                    return;
                }
                let mut beat = factory();
                beat.mark_heartbeat();
                if self.enqueue(beat).is_ok() && prior_misses > 0 {
                    warn!(
                        channel = %self.name,
                        "Heartbeat sent with {} unanswered",
                        prior_misses
                    );
                    self.emit(ChannelEvent::MissedHeartbeat {
                        channel: self.name.clone(),
                        miss_count: prior_misses,
                    });
                }
            }
        }
    }

    fn process_received(&self) {
        loop {
            let next = self.inbound.lock().pop_front();
            let Some(message) = next else {
                break;
            };
            if let Err(message) = self.rpc.try_reply(message) {
                self.registry.dispatch(&self.name, &message);
            }
        }
    }

    /// Fence off a link's tasks and shut its writer down
    fn release_link(&self, link: Link) {
        link.closed.store(true, Ordering::Release);
        link.reader.abort();
        let writer = link.writer;
        self.runtime.spawn(async move {
            let mut writer = writer.lock().await;
            let _ = writer.shutdown().await;
        });
    }

    /// Close on behalf of an I/O task, unless its link is already gone
    fn close_link(&self, closed: &AtomicBool, reason: CloseReason, code: u16) {
        if closed.load(Ordering::Acquire) {
            return;
        }
        self.close(reason, code);
    }

    fn close(&self, reason: CloseReason, code: u16) {
        let was_connecting = {
            let mut state = self.state.lock();
            match *state {
                ChannelState::Disconnected | ChannelState::Closing => return,
                ChannelState::Connecting => {
                    self.epoch.fetch_add(1, Ordering::AcqRel);
                    *state = ChannelState::Disconnected;
                    true
                }
                ChannelState::Connected => {
                    *state = ChannelState::Closing;
                    false
                }
            }
        };
        if was_connecting {
            info!(channel = %self.name, "Connect cancelled: {}", reason);
            return;
        }

        self.active.store(false, Ordering::Release);
        self.epoch.fetch_add(1, Ordering::AcqRel);

        let link = self.link.lock().take();
        if let Some(link) = link {
            self.release_link(link);
        }

        self.reset_counters();
        let cancelled = self.rpc.cancel_all();
        *self.state.lock() = ChannelState::Disconnected;

        info!(
            channel = %self.name,
            "Closed: {} (code {}, {} pending calls cancelled)",
            reason,
            code,
            cancelled
        );
        self.emit(ChannelEvent::Closed {
            channel: self.name.clone(),
            reason,
            code,
        });
    }
}

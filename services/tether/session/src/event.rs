//! Channel events and their fan-out to subscribers.

use crate::error::ErrorKind;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Opaque value passed to `connect` and echoed back in the connected event
pub type UserData = Arc<dyn Any + Send + Sync>;

/// Why a channel closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed by the application
    Normal,
    /// Channel shut down or destroyed
    Disposed,
    /// Peer closed the connection (zero-byte read)
    RemoteClosed,
    /// Transport send or receive failed
    TransportError,
    /// Outbound serialization failed
    SerializeError,
    /// Inbound framing or decoding failed
    ProtocolError,
    /// Heartbeat miss threshold exceeded
    MissedHeartbeat,
    /// Application supplied reason
    Other(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Normal => f.write_str("normal"),
            CloseReason::Disposed => f.write_str("disposed"),
            CloseReason::RemoteClosed => f.write_str("remote closed"),
            CloseReason::TransportError => f.write_str("transport error"),
            CloseReason::SerializeError => f.write_str("serialize error"),
            CloseReason::ProtocolError => f.write_str("protocol error"),
            CloseReason::MissedHeartbeat => f.write_str("missed heartbeat"),
            CloseReason::Other(reason) => f.write_str(reason),
        }
    }
}

/// Events emitted by channels
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Connection established
    Connected {
        /// Channel name
        channel: String,
        /// Value passed to `connect`
        user_data: Option<UserData>,
    },
    /// Connection closed (emitted once per connection)
    Closed {
        /// Channel name
        channel: String,
        /// Close reason
        reason: CloseReason,
        /// Close code; 0 for a normal close, otherwise an [`ErrorKind`] code
        code: u16,
    },
    /// Heartbeat sent while earlier ones went unanswered
    MissedHeartbeat {
        /// Channel name
        channel: String,
        /// Misses counted before this heartbeat
        miss_count: u32,
    },
    /// Something went wrong
    Error {
        /// Channel name
        channel: String,
        /// Error category
        kind: ErrorKind,
        /// Underlying I/O error kind, for transport failures
        transport: Option<io::ErrorKind>,
        /// Human-readable description
        message: String,
    },
}

impl ChannelEvent {
    /// Name of the channel that emitted this event
    pub fn channel(&self) -> &str {
        match self {
            ChannelEvent::Connected { channel, .. }
            | ChannelEvent::Closed { channel, .. }
            | ChannelEvent::MissedHeartbeat { channel, .. }
            | ChannelEvent::Error { channel, .. } => channel,
        }
    }
}

/// Fans events out to every live subscriber
#[derive(Debug, Default)]
pub(crate) struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ChannelEvent>>>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<ChannelEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver to all subscribers, dropping those whose receiver is gone
    pub(crate) fn publish(&self, event: ChannelEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_to_all_subscribers() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(ChannelEvent::MissedHeartbeat {
            channel: "game".to_string(),
            miss_count: 2,
        });

        for rx in [&mut first, &mut second] {
            match rx.try_recv().unwrap() {
                ChannelEvent::MissedHeartbeat { channel, miss_count } => {
                    assert_eq!(channel, "game");
                    assert_eq!(miss_count, 2);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        let dropped = bus.subscribe();
        let mut kept = bus.subscribe();
        drop(dropped);

        bus.publish(ChannelEvent::Closed {
            channel: "chat".to_string(),
            reason: CloseReason::Normal,
            code: 0,
        });

        assert_eq!(bus.subscribers.lock().len(), 1);
        assert_eq!(kept.try_recv().unwrap().channel(), "chat");
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(CloseReason::MissedHeartbeat.to_string(), "missed heartbeat");
        assert_eq!(CloseReason::Other("kicked".into()).to_string(), "kicked");
    }
}

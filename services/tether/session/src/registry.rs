//! Message registry: message id to decoder and notification handlers.
//!
//! The registry is assembled once at startup with [`MessageRegistryBuilder`]
//! and then shared read-only by every channel through an `Arc`.

use crate::error::RegistryError;
use crate::message::{AnyMessage, Message, MessageKind, MessageObject};
use std::any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tether_wire::{decode_body, CodecError};
use tracing::{debug, error, trace, warn};

type DecodeFn = fn(&[u8]) -> Result<Box<dyn AnyMessage>, CodecError>;

/// Notification handler; errors are logged and do not stop dispatch
pub type Handler = Arc<dyn Fn(&MessageObject) -> anyhow::Result<()> + Send + Sync>;

fn decode_erased<M: Message>(body: &[u8]) -> Result<Box<dyn AnyMessage>, CodecError> {
    decode_body::<M>(body).map(|message| Box::new(message) as Box<dyn AnyMessage>)
}

#[derive(Clone, Copy)]
struct Descriptor {
    type_name: &'static str,
    kind: MessageKind,
    heartbeat: bool,
    decode: DecodeFn,
}

/// Immutable message id table shared by all channels
pub struct MessageRegistry {
    descriptors: HashMap<u32, Descriptor>,
    handlers: HashMap<u32, Vec<Handler>>,
}

impl MessageRegistry {
    /// Start building a registry
    pub fn builder() -> MessageRegistryBuilder {
        MessageRegistryBuilder::default()
    }

    /// A decoder is registered for `message_id`
    pub fn contains(&self, message_id: u32) -> bool {
        self.descriptors.contains_key(&message_id)
    }

    /// Number of registered message types
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// No message types registered
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Number of handlers registered for `message_id`
    pub fn handler_count(&self, message_id: u32) -> usize {
        self.handlers.get(&message_id).map_or(0, Vec::len)
    }

    /// Decode an inbound body into an envelope stamped with `unique_id`
    pub fn decode(
        &self,
        message_id: u32,
        unique_id: u32,
        body: &[u8],
    ) -> Result<MessageObject, RegistryError> {
        let descriptor = self
            .descriptors
            .get(&message_id)
            .ok_or(RegistryError::UnknownId(message_id))?;
        let payload = (descriptor.decode)(body)?;

        Ok(MessageObject::from_decoded(
            unique_id,
            message_id,
            descriptor.kind,
            descriptor.heartbeat,
            payload,
        ))
    }

    /// Run every handler registered for the message; returns how many ran cleanly
    pub fn dispatch(&self, channel: &str, message: &MessageObject) -> usize {
        let handlers = match self.handlers.get(&message.message_id()) {
            Some(handlers) if !handlers.is_empty() => handlers,
            _ => {
                if message.is_heartbeat() {
                    trace!(channel = %channel, "Heartbeat {} has no handler", message.message_id());
                } else {
                    warn!(
                        channel = %channel,
                        "No handler for message {} ({})",
                        message.message_id(),
                        message.type_name()
                    );
                }
                return 0;
            }
        };

        let mut ok = 0;
        for handler in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(message))) {
                Ok(Ok(())) => ok += 1,
                Ok(Err(e)) => error!(
                    channel = %channel,
                    "Handler for message {} failed: {:#}",
                    message.message_id(),
                    e
                ),
                Err(_) => error!(
                    channel = %channel,
                    "Handler for message {} panicked",
                    message.message_id()
                ),
            }
        }
        ok
    }
}

impl fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.descriptors.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("MessageRegistry")
            .field("message_ids", &ids)
            .field("handled", &self.handlers.len())
            .finish()
    }
}

/// Builder for [`MessageRegistry`]
#[derive(Default)]
pub struct MessageRegistryBuilder {
    descriptors: HashMap<u32, Descriptor>,
    handlers: HashMap<u32, Vec<Handler>>,
}

impl MessageRegistryBuilder {
    /// Register the decoder for `M`
    pub fn register<M: Message>(mut self) -> Result<Self, RegistryError> {
        self.insert::<M>()?;
        Ok(self)
    }

    /// Register `M` (if needed) and add a typed notification handler for it
    pub fn on<M, F>(mut self, handler: F) -> Result<Self, RegistryError>
    where
        M: Message,
        F: Fn(&M) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert::<M>()?;
        let erased: Handler = Arc::new(move |message: &MessageObject| {
            match message.downcast_ref::<M>() {
                Some(typed) => handler(typed),
                None => Err(anyhow::anyhow!(
                    "message {} is not a {}",
                    message.message_id(),
                    any::type_name::<M>()
                )),
            }
        });
        self.handlers.entry(M::MESSAGE_ID).or_default().push(erased);
        Ok(self)
    }

    /// Freeze into an immutable, shareable registry
    pub fn build(self) -> Arc<MessageRegistry> {
        debug!(
            "Message registry built with {} types and {} handled ids",
            self.descriptors.len(),
            self.handlers.len()
        );
        Arc::new(MessageRegistry {
            descriptors: self.descriptors,
            handlers: self.handlers,
        })
    }

    fn insert<M: Message>(&mut self) -> Result<(), RegistryError> {
        let type_name = any::type_name::<M>();
        if let Some(existing) = self.descriptors.get(&M::MESSAGE_ID) {
            if existing.type_name == type_name {
                return Ok(());
            }
            return Err(RegistryError::DuplicateId {
                id: M::MESSAGE_ID,
                existing: existing.type_name,
                new: type_name,
            });
        }

        self.descriptors.insert(
            M::MESSAGE_ID,
            Descriptor {
                type_name,
                kind: M::KIND,
                heartbeat: M::HEARTBEAT,
                decode: decode_erased::<M>,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct RoomJoined {
        room: u32,
    }

    impl Message for RoomJoined {
        const MESSAGE_ID: u32 = 500;
        const KIND: MessageKind = MessageKind::Notify;
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct RoomLeft {
        room: u32,
    }

    impl Message for RoomLeft {
        const MESSAGE_ID: u32 = 500;
        const KIND: MessageKind = MessageKind::Notify;
    }

    fn encoded(room: u32) -> Vec<u8> {
        let mut body = Vec::new();
        tether_wire::encode_body(&RoomJoined { room }, &mut body).unwrap();
        body
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let result = MessageRegistry::builder()
            .register::<RoomJoined>()
            .unwrap()
            .register::<RoomLeft>();
        assert!(matches!(
            result,
            Err(RegistryError::DuplicateId { id: 500, .. })
        ));
    }

    #[test]
    fn test_same_type_registers_once() {
        let registry = MessageRegistry::builder()
            .register::<RoomJoined>()
            .unwrap()
            .on::<RoomJoined, _>(|_| Ok(()))
            .unwrap()
            .build();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.handler_count(500), 1);
    }

    #[test]
    fn test_decode_stamps_unique_id() {
        let registry = MessageRegistry::builder()
            .register::<RoomJoined>()
            .unwrap()
            .build();

        let message = registry.decode(500, 77, &encoded(3)).unwrap();
        assert_eq!(message.unique_id(), 77);
        assert_eq!(message.kind(), MessageKind::Notify);
        assert_eq!(message.downcast_ref::<RoomJoined>(), Some(&RoomJoined { room: 3 }));

        let empty = registry.decode(500, 78, &[]).unwrap();
        assert_eq!(empty.downcast_ref::<RoomJoined>(), Some(&RoomJoined::default()));

        assert!(matches!(
            registry.decode(501, 1, &[]),
            Err(RegistryError::UnknownId(501))
        ));
    }

    #[test]
    fn test_dispatch_survives_failing_handlers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let registry = MessageRegistry::builder()
            .on::<RoomJoined, _>(|_| anyhow::bail!("boom"))
            .unwrap()
            .on::<RoomJoined, _>(|_| panic!("handler panic"))
            .unwrap()
            .on::<RoomJoined, _>(move |joined| {
                sink.lock().push(joined.room);
                Ok(())
            })
            .unwrap()
            .build();

        let first = registry.decode(500, 1, &encoded(1)).unwrap();
        let second = registry.decode(500, 2, &encoded(2)).unwrap();
        assert_eq!(registry.dispatch("test", &first), 1);
        assert_eq!(registry.dispatch("test", &second), 1);
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_dispatch_without_handler() {
        let registry = MessageRegistry::builder()
            .register::<RoomJoined>()
            .unwrap()
            .build();
        let message = registry.decode(500, 1, &encoded(9)).unwrap();
        assert_eq!(registry.dispatch("test", &message), 0);
    }
}

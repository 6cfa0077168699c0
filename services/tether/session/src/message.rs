//! Application message model.
//!
//! Concrete message types implement [`Message`]; channels move them around as
//! type-erased [`MessageObject`] envelopes that carry the correlation id, the
//! message id, and the kind marker alongside the payload.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{self, Any};
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tether_wire::{encode_body, CodecError};

/// Role of a message in the request/response protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Sent by the client, answered by a response with the same unique id
    Request,
    /// Reply to a request; may resolve a pending RPC
    Response,
    /// One-way message in either direction
    Notify,
}

/// A concrete message type with a fixed wire id
pub trait Message:
    Serialize + DeserializeOwned + Default + fmt::Debug + Send + Sync + 'static
{
    /// Wire message type id
    const MESSAGE_ID: u32;
    /// Request, response, or notify
    const KIND: MessageKind;
    /// Sent with the heartbeat operation tag
    const HEARTBEAT: bool = false;

    /// Application error code carried by a response; nonzero means failure
    fn error_code(&self) -> i32 {
        0
    }
}

/// Object-safe view of a [`Message`]
pub trait AnyMessage: Any + fmt::Debug + Send + Sync {
    /// Serialize the payload
    fn encode(&self, dst: &mut Vec<u8>) -> Result<(), CodecError>;
    /// See [`Message::error_code`]
    fn error_code(&self) -> i32;
    /// Concrete type name, for logs
    fn type_name(&self) -> &'static str;
    /// Borrow as `Any` for downcasting
    fn as_any(&self) -> &dyn Any;
    /// Mutably borrow as `Any`
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// Shared handle as `Any`
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<M: Message> AnyMessage for M {
    fn encode(&self, dst: &mut Vec<u8>) -> Result<(), CodecError> {
        encode_body(self, dst)
    }

    fn error_code(&self) -> i32 {
        Message::error_code(self)
    }

    fn type_name(&self) -> &'static str {
        any::type_name::<M>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Next process-local unique id; never 0
pub fn next_unique_id() -> u32 {
    static NEXT: AtomicU32 = AtomicU32::new(1);
    loop {
        let id = NEXT.fetch_add(1, Ordering::Relaxed);
        if id != 0 {
            return id;
        }
    }
}

/// Type-erased message envelope
#[derive(Debug)]
pub struct MessageObject {
    unique_id: u32,
    message_id: u32,
    kind: MessageKind,
    heartbeat: bool,
    body: Arc<dyn AnyMessage>,
}

impl MessageObject {
    /// Wrap a message, assigning a fresh unique id
    pub fn new<M: Message>(message: M) -> Self {
        Self {
            unique_id: next_unique_id(),
            message_id: M::MESSAGE_ID,
            kind: M::KIND,
            heartbeat: M::HEARTBEAT,
            body: Arc::new(message),
        }
    }

    pub(crate) fn from_decoded(
        unique_id: u32,
        message_id: u32,
        kind: MessageKind,
        heartbeat: bool,
        body: Box<dyn AnyMessage>,
    ) -> Self {
        Self {
            unique_id,
            message_id,
            kind,
            heartbeat,
            body: Arc::from(body),
        }
    }

    /// Replace the unique id (e.g. to answer a specific request)
    pub fn with_unique_id(mut self, unique_id: u32) -> Self {
        self.unique_id = unique_id;
        self
    }

    /// Correlation id
    pub fn unique_id(&self) -> u32 {
        self.unique_id
    }

    /// Set the correlation id
    pub fn set_unique_id(&mut self, unique_id: u32) {
        self.unique_id = unique_id;
    }

    /// Wire message type id
    pub fn message_id(&self) -> u32 {
        self.message_id
    }

    /// Kind marker
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Sent with the heartbeat operation tag
    pub fn is_heartbeat(&self) -> bool {
        self.heartbeat
    }

    pub(crate) fn mark_heartbeat(&mut self) {
        self.heartbeat = true;
    }

    /// Application error code of the payload
    pub fn error_code(&self) -> i32 {
        self.body.error_code()
    }

    /// Concrete payload type name
    pub fn type_name(&self) -> &'static str {
        self.body.type_name()
    }

    /// Payload is of type `M`
    pub fn is<M: Message>(&self) -> bool {
        self.body.as_any().is::<M>()
    }

    /// Borrow the payload as `M`
    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.body.as_any().downcast_ref::<M>()
    }

    /// Shared handle to the payload as `M`
    pub fn payload<M: Message>(&self) -> Option<Arc<M>> {
        Arc::clone(&self.body).into_any_arc().downcast::<M>().ok()
    }

    /// Take the payload as `M`, or get the envelope back
    ///
    /// Fails while a [`payload`](Self::payload) handle is still alive.
    pub fn into_inner<M: Message>(mut self) -> Result<M, Self> {
        let taken = Arc::get_mut(&mut self.body)
            .and_then(|body| body.as_any_mut().downcast_mut::<M>())
            .map(mem::take);
        match taken {
            Some(message) => Ok(message),
            None => Err(self),
        }
    }

    /// Serialize the payload
    pub fn encode_body(&self, dst: &mut Vec<u8>) -> Result<(), CodecError> {
        self.body.encode(dst)
    }
}

impl<M: Message> From<M> for MessageObject {
    fn from(message: M) -> Self {
        MessageObject::new(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct ChatSay {
        text: String,
    }

    impl Message for ChatSay {
        const MESSAGE_ID: u32 = 300;
        const KIND: MessageKind = MessageKind::Notify;
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct LoginResp {
        code: i32,
    }

    impl Message for LoginResp {
        const MESSAGE_ID: u32 = 11;
        const KIND: MessageKind = MessageKind::Response;

        fn error_code(&self) -> i32 {
            self.code
        }
    }

    #[test]
    fn test_unique_ids_increase() {
        let first = MessageObject::new(ChatSay::default());
        let second = MessageObject::new(ChatSay::default());
        assert!(second.unique_id() > first.unique_id());
        assert_ne!(first.unique_id(), 0);
    }

    #[test]
    fn test_envelope_metadata() {
        let message = MessageObject::from(LoginResp { code: 7 }).with_unique_id(99);
        assert_eq!(message.unique_id(), 99);
        assert_eq!(message.message_id(), 11);
        assert_eq!(message.kind(), MessageKind::Response);
        assert_eq!(message.error_code(), 7);
        assert!(!message.is_heartbeat());
        assert!(message.type_name().ends_with("LoginResp"));
    }

    #[test]
    fn test_downcast() {
        let say = ChatSay {
            text: "hi".to_string(),
        };
        let message = MessageObject::new(say.clone());
        assert!(message.is::<ChatSay>());
        assert!(message.downcast_ref::<LoginResp>().is_none());
        assert_eq!(message.downcast_ref::<ChatSay>(), Some(&say));

        let message = match message.into_inner::<LoginResp>() {
            Ok(_) => panic!("wrong type accepted"),
            Err(message) => message,
        };
        let shared = message.payload::<ChatSay>().unwrap();
        assert_eq!(*shared, say);
        assert!(message.payload::<LoginResp>().is_none());
        let message = message.into_inner::<ChatSay>().unwrap_err();
        drop(shared);
        assert_eq!(message.into_inner::<ChatSay>().unwrap(), say);
    }

    #[test]
    fn test_encode_body() {
        let message = MessageObject::new(ChatSay {
            text: "hello".to_string(),
        });
        let mut body = Vec::new();
        message.encode_body(&mut body).unwrap();

        let decoded: ChatSay = tether_wire::decode_body(&body).unwrap();
        assert_eq!(decoded.text, "hello");
    }
}

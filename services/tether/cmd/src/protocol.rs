//! Demo protocol spoken by `tether connect` and `tether serve`.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tether_session::{Message, MessageKind, MessageRegistry, RegistryError};
use tracing::info;

/// Keep-alive; the peer echoes it back unchanged
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Ping {}

impl Message for Ping {
    const MESSAGE_ID: u32 = 1;
    const KIND: MessageKind = MessageKind::Request;
    const HEARTBEAT: bool = true;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Echo {
    pub text: String,
}

impl Message for Echo {
    const MESSAGE_ID: u32 = 1001;
    const KIND: MessageKind = MessageKind::Request;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct EchoReply {
    pub code: i32,
    pub text: String,
}

impl Message for EchoReply {
    const MESSAGE_ID: u32 = 1002;
    const KIND: MessageKind = MessageKind::Response;

    fn error_code(&self) -> i32 {
        self.code
    }
}

/// Pushed by the peer right after accepting a connection
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Welcome {
    pub peer: String,
    pub motd: String,
}

impl Message for Welcome {
    const MESSAGE_ID: u32 = 2001;
    const KIND: MessageKind = MessageKind::Notify;
}

/// Rejected echo: empty text
pub const ECHO_EMPTY: i32 = 1;

/// Registry for the client side of the demo protocol
pub fn client_registry() -> Result<Arc<MessageRegistry>, RegistryError> {
    Ok(MessageRegistry::builder()
        .register::<Ping>()?
        .register::<EchoReply>()?
        .on::<Welcome, _>(|welcome| {
            info!("Welcome from {}: {}", welcome.peer, welcome.motd);
            Ok(())
        })?
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_registry() {
        let registry = client_registry().unwrap();
        assert!(registry.contains(Ping::MESSAGE_ID));
        assert!(registry.contains(EchoReply::MESSAGE_ID));
        assert_eq!(registry.handler_count(Welcome::MESSAGE_ID), 1);
        assert!(!registry.contains(Echo::MESSAGE_ID));
    }
}

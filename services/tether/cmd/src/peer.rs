//! Loopback echo peer for `tether serve`.
//!
//! Speaks the wire protocol directly: heartbeats are echoed back, echo
//! requests are answered with a reply carrying the request's unique id, and
//! every new connection gets a welcome notification.

use crate::protocol::{Echo, EchoReply, Welcome, ECHO_EMPTY};
use anyhow::{Context, Result};
use bytes::BytesMut;
use std::net::SocketAddr;
use tether_session::{next_unique_id, Message};
use tether_wire::{decode_body, encode_body, Operation, Packet, PacketDecoder, PacketEncoder};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Accept connections until the task is dropped
pub async fn serve(listener: TcpListener) -> Result<()> {
    let local = listener.local_addr()?;
    info!("Echo peer listening on {}", local);

    loop {
        let (stream, peer) = listener.accept().await.context("accept failed")?;
        tokio::spawn(async move {
            match handle_connection(stream, peer).await {
                Ok(()) => info!("Peer {} disconnected", peer),
                Err(e) => warn!("Peer {} dropped: {:#}", peer, e),
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, peer: SocketAddr) -> Result<()> {
    stream.set_nodelay(true)?;
    info!("Accepted connection from {}", peer);

    let encoder = PacketEncoder::new();
    let mut decoder = PacketDecoder::new();
    let mut inbound = BytesMut::with_capacity(64 * 1024);
    let mut outbound = BytesMut::new();

    let welcome = Welcome {
        peer: peer.to_string(),
        motd: "tether echo peer".to_string(),
    };
    write_message(&encoder, next_unique_id(), &welcome, &mut outbound)?;
    stream.write_all(&outbound).await?;
    outbound.clear();

    loop {
        if stream.read_buf(&mut inbound).await? == 0 {
            return Ok(());
        }

        while let Some(packet) = decoder.decode(&mut inbound)? {
            respond(&encoder, packet, &mut outbound)?;
        }
        if !outbound.is_empty() {
            stream.write_all(&outbound).await?;
            outbound.clear();
        }
    }
}

/// Append the response for `packet`, if any, to `dst`
fn respond(encoder: &PacketEncoder, packet: Packet, dst: &mut BytesMut) -> Result<()> {
    let header = packet.header;
    match (header.operation, header.message_id) {
        (Operation::Heartbeat, _) => {
            encoder.encode(
                Operation::Heartbeat,
                header.unique_id,
                header.message_id,
                &packet.body,
                dst,
            )?;
        }
        (Operation::Message, Echo::MESSAGE_ID) => {
            let echo: Echo = decode_body(&packet.body)?;
            debug!("Echo unique_id={} text={:?}", header.unique_id, echo.text);
            let reply = if echo.text.is_empty() {
                EchoReply {
                    code: ECHO_EMPTY,
                    text: String::new(),
                }
            } else {
                EchoReply {
                    code: 0,
                    text: echo.text,
                }
            };
            write_message(encoder, header.unique_id, &reply, dst)?;
        }
        (_, message_id) => {
            warn!("Ignoring message {} from client", message_id);
        }
    }
    Ok(())
}

fn write_message<M: Message>(
    encoder: &PacketEncoder,
    unique_id: u32,
    message: &M,
    dst: &mut BytesMut,
) -> Result<()> {
    let mut body = Vec::new();
    encode_body(message, &mut body)?;
    encoder.encode(Operation::Message, unique_id, M::MESSAGE_ID, &body, dst)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{client_registry, Ping};
    use std::sync::Arc;
    use std::time::Duration;
    use tether_session::{ChannelConfig, ChannelEvent, ChannelManager};
    use tokio::time::timeout;

    #[test]
    fn test_respond_to_echo() {
        let encoder = PacketEncoder::new();
        let mut request = BytesMut::new();
        write_message(
            &encoder,
            42,
            &Echo {
                text: "hi".to_string(),
            },
            &mut request,
        )
        .unwrap();
        let packet = PacketDecoder::new().decode(&mut request).unwrap().unwrap();

        let mut out = BytesMut::new();
        respond(&encoder, packet, &mut out).unwrap();
        let reply = PacketDecoder::new().decode(&mut out).unwrap().unwrap();
        assert_eq!(reply.header.unique_id, 42);
        assert_eq!(reply.header.message_id, EchoReply::MESSAGE_ID);
        let body: EchoReply = decode_body(&reply.body).unwrap();
        assert_eq!(body.text, "hi");
        assert_eq!(body.code, 0);
    }

    #[test]
    fn test_heartbeat_is_echoed() {
        let encoder = PacketEncoder::new();
        let mut beat = BytesMut::new();
        encoder
            .encode(Operation::Heartbeat, 7, Ping::MESSAGE_ID, &[], &mut beat)
            .unwrap();
        let packet = PacketDecoder::new().decode(&mut beat).unwrap().unwrap();

        let mut out = BytesMut::new();
        respond(&encoder, packet, &mut out).unwrap();
        let echoed = PacketDecoder::new().decode(&mut out).unwrap().unwrap();
        assert_eq!(echoed.header.operation, Operation::Heartbeat);
        assert_eq!(echoed.header.unique_id, 7);
    }

    #[tokio::test]
    async fn test_channel_round_trip_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener));

        let manager = Arc::new(ChannelManager::new(client_registry().unwrap()).unwrap());
        let mut events = manager.subscribe();
        let channel = manager
            .create_channel(
                "demo",
                ChannelConfig::default().with_heartbeat::<Ping>(Duration::from_secs(1)),
            )
            .unwrap();
        channel.connect(&addr.to_string(), None).unwrap();
        assert!(matches!(
            timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap(),
            ChannelEvent::Connected { .. }
        ));

        let ticker = manager.clone();
        let driver = tokio::spawn(async move {
            loop {
                ticker.update(Duration::from_millis(10));
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let reply = timeout(
            Duration::from_secs(5),
            channel.call::<EchoReply>(Echo {
                text: "over tcp".to_string(),
            }),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(reply.text, "over tcp");

        let rejected = channel
            .call::<EchoReply>(Echo::default())
            .await
            .unwrap();
        assert_eq!(rejected.code, ECHO_EMPTY);

        driver.abort();
        manager.shutdown();
    }
}

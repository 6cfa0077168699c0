//! Transports and address handling for channels.
//!
//! A channel owns one [`Transport`], chosen at construction. The transport
//! turns a resolved address into a pair of boxed read/write halves; framing,
//! heartbeats, and RPC stay in the channel. Plain TCP is the default. An
//! in-process duplex transport backs tests and loopback peers, WebSocket
//! carries one packet per binary message, and TLS is available behind the
//! `tls` feature.

use crate::error::ChannelError;
use async_trait::async_trait;
use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use tether_wire::{PacketHeader, PACKET_HEADER_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

/// Read half handed to the receive loop
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half used by the send pipeline
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An established connection split into halves
pub struct Connection {
    /// Inbound byte stream
    pub reader: BoxedReader,
    /// Outbound byte stream
    pub writer: BoxedWriter,
    /// Remote address
    pub peer: SocketAddr,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("peer", &self.peer).finish()
    }
}

/// Connect capability a channel is parameterized over
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Open a connection to `addr`, the resolved form of `endpoint`
    async fn connect(&self, endpoint: &Endpoint, addr: SocketAddr) -> io::Result<Connection>;
}

/// Address scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Raw byte stream (`host:port` or `tcp://`)
    Tcp,
    /// WebSocket (`ws://`)
    Ws,
    /// WebSocket over TLS (`wss://`)
    Wss,
}

impl Scheme {
    fn prefix(self) -> &'static str {
        match self {
            Scheme::Tcp => "tcp://",
            Scheme::Ws => "ws://",
            Scheme::Wss => "wss://",
        }
    }

    fn default_port(self) -> Option<u16> {
        match self {
            Scheme::Tcp => None,
            Scheme::Ws => Some(80),
            Scheme::Wss => Some(443),
        }
    }

    /// Message-oriented scheme
    pub fn is_websocket(self) -> bool {
        matches!(self, Scheme::Ws | Scheme::Wss)
    }
}

/// Host and port parsed from an address string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Address scheme
    pub scheme: Scheme,
    /// Hostname or literal IP (without brackets)
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Request path for WebSocket endpoints, `/` otherwise
    pub path: String,
}

impl Endpoint {
    /// Parse `host:port`, `tcp://host:port`, `[v6]:port`, or a `ws://` / `wss://` URL
    ///
    /// WebSocket URLs may omit the port (80 / 443) and carry a path.
    pub fn parse(address: &str) -> Result<Self, ChannelError> {
        let invalid = || ChannelError::InvalidAddress(address.to_string());
        let trimmed = address.trim();

        let (scheme, rest) = [Scheme::Wss, Scheme::Ws, Scheme::Tcp]
            .into_iter()
            .find_map(|scheme| trimmed.strip_prefix(scheme.prefix()).map(|rest| (scheme, rest)))
            .unwrap_or((Scheme::Tcp, trimmed));

        let (authority, path) = if scheme.is_websocket() {
            match rest.find('/') {
                Some(at) => (&rest[..at], rest[at..].to_string()),
                None => (rest, "/".to_string()),
            }
        } else {
            (rest.trim_end_matches('/'), "/".to_string())
        };

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, tail) = bracketed.split_once(']').ok_or_else(invalid)?;
            match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if tail.is_empty() => (host, None),
                None => return Err(invalid()),
            }
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        if host.is_empty() || (host.contains(':') && !authority.starts_with('[')) {
            return Err(invalid());
        }
        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
            None => scheme.default_port().ok_or_else(invalid)?,
        };

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            path,
        })
    }

    /// `host:port`, bracketing IPv6 literals
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Resolve to a socket address; literal IPs skip DNS, IPv4 results are preferred
    pub async fn resolve(&self) -> io::Result<SocketAddr> {
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }

        let addrs: Vec<SocketAddr> = lookup_host((self.host.as_str(), self.port))
            .await?
            .collect();
        debug!("Resolved {} to {:?}", self.host, addrs);

        addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no addresses found for {}", self.host),
                )
            })
    }

    fn require_stream(&self) -> io::Result<()> {
        if self.scheme.is_websocket() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} needs a WebSocket transport", self),
            ));
        }
        Ok(())
    }
}

impl FromStr for Endpoint {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scheme {
            Scheme::Tcp => f.write_str(&self.authority()),
            scheme => write!(f, "{}{}{}", scheme.prefix(), self.authority(), self.path),
        }
    }
}

/// Plain TCP with `TCP_NODELAY`
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, endpoint: &Endpoint, addr: SocketAddr) -> io::Result<Connection> {
        endpoint.require_stream()?;
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();

        Ok(Connection {
            reader: Box::new(reader),
            writer: Box::new(writer),
            peer,
        })
    }
}

/// In-process transport over `tokio::io::duplex`
///
/// Every connect creates a fresh pipe and hands the far end to the receiver
/// returned by [`DuplexTransport::new`]. Connects fail with
/// `ConnectionRefused` once that receiver is dropped.
#[derive(Debug, Clone)]
pub struct DuplexTransport {
    max_buf_size: usize,
    peers: mpsc::UnboundedSender<DuplexStream>,
}

impl DuplexTransport {
    /// Create the transport and the stream of accepted peer ends
    pub fn new(max_buf_size: usize) -> (Self, mpsc::UnboundedReceiver<DuplexStream>) {
        let (peers, accepted) = mpsc::unbounded_channel();
        (
            Self {
                max_buf_size,
                peers,
            },
            accepted,
        )
    }
}

#[async_trait]
impl Transport for DuplexTransport {
    async fn connect(&self, _endpoint: &Endpoint, addr: SocketAddr) -> io::Result<Connection> {
        let (local, remote) = tokio::io::duplex(self.max_buf_size);
        self.peers.send(remote).map_err(|_| {
            io::Error::new(io::ErrorKind::ConnectionRefused, "duplex peer is gone")
        })?;
        let (reader, writer) = tokio::io::split(local);

        Ok(Connection {
            reader: Box::new(reader),
            writer: Box::new(writer),
            peer: addr,
        })
    }
}

/// Pipe capacity between the channel and a WebSocket bridge
const WEBSOCKET_PIPE_SIZE: usize = 256 * 1024;

/// WebSocket client; each packet travels as one binary message
///
/// The socket is bridged onto a byte pipe so the channel reads and writes it
/// like any stream. `wss://` endpoints need [`WebSocketTransport::with_tls`].
#[derive(Clone, Default)]
pub struct WebSocketTransport {
    #[cfg(feature = "tls")]
    tls: Option<tokio_rustls::TlsConnector>,
}

impl WebSocketTransport {
    /// Plain `ws://` transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable `wss://` endpoints with this rustls client configuration
    #[cfg(feature = "tls")]
    pub fn with_tls(mut self, config: rustls::ClientConfig) -> Self {
        self.tls = Some(tokio_rustls::TlsConnector::from(std::sync::Arc::new(config)));
        self
    }

    #[cfg(feature = "tls")]
    async fn connect_secure(
        &self,
        endpoint: &Endpoint,
        tcp: TcpStream,
        peer: SocketAddr,
    ) -> io::Result<Connection> {
        use rustls::pki_types::ServerName;

        let Some(connector) = &self.tls else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} requires a TLS configuration", endpoint),
            ));
        };
        let server_name = ServerName::try_from(endpoint.host.clone()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid server name: {}", endpoint.host),
            )
        })?;
        let stream = connector.connect(server_name, tcp).await?;
        websocket_handshake(endpoint, stream, peer).await
    }

    #[cfg(not(feature = "tls"))]
    async fn connect_secure(
        &self,
        endpoint: &Endpoint,
        _tcp: TcpStream,
        _peer: SocketAddr,
    ) -> io::Result<Connection> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("{} requires the tls feature", endpoint),
        ))
    }
}

impl fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("WebSocketTransport");
        #[cfg(feature = "tls")]
        debug.field("tls", &self.tls.is_some());
        debug.finish()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, endpoint: &Endpoint, addr: SocketAddr) -> io::Result<Connection> {
        let tcp = TcpStream::connect(addr).await?;
        tcp.set_nodelay(true)?;
        let peer = tcp.peer_addr()?;

        match endpoint.scheme {
            Scheme::Wss => self.connect_secure(endpoint, tcp, peer).await,
            Scheme::Ws | Scheme::Tcp => websocket_handshake(endpoint, tcp, peer).await,
        }
    }
}

async fn websocket_handshake<S>(
    endpoint: &Endpoint,
    stream: S,
    peer: SocketAddr,
) -> io::Result<Connection>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let scheme = if endpoint.scheme == Scheme::Wss { "wss" } else { "ws" };
    let url = format!("{}://{}{}", scheme, endpoint.authority(), endpoint.path);
    debug!("WebSocket handshake with {} ({})", url, peer);

    let (socket, _response) = tokio_tungstenite::client_async(url, stream)
        .await
        .map_err(ws_to_io)?;
    Ok(bridge_websocket(socket, peer))
}

fn ws_to_io(err: tokio_tungstenite::tungstenite::Error) -> io::Error {
    use tokio_tungstenite::tungstenite::Error;
    match err {
        Error::Io(e) => e,
        Error::ConnectionClosed | Error::AlreadyClosed => {
            io::Error::new(io::ErrorKind::ConnectionAborted, "websocket closed")
        }
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}

/// Pump a WebSocket onto a duplex pipe: binary messages in, whole packets out
pub(crate) fn bridge_websocket<S>(socket: WebSocketStream<S>, peer: SocketAddr) -> Connection
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (local, remote) = tokio::io::duplex(WEBSOCKET_PIPE_SIZE);
    let (mut pipe_reader, mut pipe_writer) = tokio::io::split(remote);
    let (mut sink, mut stream) = socket.split();

    tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(WsMessage::Binary(data)) => {
                    if pipe_writer.write_all(&data).await.is_err() {
                        break;
                    }
                }
                Ok(WsMessage::Close(frame)) => {
                    debug!("WebSocket {} closed by peer: {:?}", peer, frame);
                    break;
                }
                Ok(WsMessage::Text(_)) => {
                    warn!("Ignoring text frame from {}", peer);
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("WebSocket {} read failed: {}", peer, e);
                    break;
                }
            }
        }
        let _ = pipe_writer.shutdown().await;
    });

    tokio::spawn(async move {
        let mut pending = BytesMut::with_capacity(WEBSOCKET_PIPE_SIZE);
        loop {
            match pipe_reader.read_buf(&mut pending).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }

            while pending.len() >= PACKET_HEADER_SIZE {
                let header = match PacketHeader::decode(&mut &pending[..PACKET_HEADER_SIZE]) {
                    Ok(header) => header,
                    Err(e) => {
                        warn!("Dropping WebSocket {}: outbound framing broken: {}", peer, e);
                        let _ = sink.close().await;
                        return;
                    }
                };
                let length = header.packet_length as usize;
                if pending.len() < length {
                    break;
                }
                let packet = pending.split_to(length);
                if let Err(e) = sink.send(WsMessage::binary(packet.to_vec())).await {
                    debug!("WebSocket {} write failed: {}", peer, e);
                    return;
                }
            }
        }
        let _ = sink.close().await;
    });

    let (reader, writer) = tokio::io::split(local);
    Connection {
        reader: Box::new(reader),
        writer: Box::new(writer),
        peer,
    }
}

// TLS-specific functionality
#[cfg(feature = "tls")]
/// TLS transport; encryption is delegated to rustls
pub mod tls {
    use super::*;
    use anyhow::{Context as AnyhowContext, Result};
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
    use rustls::{ClientConfig, RootCertStore};
    use std::sync::Arc;
    use tokio_rustls::TlsConnector;
    use tracing::info;

    /// TLS over TCP; the SNI name defaults to the endpoint host
    #[derive(Clone)]
    pub struct TlsTransport {
        connector: TlsConnector,
        server_name: Option<String>,
    }

    impl TlsTransport {
        /// Wrap a rustls client configuration
        pub fn new(config: ClientConfig) -> Self {
            Self {
                connector: TlsConnector::from(Arc::new(config)),
                server_name: None,
            }
        }

        /// Override the SNI name sent during the handshake
        pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
            self.server_name = Some(name.into());
            self
        }
    }

    impl fmt::Debug for TlsTransport {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("TlsTransport")
                .field("server_name", &self.server_name)
                .finish()
        }
    }

    #[async_trait]
    impl Transport for TlsTransport {
        async fn connect(&self, endpoint: &Endpoint, addr: SocketAddr) -> io::Result<Connection> {
            endpoint.require_stream()?;
            let tcp = TcpStream::connect(addr).await?;
            tcp.set_nodelay(true)?;
            let peer = tcp.peer_addr()?;

            let sni = self.server_name.as_deref().unwrap_or(&endpoint.host);
            let server_name = ServerName::try_from(sni.to_owned()).map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid server name: {}", sni),
                )
            })?;

            debug!("Connecting via TLS to {} (SNI: {})", peer, sni);
            let stream = self.connector.connect(server_name, tcp).await?;
            let (reader, writer) = tokio::io::split(stream);

            Ok(Connection {
                reader: Box::new(reader),
                writer: Box::new(writer),
                peer,
            })
        }
    }

    /// Build a client configuration trusting `ca_pem`, optionally with a client certificate
    pub fn make_client_config(
        ca_pem: &str,
        client_identity: Option<(&str, &str)>,
    ) -> Result<ClientConfig> {
        info!("Creating TLS client configuration");

        // Install default crypto provider if not already set
        let _ = rustls::crypto::ring::default_provider().install_default();

        let mut roots = RootCertStore::empty();
        let ca_results: Result<Vec<_>, _> = rustls_pemfile::certs(&mut ca_pem.as_bytes()).collect();
        for ca_cert in ca_results.context("Failed to parse CA certificates")? {
            roots
                .add(CertificateDer::from(ca_cert))
                .context("Failed to add CA certificate to root store")?;
        }

        let builder = ClientConfig::builder().with_root_certificates(roots);
        let config = match client_identity {
            Some((cert_chain_pem, private_key_pem)) => {
                let cert_results: Result<Vec<_>, _> =
                    rustls_pemfile::certs(&mut cert_chain_pem.as_bytes()).collect();
                let certs = cert_results.context("Failed to parse certificate chain")?;
                if certs.is_empty() {
                    anyhow::bail!("No certificates found in certificate chain");
                }

                let key_results: Result<Vec<_>, _> =
                    rustls_pemfile::pkcs8_private_keys(&mut private_key_pem.as_bytes()).collect();
                let mut keys = key_results.context("Failed to parse private key")?;
                if keys.is_empty() {
                    anyhow::bail!("No private key found");
                }

                builder
                    .with_client_auth_cert(certs, PrivateKeyDer::from(keys.remove(0)))
                    .context("Failed to configure client certificate")?
            }
            None => builder.with_no_client_auth(),
        };

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_endpoint_parse() {
        let plain = Endpoint::parse("127.0.0.1:9000").unwrap();
        assert_eq!(plain.host, "127.0.0.1");
        assert_eq!(plain.port, 9000);

        let scheme = Endpoint::parse("tcp://game.example.com:7001").unwrap();
        assert_eq!(scheme.host, "game.example.com");
        assert_eq!(scheme.port, 7001);

        let v6 = Endpoint::parse("[::1]:8080").unwrap();
        assert_eq!(v6.host, "::1");
        assert_eq!(v6.to_string(), "[::1]:8080");
        assert_eq!(v6.scheme, Scheme::Tcp);

        let ws = Endpoint::parse("ws://game.example.com:9001/realtime").unwrap();
        assert_eq!(ws.scheme, Scheme::Ws);
        assert_eq!(ws.port, 9001);
        assert_eq!(ws.path, "/realtime");
        assert_eq!(ws.to_string(), "ws://game.example.com:9001/realtime");

        let wss = Endpoint::parse("wss://[::1]").unwrap();
        assert_eq!(wss.scheme, Scheme::Wss);
        assert_eq!(wss.host, "::1");
        assert_eq!(wss.port, 443);
        assert_eq!(wss.path, "/");
        assert_eq!(Endpoint::parse("ws://localhost").unwrap().port, 80);

        for bad in [
            "",
            "localhost",
            ":80",
            "host:notaport",
            "::1:80",
            "[::1]80",
            "host:70000",
            "ws://",
            "wss://:443/path",
        ] {
            assert!(
                matches!(Endpoint::parse(bad), Err(ChannelError::InvalidAddress(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[tokio::test]
    async fn test_resolve_literal_and_localhost() {
        let literal = Endpoint::parse("10.1.2.3:99").unwrap().resolve().await.unwrap();
        assert_eq!(literal, SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)), 99));

        let local = Endpoint::parse("localhost:4000").unwrap().resolve().await.unwrap();
        assert!(local.ip().is_loopback());
        assert_eq!(local.port(), 4000);
    }

    #[tokio::test]
    async fn test_tcp_transport_connect() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let bound = listener.local_addr().unwrap();
        let endpoint = Endpoint::parse(&bound.to_string()).unwrap();

        let accept = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut connection = TcpTransport.connect(&endpoint, bound).await.unwrap();
        assert_eq!(connection.peer, bound);
        connection.writer.write_all(b"ping").await.unwrap();

        assert_eq!(&accept.await.unwrap(), b"ping");
    }

    #[tokio::test]
    async fn test_duplex_transport() {
        let (transport, mut accepted) = DuplexTransport::new(1024);
        let endpoint = Endpoint::parse("127.0.0.1:1").unwrap();
        let addr = endpoint.resolve().await.unwrap();

        let mut connection = transport.connect(&endpoint, addr).await.unwrap();
        let mut remote = accepted.recv().await.unwrap();

        remote.write_all(b"hey").await.unwrap();
        let mut buf = [0u8; 3];
        connection.reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hey");

        drop(accepted);
        assert_eq!(
            transport.connect(&endpoint, addr).await.unwrap_err().kind(),
            io::ErrorKind::ConnectionRefused
        );
    }

    #[tokio::test]
    async fn test_stream_transports_refuse_websocket_endpoints() {
        let endpoint = Endpoint::parse("ws://127.0.0.1:1/").unwrap();
        let addr = endpoint.resolve().await.unwrap();
        let err = TcpTransport.connect(&endpoint, addr).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    fn packet(unique_id: u32, body: &[u8]) -> Vec<u8> {
        let mut wire = BytesMut::new();
        tether_wire::PacketEncoder::new()
            .encode(tether_wire::Operation::Message, unique_id, 5, body, &mut wire)
            .unwrap();
        wire.to_vec()
    }

    #[tokio::test]
    async fn test_websocket_transport_one_packet_per_message() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let bound = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            let mut received = Vec::new();
            while received.len() < 2 {
                if let WsMessage::Binary(data) = ws.next().await.unwrap().unwrap() {
                    received.push(data.to_vec());
                }
            }
            ws.send(WsMessage::binary(packet(3, b"pong"))).await.unwrap();
            ws.close(None).await.unwrap();
            received
        });

        let endpoint = Endpoint::parse(&format!("ws://{}/tether", bound)).unwrap();
        let mut connection = WebSocketTransport::new()
            .connect(&endpoint, bound)
            .await
            .unwrap();
        assert_eq!(connection.peer, bound);

        // Two packets in one write still leave as two messages
        let mut batch = packet(1, b"first");
        batch.extend_from_slice(&packet(2, b""));
        connection.writer.write_all(&batch).await.unwrap();
        connection.writer.flush().await.unwrap();

        let expected = packet(3, b"pong");
        let mut inbound = vec![0u8; expected.len()];
        connection.reader.read_exact(&mut inbound).await.unwrap();
        assert_eq!(inbound, expected);

        // Server close surfaces as end of stream
        let mut rest = [0u8; 1];
        assert_eq!(connection.reader.read(&mut rest).await.unwrap(), 0);

        let received = server.await.unwrap();
        assert_eq!(received, vec![packet(1, b"first"), packet(2, b"")]);
    }

    #[tokio::test]
    async fn test_secure_websocket_needs_tls() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let bound = listener.local_addr().unwrap();
        let endpoint = Endpoint::parse(&format!("wss://{}/", bound)).unwrap();

        let err = WebSocketTransport::new()
            .connect(&endpoint, bound)
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            io::ErrorKind::InvalidInput | io::ErrorKind::Unsupported
        ));
    }
}

//! tether demo binary.
//!
//! `tether serve` runs a loopback echo peer. `tether connect` opens the
//! configured channels against it, issues echo calls, and drives every
//! channel from a fixed-cadence update loop.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tether_session::{
    CallOptions, Channel, ChannelEvent, ChannelManager, Endpoint, MessageObject, RpcHooks,
    Transport, WebSocketTransport,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;
mod peer;
mod protocol;

use config::{ClientConfig, TlsConfig};
use logging::TetherLogFormatter;
use protocol::{Echo, EchoReply, Ping};

/// Client-side channel engine demo
#[derive(Parser, Debug)]
#[command(name = "tether", version, about = "Framed channels with heartbeats and RPC")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Configuration file path
    #[arg(long, default_value = "tether.yaml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the loopback echo peer
    Serve {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:7000")]
        listen: SocketAddr,
    },
    /// Connect the configured channels and exchange echo calls
    Connect {
        /// Override the first channel's address
        #[arg(long)]
        address: Option<String>,

        /// Echo calls per channel
        #[arg(long, default_value_t = 5)]
        count: u32,

        /// Override the update cadence, e.g. 16ms
        #[arg(long)]
        tick: Option<humantime::Duration>,

        /// Keep running after the echo calls finish
        #[arg(long)]
        stay: bool,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("tether={}", args.log_level).parse()?)
        .add_directive(format!("tether_session={}", args.log_level).parse()?)
        .add_directive(format!("tether_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(true)
        .event_format(TetherLogFormatter::new("tether"))
        .init();

    info!("Starting tether v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Serve { listen } => run_serve(listen).await,
        Command::Connect {
            address,
            count,
            tick,
            stay,
        } => {
            let mut config = ClientConfig::load_from_file(&args.config)?;
            if let Some(address) = address {
                if let Some(first) = config.channels.first_mut() {
                    first.address = address;
                }
            }
            if let Some(tick) = tick {
                config.tick_interval = tick.into();
            }
            run_connect(config, count, stay).await
        }
    }
}

async fn run_serve(listen: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {}", listen))?;

    tokio::select! {
        result = peer::serve(listener) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            Ok(())
        }
    }
}

/// Logs RPC outcomes the caller does not see directly
#[derive(Debug)]
struct LoggingHooks;

impl RpcHooks for LoggingHooks {
    fn on_call_timeout(&self, unique_id: u32, message_id: u32) {
        warn!("Call {} (message {}) timed out", unique_id, message_id);
    }

    fn on_call_error_code(&self, reply: &MessageObject) {
        warn!(
            "Call {} answered by {} with error code {}",
            reply.unique_id(),
            reply.type_name(),
            reply.error_code()
        );
    }
}

async fn run_connect(config: ClientConfig, count: u32, stay: bool) -> anyhow::Result<()> {
    let registry = protocol::client_registry()?;
    let manager = ChannelManager::new(registry)?;
    let mut events = manager.subscribe();
    let transports = build_transports(&config.tls).await?;
    let hooks: Arc<dyn RpcHooks> = Arc::new(LoggingHooks);

    for settings in &config.channels {
        let mut channel_config = settings
            .to_channel_config()
            .with_heartbeat::<Ping>(settings.heartbeat_interval)
            .with_rpc_hooks(hooks.clone());
        if let Some(transport) = transports.for_address(&settings.address) {
            channel_config = channel_config.with_transport(transport);
        }

        let channel = manager.create_channel(settings.name.clone(), channel_config)?;
        channel.connect(&settings.address, None)?;
    }

    let total = config.channels.len();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<String>();
    let mut finished = HashSet::new();

    let mut ticker = tokio::time::interval(config.tick_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last = Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                manager.update(now - last);
                last = now;
            }
            Some(event) = events.recv() => match event {
                ChannelEvent::Connected { channel, .. } => {
                    if let Some(channel) = manager.get_channel(&channel) {
                        tokio::spawn(echo_session(channel, count, done_tx.clone()));
                    }
                }
                ChannelEvent::Closed { channel, reason, code } => {
                    warn!("Channel {} closed: {} (code {})", channel, reason, code);
                    let _ = done_tx.send(channel);
                }
                ChannelEvent::Error { channel, kind, message, .. } => {
                    // Failed connects leave the channel inactive without a close
                    if manager.get_channel(&channel).map_or(false, |c| !c.is_active()) {
                        error!("Channel {} failed [{}]: {}", channel, kind, message);
                        let _ = done_tx.send(channel);
                    }
                }
                ChannelEvent::MissedHeartbeat { .. } => {}
            },
            Some(name) = done_rx.recv() => {
                if finished.insert(name.clone()) {
                    info!("Channel {} done ({}/{})", name, finished.len(), total);
                }
                if finished.len() >= total && !stay {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    for name in manager.channel_names() {
        if let Some(channel) = manager.get_channel(&name) {
            let stats = channel.stats();
            info!(
                "Channel {}: sent={} received={} pending={}",
                name, stats.sent_packets, stats.received_packets, stats.pending_calls
            );
        }
    }
    manager.shutdown();
    Ok(())
}

/// Issue `count` echo calls, then report completion
async fn echo_session(channel: Channel, count: u32, done: mpsc::UnboundedSender<String>) {
    for n in 1..=count {
        let text = format!("hello #{} from {}", n, channel.name());
        let started = Instant::now();
        match channel
            .call_with::<EchoReply>(Echo { text }, CallOptions::default())
            .await
        {
            Ok(reply) => info!(
                channel = %channel.name(),
                "Echo {} -> {:?} in {:?}",
                n,
                reply.text,
                started.elapsed()
            ),
            Err(e) => {
                warn!(channel = %channel.name(), "Echo {} failed: {}", n, e);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    let _ = done.send(channel.name().to_string());
}

/// Transports picked per channel by address scheme
struct Transports {
    /// `None` keeps the default TCP transport
    stream: Option<Arc<dyn Transport>>,
    websocket: Arc<dyn Transport>,
}

impl Transports {
    fn plain() -> Self {
        Self {
            stream: None,
            websocket: Arc::new(WebSocketTransport::new()),
        }
    }

    fn for_address(&self, address: &str) -> Option<Arc<dyn Transport>> {
        match Endpoint::parse(address) {
            Ok(endpoint) if endpoint.scheme.is_websocket() => Some(self.websocket.clone()),
            _ => self.stream.clone(),
        }
    }
}

/// TLS transports when enabled; plain TCP and WebSocket otherwise
#[cfg(feature = "tls")]
async fn build_transports(tls: &TlsConfig) -> anyhow::Result<Transports> {
    use tether_session::{make_client_config, TlsTransport};

    if !tls.enabled {
        return Ok(Transports::plain());
    }

    info!("Loading TLS configuration from ca={:?}", tls.ca_file);
    let ca_pem = tokio::fs::read_to_string(&tls.ca_file)
        .await
        .with_context(|| format!("failed to read CA file {:?}", tls.ca_file))?;

    let identity = if tls.cert_file.is_empty() {
        None
    } else {
        let cert = tokio::fs::read_to_string(&tls.cert_file)
            .await
            .with_context(|| format!("failed to read certificate file {:?}", tls.cert_file))?;
        let key = tokio::fs::read_to_string(&tls.key_file)
            .await
            .with_context(|| format!("failed to read private key file {:?}", tls.key_file))?;
        Some((cert, key))
    };

    let client_config = make_client_config(
        &ca_pem,
        identity.as_ref().map(|(c, k)| (c.as_str(), k.as_str())),
    )?;
    let mut stream = TlsTransport::new(client_config.clone());
    if let Some(name) = &tls.server_name {
        stream = stream.with_server_name(name.clone());
    }
    Ok(Transports {
        stream: Some(Arc::new(stream)),
        websocket: Arc::new(WebSocketTransport::new().with_tls(client_config)),
    })
}

#[cfg(not(feature = "tls"))]
async fn build_transports(tls: &TlsConfig) -> anyhow::Result<Transports> {
    if tls.enabled {
        anyhow::bail!("TLS requested but not compiled with TLS support. Build with --features tls");
    }
    Ok(Transports::plain())
}

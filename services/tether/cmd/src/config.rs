//! Configuration handling for the tether client.
//!
//! Settings come from a YAML file and `TETHER_*` environment variables. A
//! missing or unreadable file is not fatal; defaults are used instead.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tether_session::{
    ChannelConfig, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MISS_HEARTBEAT_COUNT_BY_CLOSE,
    DEFAULT_RPC_TIMEOUT,
};
use tracing::{info, warn};

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Cadence of the update loop
    #[serde(with = "humantime_duration")]
    pub tick_interval: Duration,
    /// Channels opened in connect mode
    pub channels: Vec<ChannelSettings>,
    /// TLS configuration
    pub tls: TlsConfig,
}

/// One channel entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Channel name, unique per process
    pub name: String,
    /// `host:port` to connect to
    pub address: String,
    #[serde(with = "humantime_duration")]
    pub rpc_timeout: Duration,
    /// Zero disables heartbeats
    #[serde(with = "humantime_duration")]
    pub heartbeat_interval: Duration,
    pub miss_heartbeat_count_by_close: u32,
    pub reset_heartbeat_on_receive: bool,
}

/// TLS configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Whether TLS is enabled
    pub enabled: bool,
    /// Path to CA certificate file
    pub ca_file: String,
    /// Path to client certificate file (optional, for mTLS)
    pub cert_file: String,
    /// Path to client private key file
    pub key_file: String,
    /// SNI override
    pub server_name: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(16),
            channels: vec![ChannelSettings::default()],
            tls: TlsConfig::default(),
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            name: "main".to_string(),
            address: "127.0.0.1:7000".to_string(),
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            miss_heartbeat_count_by_close: DEFAULT_MISS_HEARTBEAT_COUNT_BY_CLOSE,
            reset_heartbeat_on_receive: true,
        }
    }
}

impl ChannelSettings {
    /// Channel configuration for these settings; the caller adds transport and heartbeat
    pub fn to_channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            rpc_timeout: self.rpc_timeout,
            heartbeat_interval: self.heartbeat_interval,
            miss_heartbeat_count_by_close: self.miss_heartbeat_count_by_close,
            reset_heartbeat_on_receive: self.reset_heartbeat_on_receive,
            ..ChannelConfig::default()
        }
    }
}

/// Root of the YAML file
#[derive(Debug, Deserialize)]
struct RootConfig {
    tether: Option<ClientConfig>,
}

impl ClientConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root) => {
                    info!("Loaded configuration from {:?}", path);
                    root.tether.unwrap_or_default()
                }
                Err(e) => {
                    warn!("Failed to parse config file {:?} ({}), using defaults", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;

        info!(
            "Final client configuration: tick={:?}, channels={}, tls={}",
            config.tick_interval,
            config.channels.len(),
            config.tls.enabled
        );
        Ok(config)
    }

    /// Apply `TETHER_*` overrides; channel overrides target the first channel
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = var("TETHER_TICK_INTERVAL") {
            self.tick_interval = humantime::parse_duration(&value)
                .with_context(|| format!("TETHER_TICK_INTERVAL={}", value))?;
            info!("Tick interval overridden by environment: {:?}", self.tick_interval);
        }

        if self.channels.is_empty() {
            self.channels.push(ChannelSettings::default());
        }
        let channel = &mut self.channels[0];

        if let Some(address) = var("TETHER_ADDRESS") {
            info!("Address of {} overridden by environment: {}", channel.name, address);
            channel.address = address;
        }

        if let Some(value) = var("TETHER_RPC_TIMEOUT") {
            channel.rpc_timeout = humantime::parse_duration(&value)
                .with_context(|| format!("TETHER_RPC_TIMEOUT={}", value))?;
            info!("RPC timeout overridden by environment: {:?}", channel.rpc_timeout);
        }

        if let Some(value) = var("TETHER_HEARTBEAT_INTERVAL") {
            channel.heartbeat_interval = humantime::parse_duration(&value)
                .with_context(|| format!("TETHER_HEARTBEAT_INTERVAL={}", value))?;
            info!(
                "Heartbeat interval overridden by environment: {:?}",
                channel.heartbeat_interval
            );
        }

        if let Some(value) = var("TETHER_TLS_ENABLED") {
            self.tls.enabled = value.eq_ignore_ascii_case("true");
            info!("TLS overridden by environment: {}", self.tls.enabled);
        }

        Ok(())
    }
}

/// `serde(with)` adapter for humantime strings such as `250ms` or `1m 30s`
mod humantime_duration {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.tick_interval, Duration::from_millis(16));
        assert_eq!(config.channels.len(), 1);
        assert_eq!(config.channels[0].address, "127.0.0.1:7000");
        assert!(!config.tls.enabled);
        assert!(config.channels[0].to_channel_config().validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
tether:
  tick_interval: 50ms
  channels:
    - name: game
      address: tcp://10.0.0.5:7000
      rpc_timeout: 8s
      heartbeat_interval: 1m
      miss_heartbeat_count_by_close: 3
    - name: chat
      address: "[::1]:7001"
      heartbeat_interval: 0s
  tls:
    enabled: true
    ca_file: /etc/tether/ca.pem
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = ClientConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.tick_interval, Duration::from_millis(50));
        assert_eq!(config.channels.len(), 2);

        let game = config.channels[0].to_channel_config();
        assert_eq!(game.rpc_timeout, Duration::from_secs(8));
        assert_eq!(game.heartbeat_interval, Duration::from_secs(60));
        assert_eq!(game.miss_heartbeat_count_by_close, 3);
        assert!(game.reset_heartbeat_on_receive);

        let chat = &config.channels[1];
        assert_eq!(chat.name, "chat");
        assert_eq!(chat.rpc_timeout, DEFAULT_RPC_TIMEOUT);
        assert!(chat.heartbeat_interval.is_zero());

        assert!(config.tls.enabled);
        assert_eq!(config.tls.ca_file, "/etc/tether/ca.pem");
        assert!(config.tls.server_name.is_none());
    }

    #[test]
    fn test_missing_or_bad_file_uses_defaults() {
        let config = ClientConfig::load_from_file("/nonexistent/tether.yaml").unwrap();
        assert_eq!(config.channels[0].name, "main");

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"tether: [not, a, map").unwrap();
        let config = ClientConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.tick_interval, Duration::from_millis(16));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TETHER_TICK_INTERVAL", "100ms"),
            ("TETHER_ADDRESS", "example.com:9000"),
            ("TETHER_HEARTBEAT_INTERVAL", "5s"),
            ("TETHER_TLS_ENABLED", "TRUE"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig {
            channels: Vec::new(),
            ..ClientConfig::default()
        };
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.tick_interval, Duration::from_millis(100));
        assert_eq!(config.channels[0].address, "example.com:9000");
        assert_eq!(config.channels[0].heartbeat_interval, Duration::from_secs(5));
        assert!(config.tls.enabled);

        let bad = config.apply_overrides(|key| {
            (key == "TETHER_RPC_TIMEOUT").then(|| "soon".to_string())
        });
        assert!(bad.is_err());
    }
}

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::info;

use crate::error::{ConfigurationError, P2PError, Result};

/// Configuration for the relay server and the peer-side protocol
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Relay server settings
    #[serde(default)]
    pub relay: RelayConfig,

    /// Channel negotiation settings
    #[serde(default)]
    pub negotiation: NegotiationConfig,

    /// Transfer engine sizing
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Address the WebSocket relay listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Display names are truncated to this many characters
    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,

    /// Length of generated short IDs
    #[serde(default = "default_short_id_len")]
    pub short_id_len: usize,
}

/// Negotiation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationConfig {
    /// Seconds a negotiation may take before it is torn down
    #[serde(default = "default_negotiation_timeout")]
    pub timeout_secs: u64,
}

/// Transfer engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Maximum chunk bytes carried by one data frame
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Bytes pulled from the source per read
    #[serde(default = "default_read_block_size")]
    pub read_block_size: usize,

    /// Sending pauses while the channel holds more than this many buffered bytes
    #[serde(default = "default_backpressure_threshold")]
    pub backpressure_threshold: usize,

    /// Poll interval while waiting for the send buffer to drain
    #[serde(default = "default_backpressure_poll_ms")]
    pub backpressure_poll_ms: u64,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}
fn default_max_name_len() -> usize { 30 }
fn default_short_id_len() -> usize { 6 }
fn default_negotiation_timeout() -> u64 { 30 }
fn default_chunk_size() -> usize { 16 * 1024 }
fn default_read_block_size() -> usize { 64 * 1024 }
fn default_backpressure_threshold() -> usize { 16 * 1024 * 1024 } // 16 MiB
fn default_backpressure_poll_ms() -> u64 { 50 }

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_name_len: default_max_name_len(),
            short_id_len: default_short_id_len(),
        }
    }
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_negotiation_timeout(),
        }
    }
}

impl NegotiationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            read_block_size: default_read_block_size(),
            backpressure_threshold: default_backpressure_threshold(),
            backpressure_poll_ms: default_backpressure_poll_ms(),
        }
    }
}

impl TransferConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.backpressure_poll_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file and validate it
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).await.map_err(|_| {
            P2PError::Configuration(ConfigurationError::FileNotFound {
                path: path.to_path_buf(),
            })
        })?;

        let config: Config = toml::from_str(&content)?;
        config.validate()?;

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Reject values the relay or the engine cannot operate with
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, reason: &str| {
            Err(P2PError::Configuration(ConfigurationError::InvalidValue {
                field: field.to_string(),
                reason: reason.to_string(),
            }))
        };

        if self.relay.max_name_len == 0 {
            return invalid("relay.max_name_len", "must be greater than 0");
        }
        if self.relay.short_id_len == 0 {
            return invalid("relay.short_id_len", "must be greater than 0");
        }
        if self.transfer.chunk_size == 0 {
            return invalid("transfer.chunk_size", "must be greater than 0");
        }
        if self.transfer.read_block_size < self.transfer.chunk_size {
            return invalid(
                "transfer.read_block_size",
                "must be at least transfer.chunk_size",
            );
        }
        if self.negotiation.timeout_secs == 0 {
            return invalid("negotiation.timeout_secs", "must be greater than 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.relay.listen_addr.to_string(), "0.0.0.0:3000");
        assert_eq!(config.relay.max_name_len, 30);
        assert_eq!(config.transfer.chunk_size, 16384);
        assert_eq!(config.transfer.backpressure_threshold, 16 * 1024 * 1024);
        assert_eq!(config.transfer.poll_interval(), Duration::from_millis(50));
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[relay]\nlisten_addr = \"127.0.0.1:9000\"\n\n[transfer]\nchunk_size = 1024").unwrap();

        let config = Config::load_from_file(file.path()).await.unwrap();
        assert_eq!(config.relay.listen_addr.port(), 9000);
        assert_eq!(config.relay.max_name_len, 30);
        assert_eq!(config.transfer.chunk_size, 1024);
        assert_eq!(config.negotiation.timeout_secs, 30);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = Config::load_from_file("/nonexistent/p2p-share.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            P2PError::Configuration(ConfigurationError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_chunk() {
        let mut config = Config::default();
        config.transfer.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transfer.read_block_size = 100;
        assert!(config.validate().is_err());
    }
}

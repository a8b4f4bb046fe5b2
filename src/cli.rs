use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::debug;

use crate::config::Config;

/// CLI arguments for the relay server
#[derive(Parser, Debug, Clone)]
#[command(
    name = "p2p-share",
    version,
    about = "Signaling relay for peer-to-peer file sharing",
    long_about = "
p2p-share runs the signaling relay that peers use to find each other by
short ID and exchange connection offers. File bytes never pass through
the relay; they travel directly between peers.

EXAMPLES:
    p2p-share
    p2p-share --listen 127.0.0.1:8080
    p2p-share --config relay.toml --log-level debug
"
)]
pub struct CliArgs {
    /// TOML configuration file
    #[arg(
        short = 'c',
        long = "config",
        value_name = "FILE",
        help = "Path to a TOML configuration file"
    )]
    pub config: Option<PathBuf>,

    /// Overrides `relay.listen_addr` from the configuration
    #[arg(
        short = 'l',
        long = "listen",
        value_name = "ADDR",
        help = "Socket address the relay listens on"
    )]
    pub listen: Option<SocketAddr>,

    #[arg(short = 'v', long = "verbose", help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(
        long = "log-level",
        value_enum,
        default_value_t = LogLevel::Info,
        help = "Set the logging level"
    )]
    pub log_level: LogLevel,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl CliArgs {
    /// `--verbose` wins over `--log-level`
    pub fn effective_log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            self.log_level.as_str()
        }
    }

    /// Initialize tracing; `RUST_LOG` takes precedence when set
    pub fn setup_logging(&self) -> Result<()> {
        let level = self.effective_log_level();

        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new(format!(
                        "{}={},tokio_tungstenite=warn",
                        env!("CARGO_PKG_NAME").replace('-', "_"),
                        level
                    ))
                }),
            )
            .with_target(false)
            .with_thread_ids(true)
            .with_level(true)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

        Ok(())
    }

    /// Load the configuration file (or defaults) and apply CLI overrides
    pub async fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_from_file(path)
                .await
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(listen) = self.listen {
            debug!("Listen address overridden to {}", listen);
            config.relay.listen_addr = listen;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    pub fn print_config(&self, config: &Config) {
        println!("🚀 P2P File Share Relay");
        println!("🌐 Listen Address: {}", config.relay.listen_addr);
        println!("🏷️  Short ID Length: {}", config.relay.short_id_len);
        println!("📝 Max Name Length: {}", config.relay.max_name_len);
        println!("🔧 Log Level: {}", self.effective_log_level());
        println!();
    }
}

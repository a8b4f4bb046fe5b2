use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use p2p_file_share::{cli::CliArgs, relay::RelayServer, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    args.setup_logging()?;

    let config = args.load_config().await?;
    args.print_config(&config);

    info!("Starting p2p-share relay v{}", VERSION);
    let server = RelayServer::bind(&config.relay)
        .await
        .with_context(|| format!("Failed to bind {}", config.relay.listen_addr))?;

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("🛑 Received Ctrl+C, shutting down");
    };

    server.run(shutdown).await?;
    info!("👋 Relay stopped");
    Ok(())
}

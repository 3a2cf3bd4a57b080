use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use takbridge::{init_tracing, Bridge};
use takbridge_core::AppConfig;
use tracing::{error, info};

/// takbridge - CoT/GraphQL bridge between a TAK server and Catalyst
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "TAKBRIDGE_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Disable bearer token verification on the query API
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load config file: {:?}", args.config))?;
    config.dev |= args.dev;

    init_tracing(&config.logging);

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    }

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        info!("rustls crypto provider already installed");
    }

    info!(config = ?args.config, dev = config.dev, "Starting takbridge");
    let bridge = Bridge::start(config).await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    bridge.shutdown().await;
    Ok(())
}

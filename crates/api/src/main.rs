//! gauntlet, the on-chain agent indexing service.
//!
//! Watches the agent registry and its agents, maintains in-memory
//! projections (registrations, balances, usage, supported tokens), and
//! serves the read-only query API.
//!
//! Exits 0 on a clean shutdown signal and 1 when a supervised task fails.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use gauntlet_indexer::Config;

#[derive(Parser)]
#[command(name = "gauntlet")]
#[command(version, about = "Indexes on-chain agent contracts and serves the query API", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "gauntlet.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config))?;

    init_logging(&config, cli.debug)?;

    info!(version = env!("CARGO_PKG_VERSION"), "gauntlet starting");

    gauntlet_api::service::run(config).await
}

fn init_logging(config: &Config, debug: bool) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("gauntlet=debug,gauntlet_api=debug,gauntlet_indexer=debug,tower_http=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()))
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.logging.format == "json" {
        registry.with(fmt::layer().with_target(true).json()).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }

    Ok(())
}

// =============================================================================
// hl-pulse — Main Entry Point
// =============================================================================
//
// Builds the runtime configuration, brings the pipeline up through
// `lifecycle::Pipeline::start`, and waits for Ctrl+C to tear it back down.
// =============================================================================

mod archival;
mod backfill;
mod collectors;
mod config;
mod error;
mod event_bus;
mod events;
mod hyperliquid;
mod jobs;
mod lifecycle;
mod persistence;
mod processors;
mod rate_limit;
mod repository;
mod retry;
mod scheduler;
mod ws_manager;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::RuntimeConfig;
use crate::lifecycle::Pipeline;

const CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("hl-pulse starting up");

    let config = config::load_or_default(CONFIG_PATH);
    info!(
        target_symbol = %config.target_symbol,
        ws_available = config.ws_available,
        "runtime configuration resolved"
    );

    let pipeline = Pipeline::start(config.clone()).await?;

    info!("pipeline running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping gracefully");

    pipeline.shutdown().await;

    if let Err(e) = config.save(CONFIG_PATH) {
        warn!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("hl-pulse shut down complete");
    Ok(())
}

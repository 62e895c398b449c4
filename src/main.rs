// =============================================================================
// Trader Signal Engine — main entry point
// =============================================================================
//
// Headless process: no UI, no order placement. Wires the row store, every
// subsystem behind `AppState`, and the `Scheduler`'s fixed-interval jobs
// (§4.9), then waits for Ctrl+C and shuts down cooperatively (§5).
// =============================================================================

mod app_state;
mod config;
mod errors;
mod exchange;
mod fills;
mod funding;
mod indicators;
mod position;
mod quality;
mod scheduler;
mod signal_tracker;
mod signals;
mod store;
mod types;
mod volatility;

use std::process::ExitCode;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::RuntimeConfig;
use crate::store::Database;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("trader-signal-engine starting up");

    let config = RuntimeConfig::from_env();

    let db = match Database::connect(&config.database_url).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "failed to connect to database, exiting");
            return ExitCode::FAILURE;
        }
    };

    let state = std::sync::Arc::new(AppState::new(config, &db));

    if let Err(e) = state.rehydrate().await {
        error!(error = %e, "failed to rehydrate state from row store, exiting");
        return ExitCode::FAILURE;
    }

    info!(
        tracked = state.tracked_wallets.read().len(),
        "rehydrated tracked wallets from row store"
    );

    let scheduler = state.build_scheduler();
    let handles = scheduler.start();

    info!("all jobs running; press Ctrl+C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }

    warn!("shutdown signal received, stopping gracefully");
    scheduler.shutdown();

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "job task ended abnormally during shutdown");
        }
    }

    info!("trader-signal-engine shut down complete");
    ExitCode::SUCCESS
}

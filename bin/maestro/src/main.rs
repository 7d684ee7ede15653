use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, ExchangeClient, TradingMode};
use engine::{BybitClient, Orchestrator, RetryPolicy};
use sim::SimClient;
use strategy::AssetFileConfig;

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(mode = %cfg.trading_mode, "maestro starting");

    let asset_file = AssetFileConfig::load(&cfg.asset_config_path);
    let symbols: Vec<&str> = asset_file.assets.iter().map(|a| a.symbol.as_str()).collect();
    info!(assets = ?symbols, "assets under watch");

    // ── Exchange client (selected by TRADING_MODE) ────────────────────────────
    let client: Arc<dyn ExchangeClient> = match cfg.trading_mode {
        TradingMode::Live => {
            info!("live trading mode — using BybitClient");
            Arc::new(BybitClient::new(&cfg.bybit_api_key, &cfg.bybit_secret))
        }
        TradingMode::DryRun => {
            warn!("DRY RUN — no orders will be sent to the exchange");
            Arc::new(SimClient::new())
        }
    };

    // ── Worker pool ───────────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let orchestrator = Orchestrator::new(
        asset_file.assets.into_iter().map(Arc::new).collect(),
        client,
        RetryPolicy::default(),
        Duration::from_secs(cfg.stagger_secs),
        shutdown_rx,
    );
    let pool = tokio::spawn(orchestrator.run());

    // ── Shutdown ──────────────────────────────────────────────────────────────
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl-c");
    info!("shutdown signal received — draining workers");
    let _ = shutdown_tx.send(true);
    let _ = pool.await;
    info!("maestro stopped");
}

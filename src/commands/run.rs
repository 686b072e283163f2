//! Run command implementation
//!
//! Starts the grid engine: plans the grid, places the initial buy ladder,
//! then polls in a fixed-interval loop until the stop-loss halts it or a
//! shutdown signal arrives.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tokio::time::interval;
use tracing::{error, info, warn};

use grid_trader::binance::BinanceClient;
use grid_trader::config::Config;
use grid_trader::engine::{CycleOutcome, GridEngine};
use grid_trader::state_manager::SqliteStateManager;

pub fn run(config_path: String, live: bool) -> Result<()> {
    if live {
        warn!("⚠️  LIVE TRADING MODE - REAL MONEY AT RISK!");
        warn!("Press Ctrl+C within 5 seconds to abort...");
        std::thread::sleep(Duration::from_secs(5));
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_async(config_path, live))
}

async fn run_async(config_path: String, live: bool) -> Result<()> {
    info!("🚀 Starting grid trading engine");

    let config = Config::from_file(&config_path).context("Failed to load configuration")?;
    info!("Symbol: {}", config.grid.symbol);
    info!(
        "Grid: {} levels, ±{:.2} spread, fee rate {:.4}",
        config.grid.grid_count, config.grid.spread_amount, config.grid.fee_rate
    );
    info!(
        "Risk: stop-loss {:.1}%, trailing stop {:.1}%",
        config.risk.stop_loss_pct * 100.0,
        config.risk.trailing_stop_pct * 100.0
    );
    info!("Poll interval: {}s", config.engine.poll_interval_secs);

    let api_key = config
        .exchange
        .api_key
        .clone()
        .context("BINANCE_API_KEY not found in environment or config")?;
    let api_secret = config
        .exchange
        .api_secret
        .clone()
        .context("BINANCE_API_SECRET not found in environment or config")?;

    // --live overrides the config's testnet routing; without it the engine
    // stays on the testnet endpoint
    let testnet = !live || config.exchange.testnet;
    let exchange = BinanceClient::new(
        api_key,
        api_secret,
        testnet,
        config.exchange.retry_attempts,
        Duration::from_millis(config.exchange.retry_backoff_ms),
    );
    info!(
        "✅ Exchange client connected ({})",
        if testnet { "testnet" } else { "production" }
    );

    let csv_path = if config.engine.csv_log.is_empty() {
        None
    } else {
        Some(PathBuf::from(&config.engine.csv_log))
    };
    let state = SqliteStateManager::new(&config.engine.state_db, csv_path)?;
    info!("✅ State manager initialized: {}", config.engine.state_db);

    let mut engine = GridEngine::new(&config, exchange, state)
        .await
        .context("Failed to initialize grid engine")?;

    engine.setup_grid().await.context("Failed to set up grid")?;
    info!("✅ Grid placed; entering main loop");
    info!(
        "Pause control: create '{}' to suppress new placements",
        config.engine.pause_file
    );

    let mut tick = interval(Duration::from_secs(config.engine.poll_interval_secs));

    loop {
        tokio::select! {
            _ = tick.tick() => {
                match engine.run_cycle().await {
                    Ok(CycleOutcome::Continue) | Ok(CycleOutcome::Skipped) => {}
                    Ok(CycleOutcome::Halted) => {
                        warn!("Engine halted by stop-loss");
                        break;
                    }
                    Err(e) => {
                        error!("Fatal engine error: {:#}", e);
                        return Err(e);
                    }
                }
            }
            _ = signal::ctrl_c() => {
                warn!("🛑 Ctrl+C received - shutting down");
                info!("Resting orders are left on the exchange; restart sweeps them");
                break;
            }
        }
    }

    info!("✅ Shutdown complete");
    Ok(())
}

//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable support for API credentials.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main configuration structure, constructed once at startup and passed
/// explicitly to the planner and the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        // Load API credentials from environment if not set
        if let Ok(api_key) = std::env::var("BINANCE_API_KEY") {
            config.exchange.api_key = Some(api_key);
        }
        if let Ok(api_secret) = std::env::var("BINANCE_API_SECRET") {
            config.exchange.api_secret = Some(api_secret);
        }
        if let Ok(testnet) = std::env::var("BINANCE_TESTNET") {
            config.exchange.testnet = testnet == "true" || testnet == "1";
        }

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            exchange: ExchangeConfig::default(),
            grid: GridConfig::default(),
            risk: RiskConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

/// Exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    /// Route calls to the testnet endpoint instead of production
    #[serde(default)]
    pub testnet: bool,
    /// Bounded retry attempts per call before surfacing a transient error
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Initial backoff delay in milliseconds; doubles per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            api_key: None,
            api_secret: None,
            testnet: false,
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Grid construction parameters. Every option falls back to its default
/// individually, so a config file only lists what it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub symbol: String,
    /// Symmetric price half-width around current price
    pub spread_amount: f64,
    pub grid_count: u32,
    /// Total capital split evenly across levels. When absent, every level
    /// gets a flat `capital_per_order`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_capital: Option<f64>,
    pub capital_per_order: f64,
    /// Extra profit floor per round trip, on top of round-trip fees
    #[serde(default)]
    pub target_gain_pct: f64,
    pub fee_rate: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            symbol: "ETHUSDT".to_string(),
            spread_amount: 50.0,
            grid_count: 10,
            total_capital: None,
            capital_per_order: 30.0,
            target_gain_pct: 0.0,
            fee_rate: 0.001, // 0.1% spot fee
        }
    }
}

/// Risk control thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Fraction of initial equity that may be lost before a hard halt
    pub stop_loss_pct: f64,
    /// Retracement from the epoch high that triggers a grid re-center
    pub trailing_stop_pct: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            stop_loss_pct: 0.10,
            trailing_stop_pct: 0.02,
        }
    }
}

/// Control loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub poll_interval_secs: u64,
    /// Sentinel file; while it exists, new order placement is suppressed
    pub pause_file: String,
    pub state_db: String,
    /// CSV mirror of the trade ledger; empty disables the mirror
    #[serde(default = "default_csv_log")]
    pub csv_log: String,
}

fn default_csv_log() -> String {
    "trades_log.csv".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            poll_interval_secs: 15,
            pause_file: "pause.flag".to_string(),
            state_db: "trades.db".to_string(),
            csv_log: default_csv_log(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_bot() {
        let config = Config::default();
        assert_eq!(config.grid.symbol, "ETHUSDT");
        assert_eq!(config.grid.grid_count, 10);
        assert_eq!(config.grid.fee_rate, 0.001);
        assert_eq!(config.risk.stop_loss_pct, 0.10);
        assert_eq!(config.risk.trailing_stop_pct, 0.02);
        assert_eq!(config.engine.poll_interval_secs, 15);
    }

    #[test]
    fn test_parse_minimal_json() {
        let json = r#"{
            "grid": {
                "symbol": "BTCUSDT",
                "spread_amount": 500.0,
                "grid_count": 8,
                "total_capital": 400.0,
                "capital_per_order": 50.0,
                "fee_rate": 0.001
            }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.grid.symbol, "BTCUSDT");
        assert_eq!(config.grid.total_capital, Some(400.0));
        // Sections not present fall back to defaults
        assert_eq!(config.risk.stop_loss_pct, 0.10);
        assert_eq!(config.exchange.retry_attempts, 3);
    }

    #[test]
    fn test_partial_section_defaults_per_field() {
        // Overriding one option must not require restating the rest
        let json = r#"{ "grid": { "symbol": "BTCUSDT" } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.grid.symbol, "BTCUSDT");
        assert_eq!(config.grid.spread_amount, 50.0);
        assert_eq!(config.grid.grid_count, 10);
        assert_eq!(config.grid.fee_rate, 0.001);

        let json = r#"{ "risk": { "stop_loss_pct": 0.05 }, "engine": { "poll_interval_secs": 5 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.risk.stop_loss_pct, 0.05);
        assert_eq!(config.risk.trailing_stop_pct, 0.02);
        assert_eq!(config.engine.poll_interval_secs, 5);
        assert_eq!(config.engine.pause_file, "pause.flag");
    }
}

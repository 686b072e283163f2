//! Grid Trading Engine
//!
//! An automated range-bound trading system for a single cryptocurrency
//! pair: partitions a price band into discrete levels, keeps one resting
//! order per level, recycles fills into their opposite side, and enforces
//! stop-loss and trailing-stop risk controls.

pub mod binance;
pub mod config;
pub mod engine;
pub mod exchange;
pub mod level;
pub mod planner;
pub mod risk;
pub mod state_manager;
pub mod types;

pub use config::Config;
pub use engine::{CycleOutcome, GridEngine};
pub use exchange::ExchangeClient;
pub use types::*;

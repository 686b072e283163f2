//! Exchange client abstraction
//!
//! The sole I/O boundary the engine talks to. Implemented by the Binance
//! REST client for live trading and by canned mocks in tests, so the engine
//! runs deterministically without a network.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::types::{Balance, ExchangeError, OrderUpdate, Side, SymbolFilters};

/// Core exchange connector trait
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Last traded price for a symbol
    async fn price(&self, symbol: &str) -> Result<f64, ExchangeError>;

    /// Trading filters (lot size, minimums) and asset names for a symbol
    async fn filters(&self, symbol: &str) -> Result<SymbolFilters, ExchangeError>;

    /// Place a limit order; returns the exchange order id
    async fn place_limit(
        &self,
        symbol: &str,
        side: Side,
        price: f64,
        qty: f64,
    ) -> Result<String, ExchangeError>;

    /// Immediate market sell, used for liquidation
    async fn market_sell(&self, symbol: &str, qty: f64) -> Result<(), ExchangeError>;

    /// Cancel an order. Idempotent: canceling an order the exchange has
    /// already filled or canceled succeeds as a no-op.
    async fn cancel(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError>;

    /// Current status of an order
    async fn order_status(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<OrderUpdate, ExchangeError>;

    /// Ids of all resting orders for a symbol
    async fn open_orders(&self, symbol: &str) -> Result<Vec<String>, ExchangeError>;

    /// Account balances keyed by asset
    async fn balances(&self) -> Result<HashMap<String, Balance>, ExchangeError>;
}

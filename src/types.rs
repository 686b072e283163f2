//! Core data types used across the grid trading engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exchange-reported lifecycle state of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// Parse the status strings Binance reports
    pub fn parse(s: &str) -> Self {
        match s {
            "NEW" => OrderStatus::New,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" | "PENDING_CANCEL" => OrderStatus::Canceled,
            "REJECTED" => OrderStatus::Rejected,
            _ => OrderStatus::Expired,
        }
    }
}

/// Snapshot of an order as reported by the exchange at poll time
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub order_id: String,
    pub status: OrderStatus,
    /// Quantity executed so far; trusted as reported at observation time
    pub executed_qty: f64,
}

/// Trading constraints the exchange enforces for a symbol
#[derive(Debug, Clone)]
pub struct SymbolFilters {
    pub base_asset: String,
    pub quote_asset: String,
    /// Quantity granularity; order quantities must be a multiple of this
    pub step_size: f64,
    pub min_qty: f64,
    /// Minimum order price * quantity
    pub min_notional: f64,
}

impl SymbolFilters {
    /// Floor a quantity to the lot-size step. The epsilon keeps a quantity
    /// that is already a step multiple from flooring down one step when the
    /// division lands an ulp below the integer.
    pub fn adjust_qty(&self, qty: f64) -> f64 {
        if self.step_size <= 0.0 {
            return qty;
        }
        ((qty / self.step_size) + 1e-9).floor() * self.step_size
    }

    /// Whether an order at `price` for `qty` passes the exchange minimums
    pub fn accepts(&self, price: f64, qty: f64) -> bool {
        qty >= self.min_qty && price * qty >= self.min_notional
    }
}

/// Free and locked balance for one asset
#[derive(Debug, Clone, Copy, Default)]
pub struct Balance {
    pub free: f64,
    pub locked: f64,
}

impl Balance {
    pub fn total(&self) -> f64 {
        self.free + self.locked
    }
}

/// Immutable record of one observed fill, appended to the ledger exactly once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub ts: DateTime<Utc>,
    pub side: Side,
    pub price: f64,
    pub qty: f64,
    /// Fee-aware realized profit; zero for buys
    pub pnl: f64,
}

impl TradeRecord {
    pub fn buy(price: f64, qty: f64) -> Self {
        TradeRecord {
            ts: Utc::now(),
            side: Side::Buy,
            price,
            qty,
            pnl: 0.0,
        }
    }

    pub fn sell(price: f64, qty: f64, pnl: f64) -> Self {
        TradeRecord {
            ts: Utc::now(),
            side: Side::Sell,
            price,
            qty,
            pnl,
        }
    }
}

/// Errors surfaced by the exchange client
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The exchange refused the order: filter violation, insufficient
    /// balance, or rate limit. Non-fatal; the level retries next cycle.
    #[error("order rejected: {0}")]
    OrderRejected(String),

    /// A call failed transiently after exhausting retries. The current
    /// cycle is aborted without state mutation and the loop continues.
    #[error("transient network error: {0}")]
    Transient(String),

    /// The exchange answered with something the client cannot interpret
    #[error("unexpected exchange response: {0}")]
    BadResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_adjust_qty_floors_to_step() {
        let filters = SymbolFilters {
            base_asset: "ETH".to_string(),
            quote_asset: "USDT".to_string(),
            step_size: 0.001,
            min_qty: 0.001,
            min_notional: 10.0,
        };

        assert_relative_eq!(filters.adjust_qty(0.015678), 0.015, epsilon = 1e-9);
        assert_relative_eq!(filters.adjust_qty(0.0009), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_filters_accept_minimums() {
        let filters = SymbolFilters {
            base_asset: "ETH".to_string(),
            quote_asset: "USDT".to_string(),
            step_size: 0.001,
            min_qty: 0.001,
            min_notional: 10.0,
        };

        assert!(filters.accepts(2000.0, 0.01)); // notional 20
        assert!(!filters.accepts(2000.0, 0.004)); // notional 8 < 10
        assert!(!filters.accepts(2000.0, 0.0005)); // below min qty
    }

    #[test]
    fn test_order_status_parse() {
        assert_eq!(OrderStatus::parse("FILLED"), OrderStatus::Filled);
        assert_eq!(OrderStatus::parse("NEW"), OrderStatus::New);
        assert_eq!(OrderStatus::parse("CANCELED"), OrderStatus::Canceled);
        assert_eq!(OrderStatus::parse("PENDING_CANCEL"), OrderStatus::Canceled);
    }
}

//! Grid level store
//!
//! One `GridLevel` per price rung, each an independent order lifecycle.
//! Levels are price-sorted and non-overlapping; at most one open order
//! rests per level at any time.

use crate::planner::GridPlan;

/// Lifecycle state of one grid level.
///
/// The two pending-placement shapes (`Idle` after a sell fill,
/// `HoldingBase` after a buy fill) exist so a rejected or paused
/// counter-order placement can be retried on a later cycle without
/// re-observing, and double-recording, the fill that preceded it.
#[derive(Debug, Clone, PartialEq)]
pub enum LevelState {
    /// No resting order; the next action is placing the level's buy
    Idle,
    /// A buy limit order rests at `buy_price`
    BuyPlaced { order_id: String },
    /// The buy filled and was recorded, but the paired sell is not
    /// resting yet; `quantity` is the filled base amount being held
    HoldingBase { quantity: f64 },
    /// A sell limit order for `quantity` rests at `sell_price`
    SellPlaced { order_id: String, quantity: f64 },
}

/// One price rung of the grid
#[derive(Debug, Clone)]
pub struct GridLevel {
    pub buy_price: f64,
    /// Always buy_price + grid_size
    pub sell_price: f64,
    pub state: LevelState,
}

impl GridLevel {
    /// Whether an order is currently resting on the exchange for this level
    pub fn has_open_order(&self) -> bool {
        matches!(
            self.state,
            LevelState::BuyPlaced { .. } | LevelState::SellPlaced { .. }
        )
    }
}

/// Build the level store for a plan: one level per grid line, ascending,
/// with each sell one grid step above its buy.
pub fn build_levels(plan: &GridPlan) -> Vec<GridLevel> {
    let mut levels = Vec::with_capacity(plan.grid_count as usize);
    for i in 0..plan.grid_count {
        let buy_price = plan.lower + i as f64 * plan.grid_size;
        levels.push(GridLevel {
            buy_price,
            sell_price: buy_price + plan.grid_size,
            state: LevelState::Idle,
        });
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn plan() -> GridPlan {
        GridPlan {
            lower: 1950.0,
            upper: 2050.0,
            grid_count: 10,
            grid_size: 10.0,
            capital_per_level: 30.0,
        }
    }

    #[test]
    fn test_levels_cover_band_ascending() {
        let levels = build_levels(&plan());
        assert_eq!(levels.len(), 10);

        // buyPrices 1950, 1960, ..., 2040; each sell one step above
        for (i, level) in levels.iter().enumerate() {
            assert_relative_eq!(level.buy_price, 1950.0 + 10.0 * i as f64, epsilon = 1e-9);
            assert_relative_eq!(level.sell_price, level.buy_price + 10.0, epsilon = 1e-9);
            assert_eq!(level.state, LevelState::Idle);
        }

        // Sorted and non-overlapping
        for pair in levels.windows(2) {
            assert!(pair[0].buy_price < pair[1].buy_price);
            assert!(pair[0].sell_price <= pair[1].sell_price);
        }
    }

    #[test]
    fn test_open_order_states() {
        let mut level = build_levels(&plan()).remove(0);
        assert!(!level.has_open_order());

        level.state = LevelState::BuyPlaced {
            order_id: "1".to_string(),
        };
        assert!(level.has_open_order());

        level.state = LevelState::HoldingBase { quantity: 0.015 };
        assert!(!level.has_open_order());

        level.state = LevelState::SellPlaced {
            order_id: "2".to_string(),
            quantity: 0.015,
        };
        assert!(level.has_open_order());
    }
}

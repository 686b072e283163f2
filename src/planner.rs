//! Grid planner
//!
//! Derives a feasible set of price levels and per-level capital from the
//! current price, a symmetric spread, the requested grid count, available
//! capital, and the exchange's trading filters. When the requested count is
//! infeasible the planner shrinks the grid one level at a time; running out
//! of levels means the spread is too narrow or the capital too small for
//! the exchange's minimums.

use thiserror::Error;
use tracing::{debug, warn};

use crate::types::SymbolFilters;

/// Immutable grid geometry for one grid epoch. Superseded, never mutated,
/// when the trailing stop re-centers the grid.
#[derive(Debug, Clone)]
pub struct GridPlan {
    pub lower: f64,
    pub upper: f64,
    pub grid_count: u32,
    /// Price distance between adjacent levels: (upper - lower) / grid_count
    pub grid_size: f64,
    /// Quote capital committed per level
    pub capital_per_level: f64,
}

/// Inputs the planner needs beyond the live price
#[derive(Debug, Clone)]
pub struct PlannerInputs {
    /// Symmetric half-width around the current price
    pub spread: f64,
    pub grid_count: u32,
    /// Total capital split across levels; falls back to `capital_per_order`
    /// flat per level when absent
    pub total_capital: Option<f64>,
    pub capital_per_order: f64,
    pub fee_rate: f64,
    /// Extra profit floor per round trip on top of round-trip fees
    pub target_gain_pct: f64,
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error(
        "no feasible grid: spread {spread} and capital {capital} cannot satisfy \
         exchange minimums (min qty {min_qty}, min notional {min_notional}) at any grid count"
    )]
    Infeasible {
        spread: f64,
        capital: f64,
        min_qty: f64,
        min_notional: f64,
    },

    #[error("current price {0} must be positive")]
    NonPositivePrice(f64),

    #[error("spread {spread} must be positive and below current price {price}")]
    BadSpread { spread: f64, price: f64 },
}

/// Compute a feasible grid around `price`, shrinking the level count until
/// both the capital-per-level and fee-coverage checks pass.
///
/// Deterministic; terminates in at most `grid_count` iterations.
pub fn plan_grid(
    price: f64,
    inputs: &PlannerInputs,
    filters: &SymbolFilters,
) -> Result<GridPlan, PlanError> {
    if price <= 0.0 {
        return Err(PlanError::NonPositivePrice(price));
    }
    if inputs.spread <= 0.0 || inputs.spread >= price {
        return Err(PlanError::BadSpread {
            spread: inputs.spread,
            price,
        });
    }

    let lower = price - inputs.spread;
    let upper = price + inputs.spread;
    // Round-trip fees plus the configured profit target must fit in one gap
    let gap_floor = 2.0 * inputs.fee_rate + inputs.target_gain_pct;

    let mut grid_count = inputs.grid_count;
    while grid_count > 0 {
        let grid_size = (upper - lower) / grid_count as f64;
        let capital_per_level = match inputs.total_capital {
            Some(total) => total / grid_count as f64,
            None => inputs.capital_per_order,
        };

        let capital_ok = capital_per_level >= filters.min_notional
            && capital_per_level / price >= filters.min_qty;
        let gap_ok = grid_size / price >= gap_floor;

        if capital_ok && gap_ok {
            debug!(
                "Planned grid: [{:.2}, {:.2}] x{} levels, size {:.4}, {:.2} per level",
                lower, upper, grid_count, grid_size, capital_per_level
            );
            return Ok(GridPlan {
                lower,
                upper,
                grid_count,
                grid_size,
                capital_per_level,
            });
        }

        warn!(
            "Grid count {} infeasible (capital_ok={}, gap_ok={}); shrinking",
            grid_count, capital_ok, gap_ok
        );
        grid_count -= 1;
    }

    Err(PlanError::Infeasible {
        spread: inputs.spread,
        capital: inputs
            .total_capital
            .unwrap_or(inputs.capital_per_order * inputs.grid_count as f64),
        min_qty: filters.min_qty,
        min_notional: filters.min_notional,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn filters() -> SymbolFilters {
        SymbolFilters {
            base_asset: "ETH".to_string(),
            quote_asset: "USDT".to_string(),
            step_size: 0.0001,
            min_qty: 0.0001,
            min_notional: 10.0,
        }
    }

    fn inputs() -> PlannerInputs {
        PlannerInputs {
            spread: 50.0,
            grid_count: 10,
            total_capital: Some(300.0),
            capital_per_order: 30.0,
            fee_rate: 0.001,
            target_gain_pct: 0.0,
        }
    }

    #[test]
    fn test_reference_grid_scenario() {
        // price=2000, spread=50, count=10, fee=0.001
        let plan = plan_grid(2000.0, &inputs(), &filters()).unwrap();

        assert_relative_eq!(plan.lower, 1950.0);
        assert_relative_eq!(plan.upper, 2050.0);
        assert_eq!(plan.grid_count, 10);
        assert_relative_eq!(plan.grid_size, 10.0);
        // Fee coverage: 10/2000 = 0.005 >= 0.002
        assert!(plan.grid_size / 2000.0 >= 2.0 * 0.001);
    }

    #[test]
    fn test_partition_invariant() {
        let plan = plan_grid(2000.0, &inputs(), &filters()).unwrap();
        assert_relative_eq!(
            plan.grid_size * plan.grid_count as f64,
            plan.upper - plan.lower,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_shrinks_until_capital_feasible() {
        // 300 total over 10 levels is 30 each; min notional 40 forces a
        // shrink down to 7 levels (300/7 ~ 42.86)
        let mut f = filters();
        f.min_notional = 40.0;
        let plan = plan_grid(2000.0, &inputs(), &f).unwrap();

        assert_eq!(plan.grid_count, 7);
        assert!(plan.capital_per_level >= 40.0);
        assert_relative_eq!(
            plan.grid_size * plan.grid_count as f64,
            plan.upper - plan.lower,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_shrinks_until_gap_covers_fees() {
        // 10 levels over a 20-wide band around 2000 gives gaps of 2
        // (0.001 of price); round-trip fees need 0.002, so the planner
        // must halve the level count
        let mut i = inputs();
        i.spread = 10.0;
        i.total_capital = Some(1000.0);
        let plan = plan_grid(2000.0, &i, &filters()).unwrap();

        assert!(plan.grid_size / 2000.0 >= 0.002);
        assert!(plan.grid_count <= 5);
    }

    #[test]
    fn test_infeasible_at_one_level_fails() {
        // Even a single level cannot meet the 10 USDT minimum notional
        let mut i = inputs();
        i.total_capital = Some(5.0);
        let err = plan_grid(2000.0, &i, &filters()).unwrap_err();
        assert!(matches!(err, PlanError::Infeasible { .. }));
    }

    #[test]
    fn test_flat_capital_fallback() {
        let mut i = inputs();
        i.total_capital = None;
        i.capital_per_order = 25.0;
        let plan = plan_grid(2000.0, &i, &filters()).unwrap();
        assert_relative_eq!(plan.capital_per_level, 25.0);
    }

    #[test]
    fn test_rejects_bad_spread() {
        let mut i = inputs();
        i.spread = 2500.0;
        assert!(matches!(
            plan_grid(2000.0, &i, &filters()),
            Err(PlanError::BadSpread { .. })
        ));
    }

    #[test]
    fn test_target_gain_widens_required_gap() {
        // grid_size/price = 0.005; fee floor 0.002 passes, but adding a
        // 1.5% target forces fewer, wider gaps
        let mut i = inputs();
        i.target_gain_pct = 0.015;
        let plan = plan_grid(2000.0, &i, &filters()).unwrap();
        assert!(plan.grid_size / 2000.0 >= 0.017);
        assert!(plan.grid_count < 10);
    }
}

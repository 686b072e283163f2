//! Risk management
//!
//! Two portfolio-level controls evaluated once per cycle against the
//! price/equity snapshot taken at cycle start: a hard stop-loss that
//! bounds catastrophic drawdown, and a trailing stop that abandons a grid
//! the market has broken out of and re-centers around the new regime.

use tracing::warn;

use crate::config::RiskConfig;

/// What the engine must do after a risk check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskAction {
    /// Keep cycling
    Continue,
    /// Stop-loss breach: cancel everything, liquidate, halt the engine
    Halt,
    /// Trailing-stop retracement: liquidate and re-center the grid
    Reset,
}

/// Per grid-epoch risk state; replaced wholesale on every re-center
#[derive(Debug, Clone)]
pub struct RiskState {
    pub initial_equity: f64,
    pub highest_price: f64,
}

impl RiskState {
    pub fn new(equity: f64, price: f64) -> Self {
        RiskState {
            initial_equity: equity,
            highest_price: price,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskController {
    stop_loss_pct: f64,
    trailing_stop_pct: f64,
    state: RiskState,
}

impl RiskController {
    pub fn new(config: &RiskConfig, initial_equity: f64, price: f64) -> Self {
        RiskController {
            stop_loss_pct: config.stop_loss_pct,
            trailing_stop_pct: config.trailing_stop_pct,
            state: RiskState::new(initial_equity, price),
        }
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    /// Track the highest price seen since the epoch began
    pub fn observe_price(&mut self, price: f64) {
        if price > self.state.highest_price {
            self.state.highest_price = price;
        }
    }

    /// Evaluate both checks against the cycle snapshot. The stop-loss is
    /// terminal and takes precedence over the trailing stop.
    pub fn evaluate(&self, price: f64, equity: f64) -> RiskAction {
        let floor = self.state.initial_equity * (1.0 - self.stop_loss_pct);
        if equity < floor {
            warn!(
                "Stop-loss breached: equity {:.2} < floor {:.2} (initial {:.2})",
                equity, floor, self.state.initial_equity
            );
            return RiskAction::Halt;
        }

        let retrace = self.state.highest_price * (1.0 - self.trailing_stop_pct);
        if price < retrace {
            warn!(
                "Trailing stop hit: price {:.2} < {:.2} ({}% off high {:.2})",
                price,
                retrace,
                self.trailing_stop_pct * 100.0,
                self.state.highest_price
            );
            return RiskAction::Reset;
        }

        RiskAction::Continue
    }

    /// Start a fresh epoch after the grid is re-centered
    pub fn reset(&mut self, equity: f64, price: f64) {
        self.state = RiskState::new(equity, price);
    }
}

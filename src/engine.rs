//! Grid engine: order lifecycle management and the control cycle
//!
//! Each cycle takes one price/equity snapshot, evaluates the risk controls
//! against it, then advances every level's state machine in ascending price
//! order. Per-level failures are contained: a rejected placement leaves the
//! level to retry on a later cycle, and a transient exchange failure skips
//! the remainder of the cycle without mutating state. Only a stop-loss
//! breach (or an infeasible re-plan) stops the engine.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::exchange::ExchangeClient;
use crate::level::{build_levels, GridLevel, LevelState};
use crate::planner::{plan_grid, GridPlan, PlanError, PlannerInputs};
use crate::risk::{RiskAction, RiskController};
use crate::state_manager::SqliteStateManager;
use crate::types::{ExchangeError, OrderStatus, Side, SymbolFilters, TradeRecord};

/// Outcome of one control cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Normal cycle; poll again after the interval
    Continue,
    /// A transient failure aborted the cycle; poll again after the interval
    Skipped,
    /// Stop-loss breach: the engine liquidated and must not cycle again
    Halted,
}

/// Net profit of one matched buy/sell round trip after fees on both legs
pub fn round_trip_pnl(buy_price: f64, sell_price: f64, fee_rate: f64, qty: f64) -> f64 {
    ((sell_price * (1.0 - fee_rate)) - (buy_price * (1.0 + fee_rate))) * qty
}

/// Signal for the cycle driver: keep advancing levels or abort the cycle
enum LevelStep {
    Advanced,
    Abort,
}

pub struct GridEngine<E: ExchangeClient> {
    exchange: E,
    state: SqliteStateManager,
    symbol: String,
    fee_rate: f64,
    planner_inputs: PlannerInputs,
    pause_file: PathBuf,
    filters: SymbolFilters,
    plan: GridPlan,
    levels: Vec<GridLevel>,
    risk: RiskController,
    /// Base-asset quantity attributable to this engine's own buys
    position: f64,
}

impl<E: ExchangeClient> GridEngine<E> {
    /// Build the engine: query filters and price, plan the grid, snapshot
    /// initial equity, and recover the persisted bot position. Fails fast
    /// (before any order is placed) when no feasible grid exists.
    pub async fn new(config: &Config, exchange: E, state: SqliteStateManager) -> Result<Self> {
        let symbol = config.grid.symbol.clone();

        let filters = exchange
            .filters(&symbol)
            .await
            .context("Failed to fetch symbol filters")?;
        let price = exchange
            .price(&symbol)
            .await
            .context("Failed to fetch initial price")?;

        let planner_inputs = PlannerInputs {
            spread: config.grid.spread_amount,
            grid_count: config.grid.grid_count,
            total_capital: config.grid.total_capital,
            capital_per_order: config.grid.capital_per_order,
            fee_rate: config.grid.fee_rate,
            target_gain_pct: config.grid.target_gain_pct,
        };
        let plan = plan_grid(price, &planner_inputs, &filters)?;
        info!(
            "Grid planned: {} levels on [{:.2}, {:.2}], {:.2} {} per level",
            plan.grid_count, plan.lower, plan.upper, plan.capital_per_level, filters.quote_asset
        );

        let balances = exchange
            .balances()
            .await
            .context("Failed to fetch account balances")?;
        let quote = balances
            .get(&filters.quote_asset)
            .copied()
            .unwrap_or_default();
        let base = balances
            .get(&filters.base_asset)
            .copied()
            .unwrap_or_default();
        let equity = quote.total() + base.total() * price;
        info!(
            "Account: {:.4} {} free, {:.6} {} free, equity {:.2}",
            quote.free, filters.quote_asset, base.free, filters.base_asset, equity
        );

        let position = state.bot_position()?;
        if position > 0.0 {
            info!("Recovered bot position from state: {:.8}", position);
        }

        let levels = build_levels(&plan);
        let risk = RiskController::new(&config.risk, equity, price);

        Ok(GridEngine {
            exchange,
            state,
            symbol,
            fee_rate: config.grid.fee_rate,
            planner_inputs,
            pause_file: PathBuf::from(&config.engine.pause_file),
            filters,
            plan,
            levels,
            risk,
            position,
        })
    }

    pub fn levels(&self) -> &[GridLevel] {
        &self.levels
    }

    pub fn plan(&self) -> &GridPlan {
        &self.plan
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn risk(&self) -> &RiskController {
        &self.risk
    }

    fn paused(&self) -> bool {
        self.pause_file.exists()
    }

    /// Equity = quote balance + base balance valued at `price`
    async fn equity(&self, price: f64) -> Result<f64, ExchangeError> {
        let balances = self.exchange.balances().await?;
        let quote = balances
            .get(&self.filters.quote_asset)
            .copied()
            .unwrap_or_default();
        let base = balances
            .get(&self.filters.base_asset)
            .copied()
            .unwrap_or_default();
        Ok(quote.total() + base.total() * price)
    }

    /// Floor the quantity to the lot step and place a limit order.
    /// `Ok(None)` means the order was not placed but the failure is local
    /// (below minimums or rejected); the level retries on a later cycle.
    async fn submit_limit(
        &self,
        side: Side,
        price: f64,
        qty: f64,
    ) -> Result<Option<String>, ExchangeError> {
        let qty = self.filters.adjust_qty(qty);
        if !self.filters.accepts(price, qty) {
            debug!(
                "Skipping {} {:.8} @ {:.2}: below exchange minimums",
                side, qty, price
            );
            return Ok(None);
        }

        match self.exchange.place_limit(&self.symbol, side, price, qty).await {
            Ok(order_id) => {
                info!("{} limit placed @ {:.2} ({:.8}), id {}", side, price, qty, order_id);
                Ok(Some(order_id))
            }
            Err(ExchangeError::OrderRejected(msg)) => {
                warn!("{} limit @ {:.2} rejected: {}", side, price, msg);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Cancel every resting order for the symbol. Cancels of orders the
    /// exchange already closed are no-ops.
    async fn cancel_all(&self) -> Result<(), ExchangeError> {
        let open = self.exchange.open_orders(&self.symbol).await?;
        for order_id in open {
            self.exchange.cancel(&self.symbol, &order_id).await?;
        }
        Ok(())
    }

    /// Cancel everything and market-sell whatever the bot accumulated
    async fn liquidate(&mut self) -> Result<()> {
        self.cancel_all()
            .await
            .map_err(|e| anyhow::anyhow!("cancel sweep failed: {}", e))?;

        let qty = self.filters.adjust_qty(self.position);
        if qty >= self.filters.min_qty && qty > 0.0 {
            self.exchange
                .market_sell(&self.symbol, qty)
                .await
                .map_err(|e| anyhow::anyhow!("liquidation sell failed: {}", e))?;
            info!("Market sold remaining {:.8} {}", qty, self.filters.base_asset);
        }

        self.position = 0.0;
        self.state.set_bot_position(0.0)?;
        for level in &mut self.levels {
            level.state = LevelState::Idle;
        }
        Ok(())
    }

    /// Cancel any stale orders and place the initial buy ladder
    pub async fn setup_grid(&mut self) -> Result<()> {
        if let Err(e) = self.cancel_all().await {
            warn!("Startup order sweep incomplete: {}", e);
        }

        let paused = self.paused();
        if paused {
            info!("Pause flag present; grid placed lazily once it clears");
            return Ok(());
        }

        for idx in 0..self.levels.len() {
            match self.place_level_buy(idx).await? {
                LevelStep::Advanced => {}
                LevelStep::Abort => {
                    // Remaining levels stay Idle; the cycle loop retries them
                    warn!("Initial placement interrupted; remaining levels deferred");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Place the buy for an idle level, sized by current capital per level
    async fn place_level_buy(&mut self, idx: usize) -> Result<LevelStep> {
        let buy_price = self.levels[idx].buy_price;
        let qty = self.plan.capital_per_level / buy_price;
        match self.submit_limit(Side::Buy, buy_price, qty).await {
            Ok(Some(order_id)) => {
                self.levels[idx].state = LevelState::BuyPlaced { order_id };
                Ok(LevelStep::Advanced)
            }
            Ok(None) => Ok(LevelStep::Advanced),
            Err(e) => {
                warn!("Buy placement @ {:.2} failed transiently: {}", buy_price, e);
                Ok(LevelStep::Abort)
            }
        }
    }

    /// Place the paired sell for a level holding a filled buy
    async fn place_level_sell(&mut self, idx: usize, quantity: f64) -> Result<LevelStep> {
        let sell_price = self.levels[idx].sell_price;
        match self.submit_limit(Side::Sell, sell_price, quantity).await {
            Ok(Some(order_id)) => {
                self.levels[idx].state = LevelState::SellPlaced { order_id, quantity };
                Ok(LevelStep::Advanced)
            }
            Ok(None) => {
                self.levels[idx].state = LevelState::HoldingBase { quantity };
                Ok(LevelStep::Advanced)
            }
            Err(e) => {
                warn!("Sell placement @ {:.2} failed transiently: {}", sell_price, e);
                self.levels[idx].state = LevelState::HoldingBase { quantity };
                Ok(LevelStep::Abort)
            }
        }
    }

    /// Advance one level's state machine from its polled order status
    async fn advance_level(&mut self, idx: usize, paused: bool) -> Result<LevelStep> {
        match self.levels[idx].state.clone() {
            LevelState::Idle => {
                if paused {
                    return Ok(LevelStep::Advanced);
                }
                self.place_level_buy(idx).await
            }

            LevelState::BuyPlaced { order_id } => {
                let update = match self.exchange.order_status(&self.symbol, &order_id).await {
                    Ok(u) => u,
                    Err(e) => {
                        warn!("Status poll for order {} failed: {}", order_id, e);
                        return Ok(LevelStep::Abort);
                    }
                };
                match update.status {
                    OrderStatus::Filled => {
                        let qty = update.executed_qty;
                        let buy_price = self.levels[idx].buy_price;
                        info!(
                            "Filled BUY @ {:.2} for {:.8}; pairing SELL @ {:.2}",
                            buy_price, qty, self.levels[idx].sell_price
                        );

                        // Fill accounting is durable before the next order
                        self.state.append_trade(&TradeRecord::buy(buy_price, qty))?;
                        self.position += qty;
                        self.state.set_bot_position(self.position)?;

                        self.levels[idx].state = LevelState::HoldingBase { quantity: qty };
                        if paused {
                            return Ok(LevelStep::Advanced);
                        }
                        self.place_level_sell(idx, qty).await
                    }
                    OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired => {
                        debug!("Buy order {} closed without fill; level re-arms", order_id);
                        self.levels[idx].state = LevelState::Idle;
                        Ok(LevelStep::Advanced)
                    }
                    _ => Ok(LevelStep::Advanced),
                }
            }

            LevelState::HoldingBase { quantity } => {
                if paused {
                    return Ok(LevelStep::Advanced);
                }
                self.place_level_sell(idx, quantity).await
            }

            LevelState::SellPlaced { order_id, quantity } => {
                let update = match self.exchange.order_status(&self.symbol, &order_id).await {
                    Ok(u) => u,
                    Err(e) => {
                        warn!("Status poll for order {} failed: {}", order_id, e);
                        return Ok(LevelStep::Abort);
                    }
                };
                match update.status {
                    OrderStatus::Filled => {
                        let qty = update.executed_qty;
                        let buy_price = self.levels[idx].buy_price;
                        let sell_price = self.levels[idx].sell_price;
                        let pnl = round_trip_pnl(buy_price, sell_price, self.fee_rate, qty);
                        info!(
                            "Filled SELL @ {:.2} for {:.8}, pnl {:+.4}; re-arming BUY @ {:.2}",
                            sell_price, qty, pnl, buy_price
                        );

                        self.state
                            .append_trade(&TradeRecord::sell(sell_price, qty, pnl))?;
                        self.position = (self.position - qty).max(0.0);
                        self.state.set_bot_position(self.position)?;

                        self.levels[idx].state = LevelState::Idle;
                        if paused {
                            return Ok(LevelStep::Advanced);
                        }
                        self.place_level_buy(idx).await
                    }
                    OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired => {
                        debug!("Sell order {} closed without fill; base still held", order_id);
                        self.levels[idx].state = LevelState::HoldingBase { quantity };
                        Ok(LevelStep::Advanced)
                    }
                    _ => Ok(LevelStep::Advanced),
                }
            }
        }
    }

    /// Liquidate and rebuild the grid centered on the current price
    async fn reset_grid(&mut self, price: f64, equity: f64, paused: bool) -> Result<()> {
        info!("Re-centering grid around {:.2}", price);
        self.liquidate().await?;

        // An infeasible re-plan is fatal: the engine has no grid to run
        self.plan = plan_grid(price, &self.planner_inputs, &self.filters)
            .context("Re-centered grid is infeasible")?;
        self.levels = build_levels(&self.plan);
        info!(
            "Grid re-planned: {} levels on [{:.2}, {:.2}]",
            self.plan.grid_count, self.plan.lower, self.plan.upper
        );

        // Liquidation converted base to quote at market, so re-read equity
        // for the new epoch baseline rather than inherit the pre-sale
        // snapshot (which overstates it by the liquidation cost)
        let epoch_equity = match self.equity(price).await {
            Ok(eq) => eq,
            Err(e) => {
                warn!("Equity re-read after liquidation failed, using snapshot: {}", e);
                equity
            }
        };
        self.risk.reset(epoch_equity, price);

        if !paused {
            for idx in 0..self.levels.len() {
                match self.place_level_buy(idx).await? {
                    LevelStep::Advanced => {}
                    LevelStep::Abort => {
                        warn!("Re-placement interrupted; remaining levels deferred");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// One full control cycle: snapshot, risk checks, level advancement
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let paused = self.paused();
        if paused {
            debug!("Pause flag present; new order placement suppressed");
        }

        let price = match self.exchange.price(&self.symbol).await {
            Ok(p) => p,
            Err(e) => {
                warn!("Skipping cycle, price query failed: {}", e);
                return Ok(CycleOutcome::Skipped);
            }
        };
        self.risk.observe_price(price);

        let equity = match self.equity(price).await {
            Ok(eq) => eq,
            Err(e) => {
                warn!("Skipping cycle, balance query failed: {}", e);
                return Ok(CycleOutcome::Skipped);
            }
        };

        // Risk is judged once per cycle on this snapshot; later level
        // transitions in the same cycle do not revisit the decision
        match self.risk.evaluate(price, equity) {
            RiskAction::Halt => {
                return match self.liquidate().await {
                    Ok(()) => {
                        info!("Stop-loss liquidation complete; engine halted");
                        Ok(CycleOutcome::Halted)
                    }
                    Err(e) => {
                        // The breach persists, so the next cycle retries
                        warn!("Stop-loss liquidation incomplete, will retry: {}", e);
                        Ok(CycleOutcome::Skipped)
                    }
                };
            }
            RiskAction::Reset => {
                return match self.reset_grid(price, equity, paused).await {
                    Ok(()) => Ok(CycleOutcome::Continue),
                    // No feasible grid at the new price center is fatal
                    Err(e) if e.downcast_ref::<PlanError>().is_some() => Err(e),
                    Err(e) => {
                        warn!("Grid reset incomplete, will retry: {}", e);
                        Ok(CycleOutcome::Skipped)
                    }
                };
            }
            RiskAction::Continue => {}
        }

        for idx in 0..self.levels.len() {
            match self.advance_level(idx, paused).await? {
                LevelStep::Advanced => {}
                LevelStep::Abort => return Ok(CycleOutcome::Skipped),
            }
        }

        Ok(CycleOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_round_trip_pnl_formula() {
        // buy 1950, sell 1960, 0.1% fee, qty 0.015
        let pnl = round_trip_pnl(1950.0, 1960.0, 0.001, 0.015);
        let expected = ((1960.0 * 0.999) - (1950.0 * 1.001)) * 0.015;
        assert_relative_eq!(pnl, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_pnl_positive_when_gap_covers_fees() {
        // sell > buy * (1 + 2*fee) guarantees a strictly positive round trip
        let buy = 2000.0;
        let fee = 0.001;
        let sell = buy * (1.0 + 2.0 * fee) + 0.01;
        assert!(round_trip_pnl(buy, sell, fee, 1.0) > 0.0);
    }

    #[test]
    fn test_pnl_negative_when_gap_too_tight() {
        // A gap inside the round-trip fee band loses money
        let pnl = round_trip_pnl(2000.0, 2001.0, 0.001, 1.0);
        assert!(pnl < 0.0);
    }
}

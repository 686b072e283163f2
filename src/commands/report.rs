//! Report command implementation
//!
//! Reads the persisted trade ledger and prints summary statistics. Works
//! against a ledger the bot has not written to yet.

use anyhow::Result;
use tracing::info;

use grid_trader::state_manager::SqliteStateManager;
use grid_trader::types::Side;

pub fn run(state_db: String) -> Result<()> {
    info!("Reading ledger from: {}", state_db);

    let state = SqliteStateManager::new(&state_db, None)?;
    let trades = state.load_trades()?;

    println!("\n{}", "=".repeat(60));
    println!("TRADE LEDGER SUMMARY");
    println!("{}", "=".repeat(60));

    if trades.is_empty() {
        println!("No trades recorded yet.");
        return Ok(());
    }

    let buys = trades.iter().filter(|t| t.side == Side::Buy).count();
    let sells = trades.len() - buys;
    let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
    let round_trips: Vec<&_> = trades.iter().filter(|t| t.side == Side::Sell).collect();
    let wins = round_trips.iter().filter(|t| t.pnl > 0.0).count();
    let win_rate = if round_trips.is_empty() {
        0.0
    } else {
        wins as f64 / round_trips.len() as f64 * 100.0
    };

    println!("Total trades:       {}", trades.len());
    println!("Buys / Sells:       {} / {}", buys, sells);
    println!("Realized PnL:       {:+.4}", total_pnl);
    println!("Win rate:           {:.1}%", win_rate);
    println!(
        "First trade:        {}",
        trades.first().map(|t| t.ts.to_rfc3339()).unwrap_or_default()
    );
    println!(
        "Last trade:         {}",
        trades.last().map(|t| t.ts.to_rfc3339()).unwrap_or_default()
    );

    Ok(())
}

// State Manager for the grid engine
// SQLite-based persistence with an optional CSV mirror of the ledger
//
// Provides the durable trade ledger and the bot-owned-balance key used
// for crash recovery of the aggregate position.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::types::{Side, TradeRecord};

const POSITION_KEY: &str = "bot_position";

pub struct SqliteStateManager {
    conn: Arc<Mutex<Connection>>,
    /// CSV mirror of the trade ledger; None disables mirroring
    csv_path: Option<PathBuf>,
}

impl SqliteStateManager {
    pub fn new<P: AsRef<Path>>(db_path: P, csv_path: Option<PathBuf>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

        // Enable WAL mode for better concurrency
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let manager = Self {
            conn: Arc::new(Mutex::new(conn)),
            csv_path,
        };

        manager.create_tables()?;
        manager.init_csv()?;
        info!("SQLite state manager initialized");

        Ok(manager)
    }

    /// In-memory instance, used by tests and dry runs; nothing survives drop
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let manager = Self {
            conn: Arc::new(Mutex::new(conn)),
            csv_path: None,
        };
        manager.create_tables()?;
        Ok(manager)
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        // Same trades schema the dashboard reads
        conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (
                ts TEXT,
                side TEXT,
                price REAL,
                qty REAL,
                pnl REAL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS bot_state (
                key TEXT PRIMARY KEY,
                value REAL NOT NULL
            )",
            [],
        )?;

        debug!("Database schema created/verified");
        Ok(())
    }

    fn init_csv(&self) -> Result<()> {
        if let Some(path) = &self.csv_path {
            if !path.exists() {
                let mut writer = csv::Writer::from_path(path)
                    .with_context(|| format!("Failed to create CSV log: {}", path.display()))?;
                writer.write_record(["ts", "side", "price", "qty", "pnl"])?;
                writer.flush()?;
            }
        }
        Ok(())
    }

    /// Append one trade to the durable ledger (and its CSV mirror)
    pub fn append_trade(&self, trade: &TradeRecord) -> Result<()> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO trades (ts, side, price, qty, pnl) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    trade.ts.to_rfc3339(),
                    trade.side.as_str(),
                    trade.price,
                    trade.qty,
                    trade.pnl,
                ],
            )?;
        }

        if let Some(path) = &self.csv_path {
            let file = std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)?;
            let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
            writer.write_record([
                trade.ts.to_rfc3339(),
                trade.side.as_str().to_string(),
                trade.price.to_string(),
                trade.qty.to_string(),
                trade.pnl.to_string(),
            ])?;
            writer.flush()?;
        }

        info!(
            "Trade recorded: {} {:.6} @ {:.2} | pnl {:+.4}",
            trade.side, trade.qty, trade.price, trade.pnl
        );
        Ok(())
    }

    /// Read the full ledger, oldest first. An empty ledger yields an
    /// empty vec, not an error.
    pub fn load_trades(&self) -> Result<Vec<TradeRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT ts, side, price, qty, pnl FROM trades ORDER BY rowid")?;

        let trades = stmt
            .query_map([], |row| {
                let ts: String = row.get(0)?;
                let side: String = row.get(1)?;
                Ok((ts, side, row.get::<_, f64>(2)?, row.get::<_, f64>(3)?, row.get::<_, f64>(4)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        trades
            .into_iter()
            .map(|(ts, side, price, qty, pnl)| {
                let ts = DateTime::parse_from_rfc3339(&ts)
                    .map(|t| t.with_timezone(&Utc))
                    .with_context(|| format!("bad timestamp in ledger: {}", ts))?;
                let side = match side.as_str() {
                    "BUY" => Side::Buy,
                    _ => Side::Sell,
                };
                Ok(TradeRecord {
                    ts,
                    side,
                    price,
                    qty,
                    pnl,
                })
            })
            .collect()
    }

    /// Base-asset quantity owned as a result of this bot's buys. Missing
    /// key means the bot never traded: zero.
    pub fn bot_position(&self) -> Result<f64> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT value FROM bot_state WHERE key = ?1")?;
        match stmt.query_row(params![POSITION_KEY], |row| row.get::<_, f64>(0)) {
            Ok(value) => Ok(value),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0.0),
            Err(e) => Err(e.into()),
        }
    }

    /// Durably store the bot position. Completes before the in-memory
    /// value is considered authoritative for recovery.
    pub fn set_bot_position(&self, quantity: f64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO bot_state (key, value) VALUES (?1, ?2)",
            params![POSITION_KEY, quantity],
        )?;
        debug!("Bot position saved: {:.8}", quantity);
        Ok(())
    }
}

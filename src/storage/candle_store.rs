// @file: src/storage/candle_store.rs
// @description: SQLite-backed candle table with conflict-free bulk insert and resume-point lookup.
// @author: LAS.

use crate::core::errors::StoreError;
use crate::core::models::Candle;
use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};


//
// SCHEMA
//

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS candles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        market TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        open REAL NOT NULL,
        high REAL NOT NULL,
        low REAL NOT NULL,
        close REAL NOT NULL,
        volume REAL NOT NULL,
        CONSTRAINT market_timestamp_uc UNIQUE (market, timestamp)
    );
    CREATE INDEX IF NOT EXISTS ix_candles_market ON candles(market);
    CREATE INDEX IF NOT EXISTS ix_candles_timestamp ON candles(timestamp);
"#;

const INSERT_CANDLE: &str = r#"
    INSERT INTO candles (market, timestamp, open, high, low, close, volume)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT(market, timestamp) DO NOTHING
"#;


//
// STORE
//

pub struct CandleStore {
    conn: Mutex<Connection>,
}

impl CandleStore {
    //
    // INITIALIZATION
    //

    /// Opens (or creates) the database file, creating its parent directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        // Pragmas (best-effort).
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;") {
            warn!("Could not apply pragmas to {}: {}", path.display(), e);
        }

        debug!("Opened candle store at {}", path.display());
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        CandleStore { conn: Mutex::new(conn) }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }


    //
    // PUBLIC INTERFACE
    //

    pub fn setup(&self) -> Result<(), StoreError> {
        self.lock()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Newest stored bucket for `market`, or `None` when nothing is stored yet.
    pub fn latest_timestamp(&self, market: &str) -> Result<Option<i64>, StoreError> {
        let conn = self.lock()?;
        let latest: Option<i64> = conn.query_row(
            "SELECT MAX(timestamp) FROM candles WHERE market = ?1",
            params![market],
            |row| row.get(0),
        )?;
        Ok(latest)
    }

    /// Inserts the candles not already stored for `market` and returns how many
    /// rows were written. The whole batch commits or rolls back together.
    pub fn insert(&self, market: &str, candles: &[Candle]) -> Result<usize, StoreError> {
        if candles.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut inserted: usize = 0;
        {
            let mut stmt = tx.prepare_cached(INSERT_CANDLE)?;
            for c in candles {
                inserted += stmt.execute(params![
                    market, c.timestamp, c.open, c.high, c.low, c.close, c.volume
                ])?;
            }
        }
        tx.commit()?;

        info!("  -> Inserted {} new candles for {}.", inserted, market);
        Ok(inserted)
    }


    //
    // DATA ACCESSORS
    //

    /// Stored candles for `market`, oldest first.
    pub fn candles(&self, market: &str) -> Result<Vec<Candle>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, open, high, low, close, volume
             FROM candles
             WHERE market = ?1
             ORDER BY timestamp ASC",
        )?;

        let rows = stmt
            .query_map(params![market], |row| {
                Ok(Candle {
                    timestamp: row.get(0)?,
                    open: row.get(1)?,
                    high: row.get(2)?,
                    low: row.get(3)?,
                    close: row.get(4)?,
                    volume: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count(&self, market: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM candles WHERE market = ?1",
            params![market],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    pub fn has_schema(&self) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let name: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'candles'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name.is_some())
    }
}


//
// UNIT TESTS
//

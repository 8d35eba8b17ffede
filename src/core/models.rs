// @file: src/core/models.rs
// @description: Candle, market and run-report structures shared by the client, store and ingestor.
// @author: LAS.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;


//
// POLICY CONFIGURATION
//

/// Client-side throttle applied in front of every exchange call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Calls are held back while the remaining budget is below this value.
    pub threshold: u32,
    pub poll_interval: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        RateLimitPolicy {
            threshold: 50,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Fixed politeness delays on top of the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub market_delay: Duration,
    pub page_delay: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing {
            market_delay: Duration::from_millis(200),
            page_delay: Duration::from_millis(100),
        }
    }
}


//
// EXCHANGE STRUCTURES
//

pub const TRADING_STATUS: &str = "trading";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Market {
    pub market: String,
    pub status: String,
    #[serde(default)] pub base: Option<String>,
    #[serde(default)] pub quote: Option<String>,
}

impl Market {
    pub fn is_trading(&self) -> bool {
        self.status == TRADING_STATUS
    }
}

/// One OHLCV bucket. The market it belongs to travels with the batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Candle { timestamp, open, high, low, close, volume }
    }
}

/// Optional page parameters for a candle request. Timestamps are epoch millis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CandleQuery {
    pub limit: Option<u32>,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl CandleQuery {
    pub fn latest(limit: u32) -> Self {
        CandleQuery { limit: Some(limit), ..Default::default() }
    }

    pub fn ending_at(end: i64) -> Self {
        CandleQuery { end: Some(end), ..Default::default() }
    }
}


//
// RUN REPORTING
//

/// How the per-market loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketOutcome {
    /// Provider had nothing older than the cursor.
    Exhausted,
    /// Nothing newer than what was already stored.
    CaughtUp,
    /// The cursor walked past the start boundary.
    ReachedStart,
    /// Single-page backfill finished.
    Backfilled,
    Failed,
}

impl fmt::Display for MarketOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketReport {
    pub market: String,
    pub outcome: MarketOutcome,
    pub inserted: usize,
    pub pages: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub markets: Vec<MarketReport>,
}

impl RunSummary {
    pub fn candles_inserted(&self) -> usize {
        self.markets.iter().map(|m| m.inserted).sum()
    }

    pub fn failed(&self) -> usize {
        self.markets.iter().filter(|m| m.outcome == MarketOutcome::Failed).count()
    }

    pub fn report_for(&self, market: &str) -> Option<&MarketReport> {
        self.markets.iter().find(|m| m.market == market)
    }
}

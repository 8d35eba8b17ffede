// @file: src/core/ingestor.rs
// @description: Market discovery, latest-N backfill and backward full-history paging into the candle store.
// @author: LAS.

use crate::core::errors::{ApiError, IngestError};
use crate::core::interfaces::ExchangeApi;
use crate::core::models::{Candle, CandleQuery, MarketOutcome, MarketReport, Pacing, RunSummary};
use crate::storage::candle_store::CandleStore;
use chrono::{DateTime, TimeZone, Utc};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::time::sleep;


//
// CONSTANTS
//

pub const DEFAULT_HISTORY_INTERVAL: &str = "1h";


//
// INGESTOR STRUCT
//

pub struct Ingestor<A> {
    api: A,
    store: Arc<CandleStore>,
    pacing: Pacing,
    history_interval: String,
}

impl<A: ExchangeApi> Ingestor<A> {
    //
    // INITIALIZATION
    //

    pub fn new(api: A, store: Arc<CandleStore>, pacing: Pacing) -> Self {
        Ingestor {
            api,
            store,
            pacing,
            history_interval: DEFAULT_HISTORY_INTERVAL.to_string(),
        }
    }

    pub fn with_history_interval(mut self, interval: &str) -> Self {
        self.history_interval = interval.to_string();
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }


    //
    // MARKET DISCOVERY
    //

    /// Markets currently trading. `None` means the run should end here.
    pub async fn active_markets(&self) -> Result<Option<Vec<String>>, IngestError> {
        let response = match self.api.list_markets().await {
            Ok(list) => list,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                error!("Failed to fetch market list from exchange: {}", e);
                return Ok(None);
            }
        };

        if response.is_empty() {
            warn!("Could not fetch market list. Exiting.");
            return Ok(None);
        }

        let markets: Vec<String> = response
            .into_iter()
            .filter(|m| m.is_trading())
            .map(|m| m.market)
            .collect();

        info!("Found {} active markets to process.", markets.len());
        Ok(Some(markets))
    }


    //
    // BACKFILL MODE
    //

    /// Fetches the most recent `limit` candles of every active market in one page each.
    pub async fn backfill_all_markets(&self, interval: &str, limit: u32) -> Result<RunSummary, IngestError> {
        info!("--- Starting Data Ingestion for interval: {} ---", interval);
        self.store.setup()?;

        let mut summary = RunSummary::default();
        let markets = match self.active_markets().await? {
            Some(markets) => markets,
            None => return Ok(summary),
        };

        let total = markets.len();
        for (i, market) in markets.into_iter().enumerate() {
            info!("[{}/{}] Fetching latest {} candles for {}...", i + 1, total, limit, market);

            let mut report = MarketReport {
                market: market.clone(),
                outcome: MarketOutcome::Backfilled,
                inserted: 0,
                pages: 0,
            };

            match self.api.get_candles(&market, interval, &CandleQuery::latest(limit)).await {
                Ok(candles) => {
                    report.pages = 1;
                    if candles.is_empty() {
                        info!("  -> No candle data returned for {}.", market);
                    } else {
                        report.inserted = self.store.insert(&market, &candles)?;
                    }
                }
                Err(e) => {
                    check_fatal(e, &market)?;
                    report.outcome = MarketOutcome::Failed;
                }
            }

            summary.markets.push(report);
            sleep(self.pacing.market_delay).await;
        }

        info!(
            "--- Data Ingestion for interval {} Complete ({} inserted, {} failed) ---",
            interval, summary.candles_inserted(), summary.failed()
        );
        Ok(summary)
    }


    //
    // FULL-HISTORY MODE
    //

    /// Walks every active market backward from `end_date` (now when absent)
    /// until the provider runs dry or the stored history is reached.
    pub async fn fetch_historical_data(
        &self,
        start_date: DateTime<Utc>,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<RunSummary, IngestError> {
        let end_date = end_date.unwrap_or_else(Utc::now);
        info!(
            "Fetching historical data from {} to {}...",
            start_date.format("%Y-%m-%d"), end_date.format("%Y-%m-%d")
        );

        self.store.setup()?;

        let mut summary = RunSummary::default();
        let markets = match self.active_markets().await? {
            Some(markets) => markets,
            None => return Ok(summary),
        };

        for market in markets {
            let report = self
                .fetch_market_history(&market, start_date.timestamp_millis(), end_date.timestamp_millis())
                .await?;
            summary.markets.push(report);
        }

        info!(
            "Historical ingestion complete: {} candles inserted across {} markets ({} failed).",
            summary.candles_inserted(), summary.markets.len(), summary.failed()
        );
        Ok(summary)
    }

    /// One market: RESUMING, then PAGING until EXHAUSTED or CAUGHT_UP.
    /// Exchange failures end this market only; store failures abort the run.
    pub async fn fetch_market_history(
        &self,
        market: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<MarketReport, IngestError> {
        // #1. Resume point
        let latest_candle_ts = self.store.latest_timestamp(market)?;
        let start = latest_candle_ts.unwrap_or(start_ms);

        let mut report = MarketReport {
            market: market.to_string(),
            outcome: MarketOutcome::ReachedStart,
            inserted: 0,
            pages: 0,
        };
        let mut terminal: Option<MarketOutcome> = None;

        // #2. Page backward from the end cursor
        let mut fetch_date = end_ms;
        while fetch_date > start {
            let query = CandleQuery::ending_at(fetch_date);
            let mut candles = match self.api.get_candles(market, &self.history_interval, &query).await {
                Ok(page) => page,
                Err(e) => {
                    check_fatal(e, market)?;
                    report.outcome = MarketOutcome::Failed;
                    return Ok(report);
                }
            };
            report.pages += 1;

            if candles.is_empty() {
                info!("No more data available for {} before {}.", market, format_ts(fetch_date, "%Y-%m-%d"));
                terminal = Some(MarketOutcome::Exhausted);
                break;
            }

            // #3. Advance the cursor to the oldest candle of the page
            sort_newest_first(&mut candles);
            let previous_cursor = fetch_date;
            fetch_date = candles[candles.len() - 1].timestamp;

            // #4. Drop what is already stored
            let fresh: Vec<Candle> = candles
                .into_iter()
                .filter(|c| latest_candle_ts.map_or(true, |ts| c.timestamp > ts))
                .collect();

            if fresh.is_empty() {
                info!("No new candles to insert for {} after {}.", market, format_ts(fetch_date, "%Y-%m-%d"));
                terminal = Some(MarketOutcome::CaughtUp);
                break;
            }

            // #5. Persist
            report.inserted += self.store.insert(market, &fresh)?;
            info!(
                "Inserted {} candles for {}. {} -> {}",
                fresh.len(),
                market,
                format_ts(fresh[fresh.len() - 1].timestamp, "%Y-%m-%d %H:%M"),
                format_ts(fresh[0].timestamp, "%Y-%m-%d %H:%M"),
            );

            if fetch_date >= previous_cursor {
                warn!(
                    "Cursor for {} did not move back from {}; treating history as exhausted.",
                    market, format_ts(previous_cursor, "%Y-%m-%d %H:%M")
                );
                terminal = Some(MarketOutcome::Exhausted);
                break;
            }

            sleep(self.pacing.page_delay).await;
        }

        report.outcome = match terminal {
            Some(outcome) => outcome,
            // Cursor reached the stored boundary.
            None if latest_candle_ts.is_some() => MarketOutcome::CaughtUp,
            None => MarketOutcome::ReachedStart,
        };
        Ok(report)
    }
}


//
// INTERNAL HELPERS
//

fn check_fatal(e: ApiError, market: &str) -> Result<(), IngestError> {
    if e.is_fatal() {
        return Err(e.into());
    }
    error!("An error occurred while fetching data for {}: {}", market, e);
    Ok(())
}

fn sort_newest_first(candles: &mut [Candle]) {
    candles.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

fn format_ts(ms: i64, pattern: &str) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.format(pattern).to_string(),
        None => ms.to_string(),
    }
}


//
// UNIT TESTS
//

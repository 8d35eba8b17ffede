// @file: src/tests/ingestion_scenarios.rs
// @description: End-to-end runs of both ingestion modes against a scripted exchange and an in-memory store.
// @author: LAS.

#[cfg(test)]
mod ingestion_tests {
    use crate::connectors::rate_limited::RateLimitedClient;
    use crate::core::errors::{ApiError, IngestError};
    use crate::core::ingestor::Ingestor;
    use crate::core::models::{CandleQuery, MarketOutcome, Pacing, RateLimitPolicy};
    use crate::storage::candle_store::CandleStore;
    use crate::tests::scripted_exchange::{candle, ScriptedExchange};
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    //
    // HELPERS
    //

    fn no_delay() -> Pacing {
        Pacing { market_delay: Duration::ZERO, page_delay: Duration::ZERO }
    }

    fn store() -> Arc<CandleStore> {
        let store = CandleStore::open_in_memory().unwrap();
        store.setup().unwrap();
        Arc::new(store)
    }

    fn epoch() -> DateTime<Utc> {
        Utc.timestamp_opt(0, 0).unwrap()
    }

    /// File-backed store whose inserts all fail once the schema exists.
    fn failing_store(dir: &tempfile::TempDir) -> Arc<CandleStore> {
        let path = dir.path().join("candles.db");
        let store = CandleStore::open(&path).unwrap();
        store.setup().unwrap();

        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_all BEFORE INSERT ON candles
             BEGIN SELECT RAISE(ABORT, 'disk rejected write'); END;",
        ).unwrap();
        Arc::new(store)
    }

    fn stored_timestamps(store: &CandleStore, market: &str) -> Vec<i64> {
        store.candles(market).unwrap().iter().map(|c| c.timestamp).collect()
    }

    //
    // SCENARIO: FIRST RUN ON AN EMPTY MARKET
    //
    #[tokio::test]
    async fn test_first_run_inserts_page_and_stops_on_empty() {
        let store = store();
        let exchange = ScriptedExchange::new()
            .with_market("BTC-TEST", "trading")
            .with_page("BTC-TEST", &[3000, 2000, 1000]);
        let proxy = RateLimitedClient::new(exchange, RateLimitPolicy::default());
        let ingestor = Ingestor::new(proxy, store.clone(), no_delay());

        let summary = ingestor.fetch_historical_data(epoch(), None).await.unwrap();

        // #1. All three candles landed
        assert_eq!(stored_timestamps(&store, "BTC-TEST"), vec![1000, 2000, 3000]);
        assert_eq!(store.latest_timestamp("BTC-TEST").unwrap(), Some(3000));

        // #2. Exactly two page requests: the data page, then the empty one
        let calls = ingestor.api().inner().calls_for("BTC-TEST");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].interval, "1h");
        assert!(calls[0].query.end.unwrap() > 3000);
        assert_eq!(calls[1].query, CandleQuery::ending_at(1000));

        let report = summary.report_for("BTC-TEST").unwrap();
        assert_eq!(report.outcome, MarketOutcome::Exhausted);
        assert_eq!(report.inserted, 3);
        assert_eq!(report.pages, 2);
    }

    //
    // SCENARIO: SECOND RUN RESUMES AFTER STORED DATA
    //
    #[tokio::test]
    async fn test_second_run_only_inserts_newer_candles() {
        let store = store();
        store.insert("BTC-TEST", &[candle(1000), candle(2000), candle(3000)]).unwrap();

        // The provider re-sends 3000 with different prices; it must not replace the stored row.
        let mut resent = candle(3000);
        resent.close = 999.0;
        let exchange = ScriptedExchange::new()
            .with_market("BTC-TEST", "trading")
            .with_candles("BTC-TEST", vec![candle(5000), candle(4000), resent]);
        let ingestor = Ingestor::new(exchange, store.clone(), no_delay());

        let summary = ingestor.fetch_historical_data(epoch(), None).await.unwrap();

        assert_eq!(stored_timestamps(&store, "BTC-TEST"), vec![1000, 2000, 3000, 4000, 5000]);
        assert_eq!(store.candles("BTC-TEST").unwrap()[2].close, candle(3000).close);

        let report = summary.report_for("BTC-TEST").unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(report.outcome, MarketOutcome::CaughtUp);
        assert_eq!(ingestor.api().calls_for("BTC-TEST").len(), 1);
    }

    //
    // TEST: RESUME NEVER WRITES AT OR BELOW THE STORED BOUNDARY
    //
    #[tokio::test]
    async fn test_resume_filters_across_pages() {
        let store = store();
        store.insert("ETH-EUR", &[candle(2500)]).unwrap();

        let exchange = ScriptedExchange::new()
            .with_market("ETH-EUR", "trading")
            .with_page("ETH-EUR", &[6000, 5000])
            .with_page("ETH-EUR", &[4000, 3000, 2000]);
        let ingestor = Ingestor::new(exchange, store.clone(), no_delay());

        let summary = ingestor.fetch_historical_data(epoch(), None).await.unwrap();

        assert_eq!(stored_timestamps(&store, "ETH-EUR"), vec![2500, 3000, 4000, 5000, 6000]);
        let report = summary.report_for("ETH-EUR").unwrap();
        assert_eq!(report.inserted, 4);
        assert_eq!(report.pages, 2);
        // Cursor reached 2000 <= 2500 and the loop ended without another request.
        assert_eq!(ingestor.api().calls_for("ETH-EUR").len(), 2);
        assert_eq!(report.outcome, MarketOutcome::CaughtUp);
    }

    //
    // TEST: PAGE WITH NOTHING NEW MEANS CAUGHT UP
    //
    #[tokio::test]
    async fn test_page_without_new_candles_is_caught_up() {
        let store = store();
        store.insert("BTC-EUR", &[candle(4000), candle(5000)]).unwrap();

        let exchange = ScriptedExchange::new()
            .with_market("BTC-EUR", "trading")
            .with_page("BTC-EUR", &[5000, 4000])
            .with_page("BTC-EUR", &[3000]);
        let ingestor = Ingestor::new(exchange, store.clone(), no_delay());

        let summary = ingestor.fetch_historical_data(epoch(), None).await.unwrap();

        let report = summary.report_for("BTC-EUR").unwrap();
        assert_eq!(report.outcome, MarketOutcome::CaughtUp);
        assert_eq!(report.inserted, 0);
        assert_eq!(ingestor.api().calls_for("BTC-EUR").len(), 1);
        assert_eq!(store.count("BTC-EUR").unwrap(), 2);
    }

    //
    // TEST: MULTI-PAGE WALK TERMINATES ON THE FIRST EMPTY PAGE
    //
    #[tokio::test]
    async fn test_pagination_stops_after_exhaustion() {
        let store = store();
        let exchange = ScriptedExchange::new()
            .with_market("ADA-EUR", "trading")
            .with_page("ADA-EUR", &[6000, 5000])
            .with_page("ADA-EUR", &[4000, 3000])
            .with_page("ADA-EUR", &[])
            // Would be returned if the loop kept going.
            .with_page("ADA-EUR", &[2000, 1000]);
        let ingestor = Ingestor::new(exchange, store.clone(), no_delay());

        let summary = ingestor.fetch_historical_data(epoch(), None).await.unwrap();

        let ends: Vec<Option<i64>> = ingestor.api().calls_for("ADA-EUR").iter().map(|c| c.query.end).collect();
        assert_eq!(ends.len(), 3);
        assert_eq!(&ends[1..], &[Some(5000), Some(3000)]);
        assert_eq!(stored_timestamps(&store, "ADA-EUR"), vec![3000, 4000, 5000, 6000]);
        assert_eq!(summary.report_for("ADA-EUR").unwrap().outcome, MarketOutcome::Exhausted);
    }

    //
    // TEST: UNORDERED PAGES STILL MOVE THE CURSOR TO THE OLDEST CANDLE
    //
    #[tokio::test]
    async fn test_unordered_page_uses_oldest_candle_as_cursor() {
        let store = store();
        let exchange = ScriptedExchange::new()
            .with_market("SOL-EUR", "trading")
            .with_page("SOL-EUR", &[2000, 1000, 3000]);
        let ingestor = Ingestor::new(exchange, store.clone(), no_delay());

        ingestor.fetch_historical_data(epoch(), None).await.unwrap();

        let calls = ingestor.api().calls_for("SOL-EUR");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].query.end, Some(1000));
        assert_eq!(store.count("SOL-EUR").unwrap(), 3);
    }

    //
    // TEST: A PROVIDER THAT IGNORES THE CURSOR CANNOT LOOP FOREVER
    //
    #[tokio::test]
    async fn test_non_advancing_cursor_terminates() {
        let store = store();
        let exchange = ScriptedExchange::new()
            .with_market("XRP-EUR", "trading")
            .with_page("XRP-EUR", &[5000])
            .with_page("XRP-EUR", &[5000])
            .with_page("XRP-EUR", &[5000]);
        let ingestor = Ingestor::new(exchange, store.clone(), no_delay());

        let summary = ingestor.fetch_historical_data(epoch(), None).await.unwrap();

        assert_eq!(ingestor.api().calls_for("XRP-EUR").len(), 2);
        assert_eq!(store.count("XRP-EUR").unwrap(), 1);
        assert_eq!(summary.report_for("XRP-EUR").unwrap().outcome, MarketOutcome::Exhausted);
    }

    //
    // TEST: CURSOR PASSING THE CONFIGURED START ENDS THE MARKET
    //
    #[tokio::test]
    async fn test_cursor_reaching_start_date_stops() {
        let store = store();
        let exchange = ScriptedExchange::new()
            .with_market("DOT-EUR", "trading")
            .with_page("DOT-EUR", &[4000, 3000])
            .with_page("DOT-EUR", &[2000, 1000]);
        let ingestor = Ingestor::new(exchange, store.clone(), no_delay());

        let report = ingestor.fetch_market_history("DOT-EUR", 2500, 10_000).await.unwrap();

        assert_eq!(report.outcome, MarketOutcome::ReachedStart);
        assert_eq!(report.pages, 2);
        assert_eq!(ingestor.api().calls_for("DOT-EUR")[0].query.end, Some(10_000));
    }

    //
    // TEST: END DATE BEFORE START DATE DOES NOTHING
    //
    #[tokio::test]
    async fn test_empty_window_makes_no_requests() {
        let store = store();
        let exchange = ScriptedExchange::new().with_page("DOT-EUR", &[1000]);
        let ingestor = Ingestor::new(exchange, store.clone(), no_delay());

        let report = ingestor.fetch_market_history("DOT-EUR", 5000, 5000).await.unwrap();

        assert_eq!(report.pages, 0);
        assert!(ingestor.api().calls().is_empty());
    }

    //
    // TEST: ONLY TRADING MARKETS ARE INGESTED
    //
    #[tokio::test]
    async fn test_discovery_filters_on_trading_status() {
        let store = store();
        let exchange = ScriptedExchange::new()
            .with_market("BTC-EUR", "trading")
            .with_market("LUNA-EUR", "halted")
            .with_market("NEW-EUR", "auction")
            .with_market("ETH-EUR", "trading");
        let ingestor = Ingestor::new(exchange, store.clone(), no_delay());

        let markets = ingestor.active_markets().await.unwrap().unwrap();
        assert_eq!(markets, vec!["BTC-EUR".to_string(), "ETH-EUR".to_string()]);

        let summary = ingestor.fetch_historical_data(epoch(), None).await.unwrap();
        let visited: Vec<&str> = summary.markets.iter().map(|m| m.market.as_str()).collect();
        assert_eq!(visited, vec!["BTC-EUR", "ETH-EUR"]);
        assert!(ingestor.api().calls_for("LUNA-EUR").is_empty());
    }

    //
    // TEST: MARKET LIST FAILURE OR EMPTY LIST ENDS THE RUN CLEANLY
    //
    #[tokio::test]
    async fn test_market_list_failure_ends_run() {
        let store = store();
        let exchange = ScriptedExchange::new()
            .with_market_failure(ApiError::Status { status: 502, message: "Bad Gateway".to_string() });
        let ingestor = Ingestor::new(exchange, store.clone(), no_delay());

        let summary = ingestor.backfill_all_markets("1h", 100).await.unwrap();
        assert!(summary.markets.is_empty());
        assert!(ingestor.api().calls().is_empty());

        let empty = Ingestor::new(ScriptedExchange::new(), store.clone(), no_delay());
        let summary = empty.fetch_historical_data(epoch(), None).await.unwrap();
        assert!(summary.markets.is_empty());
    }

    //
    // TEST: REJECTED CREDENTIALS ABORT THE RUN
    //
    #[tokio::test]
    async fn test_unauthorized_is_fatal() {
        let store = store();
        let exchange = ScriptedExchange::new()
            .with_market_failure(ApiError::Unauthorized("No active API key found.".to_string()));
        let ingestor = Ingestor::new(exchange, store.clone(), no_delay());

        let result = ingestor.fetch_historical_data(epoch(), None).await;
        assert!(matches!(result, Err(IngestError::Api(ApiError::Unauthorized(_)))));

        let exchange = ScriptedExchange::new()
            .with_market("BTC-EUR", "trading")
            .with_market("ETH-EUR", "trading")
            .with_page_error("BTC-EUR", ApiError::Unauthorized("expired".to_string()));
        let ingestor = Ingestor::new(exchange, store.clone(), no_delay());

        let result = ingestor.backfill_all_markets("1h", 10).await;
        assert!(result.is_err());
        assert!(ingestor.api().calls_for("ETH-EUR").is_empty());
    }

    //
    // TEST: BACKFILL ISOLATES A FAILING MARKET
    //
    #[tokio::test]
    async fn test_backfill_continues_past_failed_market() {
        let store = store();
        let exchange = ScriptedExchange::new()
            .with_market("AAA-EUR", "trading")
            .with_market("BBB-EUR", "trading")
            .with_market("CCC-EUR", "trading")
            .with_page("AAA-EUR", &[3000, 2000])
            .with_page_error("BBB-EUR", ApiError::Status { status: 500, message: "boom".to_string() })
            .with_page("CCC-EUR", &[3000]);
        let ingestor = Ingestor::new(exchange, store.clone(), no_delay());

        let summary = ingestor.backfill_all_markets("4h", 1000).await.unwrap();

        assert_eq!(summary.markets.len(), 3);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.report_for("BBB-EUR").unwrap().outcome, MarketOutcome::Failed);
        assert_eq!(summary.candles_inserted(), 3);
        assert_eq!(store.count("CCC-EUR").unwrap(), 1);

        // One page per market, asking for the latest N at the given interval.
        for call in ingestor.api().calls() {
            assert_eq!(call.interval, "4h");
            assert_eq!(call.query, CandleQuery::latest(1000));
        }
    }

    //
    // TEST: FULL-HISTORY ISOLATES A FAILING MARKET TOO
    //
    #[tokio::test]
    async fn test_history_continues_past_failed_market() {
        let store = store();
        let exchange = ScriptedExchange::new()
            .with_market("AAA-EUR", "trading")
            .with_market("BBB-EUR", "trading")
            .with_page("AAA-EUR", &[6000, 5000])
            .with_page_error("AAA-EUR", ApiError::Decode("truncated body".to_string()))
            .with_page("BBB-EUR", &[2000]);
        let ingestor = Ingestor::new(exchange, store.clone(), no_delay());

        let summary = ingestor.fetch_historical_data(epoch(), None).await.unwrap();

        let failed = summary.report_for("AAA-EUR").unwrap();
        assert_eq!(failed.outcome, MarketOutcome::Failed);
        // Pages stored before the failure stay stored.
        assert_eq!(failed.inserted, 2);
        assert_eq!(summary.report_for("BBB-EUR").unwrap().outcome, MarketOutcome::Exhausted);
        assert_eq!(store.count("BBB-EUR").unwrap(), 1);
    }

    //
    // TEST: REPEATED BACKFILL IS IDEMPOTENT
    //
    #[tokio::test]
    async fn test_repeated_backfill_is_idempotent() {
        let store = store();
        let script = || {
            ScriptedExchange::new()
                .with_market("BTC-EUR", "trading")
                .with_market("ETH-EUR", "trading")
                .with_page("BTC-EUR", &[3000, 2000, 1000])
                .with_page("ETH-EUR", &[3000, 2000])
        };

        let first = Ingestor::new(script(), store.clone(), no_delay())
            .backfill_all_markets("1h", 3).await.unwrap();
        let btc_after_first = store.candles("BTC-EUR").unwrap();
        let eth_after_first = store.candles("ETH-EUR").unwrap();

        let second = Ingestor::new(script(), store.clone(), no_delay())
            .backfill_all_markets("1h", 3).await.unwrap();

        assert_eq!(first.candles_inserted(), 5);
        assert_eq!(second.candles_inserted(), 0);
        assert_eq!(store.candles("BTC-EUR").unwrap(), btc_after_first);
        assert_eq!(store.candles("ETH-EUR").unwrap(), eth_after_first);
    }

    //
    // TEST: RUNS CREATE THE SCHEMA THEMSELVES
    //
    #[tokio::test]
    async fn test_run_sets_up_schema() {
        let store = Arc::new(CandleStore::open_in_memory().unwrap());
        let exchange = ScriptedExchange::new()
            .with_market("BTC-EUR", "trading")
            .with_page("BTC-EUR", &[1000]);
        let ingestor = Ingestor::new(exchange, store.clone(), no_delay())
            .with_history_interval("15m");

        ingestor.fetch_historical_data(epoch(), None).await.unwrap();

        assert!(store.has_schema().unwrap());
        assert_eq!(ingestor.api().calls()[0].interval, "15m");
    }

    //
    // TEST: STORE FAILURES ABORT THE RUN IN BOTH MODES
    //
    #[tokio::test]
    async fn test_store_failure_is_fatal_in_history_mode() {
        let dir = tempfile::tempdir().unwrap();
        let store = failing_store(&dir);
        let exchange = ScriptedExchange::new()
            .with_market("AAA-EUR", "trading")
            .with_market("BBB-EUR", "trading")
            .with_page("AAA-EUR", &[3000, 2000])
            .with_page("BBB-EUR", &[3000]);
        let ingestor = Ingestor::new(exchange, store.clone(), no_delay());

        let result = ingestor.fetch_historical_data(epoch(), None).await;

        assert!(matches!(result, Err(IngestError::Store(_))));
        assert_eq!(ingestor.api().calls_for("AAA-EUR").len(), 1);
        assert!(ingestor.api().calls_for("BBB-EUR").is_empty());
        assert_eq!(store.count("AAA-EUR").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_is_fatal_in_backfill_mode() {
        let dir = tempfile::tempdir().unwrap();
        let store = failing_store(&dir);
        let exchange = ScriptedExchange::new()
            .with_market("AAA-EUR", "trading")
            .with_market("BBB-EUR", "trading")
            .with_page("AAA-EUR", &[3000, 2000])
            .with_page("BBB-EUR", &[3000]);
        let ingestor = Ingestor::new(exchange, store.clone(), no_delay());

        let result = ingestor.backfill_all_markets("1h", 2).await;

        assert!(matches!(result, Err(IngestError::Store(_))));
        assert!(ingestor.api().calls_for("BBB-EUR").is_empty());
    }
}

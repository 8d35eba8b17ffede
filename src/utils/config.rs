// @file: src/utils/config.rs
// @description: Layered configuration (defaults, optional config file, INGEST_* environment) for credentials, store and pacing.
// @author: LAS.

use serde::Deserialize;
use config::{Config, ConfigError, File, Environment};
use chrono::{DateTime, NaiveDate, Utc};
use std::time::Duration;
use crate::core::models::{Pacing, RateLimitPolicy};

//
// TYPE DEFINITIONS
//

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,

    // Storage
    pub database_path: String,

    // Exchange Credentials & Endpoint
    pub api_base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub access_window_ms: u64,
    pub request_timeout_s: u64,

    // Rate Limiting
    pub rate_limit_threshold: u32,
    pub rate_limit_poll_ms: u64,
    pub market_delay_ms: u64,
    pub page_delay_ms: u64,

    // Ingestion Defaults
    pub start_date: String,
    pub history_interval: String,
    pub backfill_interval: String,
    pub backfill_limit: u32,
}

impl AppConfig {
    //
    // PUBLIC INTERFACE
    //

    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("log_level", "info")?
            .set_default("database_path", "data/trading_data.db")?

            // Bitvavo Endpoint
            .set_default("api_base_url", "https://api.bitvavo.com/v2")?
            .set_default("api_key", "")?
            .set_default("api_secret", "")?
            .set_default("access_window_ms", 10_000)?
            .set_default("request_timeout_s", 10)?

            // Rate Limiting
            .set_default("rate_limit_threshold", 50)?
            .set_default("rate_limit_poll_ms", 1000)?
            .set_default("market_delay_ms", 200)?
            .set_default("page_delay_ms", 100)?

            // Ingestion
            .set_default("start_date", "2020-01-01")?
            .set_default("history_interval", "1h")?
            .set_default("backfill_interval", "1h")?
            .set_default("backfill_limit", 1000)?

            // File & Env Overrides
            .add_source(File::with_name("config").required(false))
            .add_source(Environment::with_prefix("INGEST"));

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// `start_date` (YYYY-MM-DD) as midnight UTC.
    pub fn start_date(&self) -> Result<DateTime<Utc>, ConfigError> {
        parse_start_date(&self.start_date)
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            threshold: self.rate_limit_threshold,
            poll_interval: Duration::from_millis(self.rate_limit_poll_ms),
        }
    }

    pub fn pacing(&self) -> Pacing {
        Pacing {
            market_delay: Duration::from_millis(self.market_delay_ms),
            page_delay: Duration::from_millis(self.page_delay_ms),
        }
    }
}

pub fn parse_start_date(raw: &str) -> Result<DateTime<Utc>, ConfigError> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| ConfigError::Message(format!("Invalid start_date '{}': {}", raw, e)))?;

    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| ConfigError::Message(format!("Invalid start_date '{}'", raw)))
}

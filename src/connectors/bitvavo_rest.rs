// @file: src/connectors/bitvavo_rest.rs
// @description: Signed HTTP client for the Bitvavo v2 market, candle and rate-limit endpoints.
// @author: LAS.

use crate::core::errors::ApiError;
use crate::core::interfaces::ExchangeApi;
use crate::core::models::{Candle, CandleQuery, Market};
use crate::utils::config::AppConfig;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use log::debug;
use reqwest::header::HeaderMap;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use url::Url;

type HmacSha256 = Hmac<Sha256>;


//
// CONSTANTS
//

pub const DEFAULT_BASE_URL: &str = "https://api.bitvavo.com/v2";
pub const DEFAULT_ACCESS_WINDOW_MS: u64 = 10_000;

const RATE_LIMIT_HEADER: &str = "bitvavo-ratelimit-remaining";
const RATE_LIMIT_RESET_HEADER: &str = "bitvavo-ratelimit-resetat";
const UNKNOWN_LIMIT: i64 = -1;

/// Weight budget of a fresh rate-limit window.
pub const WINDOW_BUDGET: u32 = 1000;
/// Length of the exchange's rate-limit window, used when no reset time is sent.
const WINDOW_MS: i64 = 60_000;


//
// BITVAVO WIRE MODELS
//

#[derive(Deserialize)]
struct BitvavoErrorBody {
    #[serde(rename = "errorCode")] error_code: Option<i64>,
    error: Option<String>,
}


//
// CLIENT
//

pub struct BitvavoClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    access_window_ms: u64,
    // Last value seen in the rate-limit response header.
    remaining: AtomicI64,
    // Epoch ms at which the current window restores the full budget.
    reset_at: AtomicI64,
}

impl BitvavoClient {
    //
    // INITIALIZATION
    //

    pub fn new(api_key: &str, api_secret: &str) -> Result<Self, ApiError> {
        Ok(BitvavoClient {
            http: Client::builder().build()?,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            access_window_ms: DEFAULT_ACCESS_WINDOW_MS,
            remaining: AtomicI64::new(UNKNOWN_LIMIT),
            reset_at: AtomicI64::new(UNKNOWN_LIMIT),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_s.max(1)))
            .build()?;

        Ok(BitvavoClient {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            access_window_ms: config.access_window_ms,
            remaining: AtomicI64::new(UNKNOWN_LIMIT),
            reset_at: AtomicI64::new(UNKNOWN_LIMIT),
        })
    }


    //
    // REQUEST HELPERS
    //

    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url, ApiError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| ApiError::Decode(format!("Invalid endpoint URL: {}", e)))?;

        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// HMAC-SHA256 over `timestamp + method + path?query + body`, hex encoded.
    pub fn signature(&self, timestamp: i64, method: &str, url: &Url, body: &str) -> Result<String, ApiError> {
        let mut signed_path = url.path().to_string();
        if let Some(query) = url.query() {
            signed_path.push('?');
            signed_path.push_str(query);
        }

        let payload = format!("{}{}{}{}", timestamp, method, signed_path, body);
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| ApiError::Signing(e.to_string()))?;
        mac.update(payload.as_bytes());

        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn get_json(&self, url: Url) -> Result<Value, ApiError> {
        let mut request = self.http.get(url.clone());

        // #1. Sign when credentials are present. Public endpoints work unsigned.
        if !self.api_key.is_empty() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let signature = self.signature(timestamp, "GET", &url, "")?;
            request = request
                .header("Bitvavo-Access-Key", &self.api_key)
                .header("Bitvavo-Access-Signature", signature)
                .header("Bitvavo-Access-Timestamp", timestamp.to_string())
                .header("Bitvavo-Access-Window", self.access_window_ms.to_string());
        }

        // #2. Execute and track the budget header on every response
        let response = request.send().await?;
        self.record_rate_limit(response.headers());

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_response(status.as_u16(), &body));
        }

        response.json::<Value>().await
            .map_err(|e| ApiError::Decode(format!("JSON Parse Error: {}", e)))
    }

    pub(crate) fn record_rate_limit(&self, headers: &HeaderMap) {
        self.record_rate_limit_at(headers, chrono::Utc::now().timestamp_millis());
    }

    fn record_rate_limit_at(&self, headers: &HeaderMap, now_ms: i64) {
        let remaining = match header_i64(headers, RATE_LIMIT_HEADER) {
            Some(remaining) => remaining,
            None => return,
        };

        // Without a reset time the budget is assumed back after one window.
        let reset_at = header_i64(headers, RATE_LIMIT_RESET_HEADER).unwrap_or(now_ms + WINDOW_MS);
        self.reset_at.store(reset_at, Ordering::Relaxed);
        self.remaining.store(remaining, Ordering::Relaxed);
    }

    /// Budget as of `now_ms`. Once the window has reset the full budget is restored.
    fn known_limit_at(&self, now_ms: i64) -> Option<u32> {
        let value = self.remaining.load(Ordering::Relaxed);
        if value < 0 {
            return None;
        }

        let reset_at = self.reset_at.load(Ordering::Relaxed);
        if reset_at >= 0 && now_ms >= reset_at {
            debug!("Rate limit window reset, budget restored to {}", WINDOW_BUDGET);
            self.remaining.store(WINDOW_BUDGET as i64, Ordering::Relaxed);
            self.reset_at.store(UNKNOWN_LIMIT, Ordering::Relaxed);
            return Some(WINDOW_BUDGET);
        }

        Some(value.min(u32::MAX as i64) as u32)
    }

    fn known_limit(&self) -> Option<u32> {
        self.known_limit_at(chrono::Utc::now().timestamp_millis())
    }
}


//
// EXCHANGE INTERFACE
//

#[async_trait]
impl ExchangeApi for BitvavoClient {
    async fn list_markets(&self) -> Result<Vec<Market>, ApiError> {
        let url = self.endpoint("/markets", &[])?;
        let json = self.get_json(url).await?;

        serde_json::from_value(json)
            .map_err(|e| ApiError::Decode(format!("Invalid market list: {}", e)))
    }

    async fn get_candles(
        &self,
        market: &str,
        interval: &str,
        query: &CandleQuery,
    ) -> Result<Vec<Candle>, ApiError> {
        // #1. Construct URL
        // Format: /{market}/candles?interval=1h&limit=1000&start=..&end=..
        let mut params: Vec<(&str, String)> = vec![("interval", interval.to_string())];
        if let Some(limit) = query.limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(start) = query.start {
            params.push(("start", start.to_string()));
        }
        if let Some(end) = query.end {
            params.push(("end", end.to_string()));
        }

        let url = self.endpoint(&format!("/{}/candles", market), &params)?;

        // #2. Execute and parse
        let json = self.get_json(url).await?;
        let candles = parse_candle_array(json)?;
        debug!("Fetched {} {} candles for {}", candles.len(), interval, market);
        Ok(candles)
    }

    async fn remaining_limit(&self) -> Result<u32, ApiError> {
        if let Some(limit) = self.known_limit() {
            return Ok(limit);
        }

        // Nothing observed yet: a cheap call refreshes the header.
        let url = self.endpoint("/time", &[])?;
        self.get_json(url).await?;

        self.known_limit()
            .ok_or_else(|| ApiError::Decode(format!("Missing {} header", RATE_LIMIT_HEADER)))
    }
}


//
// INTERNAL HELPERS
//

fn error_from_response(status: u16, body: &str) -> ApiError {
    let message = match serde_json::from_str::<BitvavoErrorBody>(body) {
        Ok(BitvavoErrorBody { error: Some(msg), error_code }) => match error_code {
            Some(code) => format!("{} (errorCode {})", msg, code),
            None => msg,
        },
        _ => body.to_string(),
    };

    match status {
        401 | 403 => ApiError::Unauthorized(message),
        _ => ApiError::Status { status, message },
    }
}

/// Bitvavo returns candles as arrays:
/// [ [timestamp, "open", "high", "low", "close", "volume"], ... ]
pub fn parse_candle_array(json: Value) -> Result<Vec<Candle>, ApiError> {
    let raw_list = json.as_array()
        .ok_or_else(|| ApiError::Decode("Expected array of candles".to_string()))?;

    let mut candles: Vec<Candle> = Vec::with_capacity(raw_list.len());

    for item in raw_list {
        let arr = item.as_array()
            .ok_or_else(|| ApiError::Decode("Invalid candle format".to_string()))?;

        if arr.len() < 6 {
            return Err(ApiError::Decode(format!("Truncated candle row: {}", item)));
        }

        let timestamp = parse_i64(&arr[0])
            .ok_or_else(|| ApiError::Decode(format!("Invalid candle timestamp: {}", arr[0])))?;

        let field = |idx: usize| -> Result<f64, ApiError> {
            parse_f64(&arr[idx]).ok_or_else(|| {
                ApiError::Decode(format!("Invalid candle field {} at {}: {}", idx, timestamp, arr[idx]))
            })
        };

        candles.push(Candle {
            timestamp,
            open: field(1)?,
            high: field(2)?,
            low: field(3)?,
            close: field(4)?,
            volume: field(5)?,
        });
    }

    Ok(candles)
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<i64>().ok())
}

fn parse_f64(v: &Value) -> Option<f64> {
    if let Some(f) = v.as_f64() {
        return Some(f);
    }
    v.as_str().and_then(|s| s.parse::<f64>().ok())
}

fn parse_i64(v: &Value) -> Option<i64> {
    if let Some(i) = v.as_i64() {
        return Some(i);
    }
    v.as_str().and_then(|s| s.parse::<i64>().ok())
}


//
// UNIT TESTS
//

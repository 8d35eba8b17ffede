// @file: src/core/interfaces.rs
// @description: The exchange operations the ingestor depends on.
// @author: LAS.

use crate::core::errors::ApiError;
use crate::core::models::{Candle, CandleQuery, Market};
use async_trait::async_trait;

//
// TRAIT DEFINITIONS
//

#[async_trait]
pub trait ExchangeApi: Send + Sync {
    // #1. All listed markets, regardless of status
    async fn list_markets(&self) -> Result<Vec<Market>, ApiError>;

    // #2. One page of candles, newest-first
    async fn get_candles(
        &self,
        market: &str,
        interval: &str,
        query: &CandleQuery,
    ) -> Result<Vec<Candle>, ApiError>;

    // #3. Remaining call budget in the current window
    async fn remaining_limit(&self) -> Result<u32, ApiError>;
}


// @file: src/connectors/rate_limited.rs
// @description: Exchange proxy that holds calls back while the rate-limit budget is low and logs usage after each call.
// @author: LAS.

use crate::core::errors::ApiError;
use crate::core::interfaces::ExchangeApi;
use crate::core::models::{Candle, CandleQuery, Market, RateLimitPolicy};
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Mutex;
use tokio::time::sleep;


//
// PROXY STRUCT
//

/// Wraps an exchange client. Every operation waits for budget first, runs the
/// inner call unchanged, then logs what is left.
pub struct RateLimitedClient<C> {
    inner: C,
    policy: RateLimitPolicy,
    previous_limit: Mutex<Option<u32>>,
}

impl<C: ExchangeApi> RateLimitedClient<C> {
    pub fn new(inner: C, policy: RateLimitPolicy) -> Self {
        RateLimitedClient {
            inner,
            policy,
            previous_limit: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }


    //
    // BUDGET GATE
    //

    async fn wait_for_budget(&self, operation: &str) {
        let mut remaining = match self.inner.remaining_limit().await {
            Ok(limit) => limit,
            Err(e) => {
                warn!("Could not retrieve API rate limit before {}: {}", operation, e);
                return;
            }
        };
        self.set_previous(remaining);

        if remaining >= self.policy.threshold {
            return;
        }

        warn!(
            "Approaching API rate limit ({} < {}), waiting for reset before {}...",
            remaining, self.policy.threshold, operation
        );

        while remaining < self.policy.threshold {
            sleep(self.policy.poll_interval).await;
            remaining = match self.inner.remaining_limit().await {
                Ok(limit) => limit,
                Err(e) => {
                    warn!("Could not retrieve API rate limit while waiting: {}", e);
                    return;
                }
            };
            self.set_previous(remaining);
        }

        debug!("Rate limit recovered to {}, resuming {}", remaining, operation);
    }

    async fn log_rate_limit(&self, operation: &str) {
        match self.inner.remaining_limit().await {
            Ok(limit) => {
                let before = self.set_previous(limit);
                match before {
                    Some(prev) => debug!(
                        "Rate limit remaining: {} ({} weight {})",
                        limit, operation, prev as i64 - limit as i64
                    ),
                    None => debug!("Rate limit remaining: {}", limit),
                }
            }
            Err(e) => warn!("Could not retrieve API rate limit: {}", e),
        }
    }

    fn set_previous(&self, limit: u32) -> Option<u32> {
        match self.previous_limit.lock() {
            Ok(mut guard) => guard.replace(limit),
            Err(_) => None,
        }
    }
}


//
// EXCHANGE INTERFACE
//

#[async_trait]
impl<C: ExchangeApi> ExchangeApi for RateLimitedClient<C> {
    async fn list_markets(&self) -> Result<Vec<Market>, ApiError> {
        self.wait_for_budget("list_markets").await;
        let response = self.inner.list_markets().await;
        self.log_rate_limit("list_markets").await;
        response
    }

    async fn get_candles(
        &self,
        market: &str,
        interval: &str,
        query: &CandleQuery,
    ) -> Result<Vec<Candle>, ApiError> {
        self.wait_for_budget("get_candles").await;
        let response = self.inner.get_candles(market, interval, query).await;
        self.log_rate_limit("get_candles").await;
        response
    }

    async fn remaining_limit(&self) -> Result<u32, ApiError> {
        self.inner.remaining_limit().await
    }
}


//
// UNIT TESTS
//

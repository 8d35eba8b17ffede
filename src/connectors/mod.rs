// @file: src/connectors/mod.rs
// @description: Exchange REST connector and the rate-limit proxy placed in front of it.
// @author: LAS.

pub mod bitvavo_rest;
pub mod rate_limited;

use crate::connectors::bitvavo_rest::BitvavoClient;
use crate::connectors::rate_limited::RateLimitedClient;
use crate::core::errors::ApiError;
use crate::utils::config::AppConfig;

//
// FACTORY FUNCTION
//

/// Builds the signed client and wraps it with the configured throttle.
pub fn build_client(config: &AppConfig) -> Result<RateLimitedClient<BitvavoClient>, ApiError> {
    let client = BitvavoClient::from_config(config)?;
    Ok(RateLimitedClient::new(client, config.rate_limit_policy()))
}

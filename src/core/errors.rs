// @file: src/core/errors.rs
// @description: Error taxonomy for the exchange client, the candle store and ingestion runs.
// @author: LAS.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Authentication rejected: {0}")]
    Unauthorized(String),

    #[error("Invalid response format: {0}")]
    Decode(String),

    #[error("Request signing failed: {0}")]
    Signing(String),
}

impl ApiError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store connection poisoned")]
    Poisoned,
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for IngestError {
    fn from(err: config::ConfigError) -> Self {
        IngestError::Config(err.to_string())
    }
}

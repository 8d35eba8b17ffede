use candle_ingest::connectors;
use candle_ingest::core::errors::IngestError;
use candle_ingest::core::ingestor::Ingestor;
use candle_ingest::storage::candle_store::CandleStore;
use candle_ingest::utils::config::AppConfig;
use log::{error, info};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    // 1. Load .env and configuration
    dotenv::dotenv().ok();
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // 2. Initialize Logger, defaulting to the configured level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level.as_str())).init();

    // 3. Run the selected mode ("history" unless told otherwise)
    let mode = std::env::args().nth(1).unwrap_or_else(|| "history".to_string());
    info!(">>> Candle ingestion starting ({} mode) <<<", mode);

    match run(&config, &mode).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Ingestion run failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &AppConfig, mode: &str) -> Result<(), IngestError> {
    let store = Arc::new(CandleStore::open(&config.database_path)?);
    let client = connectors::build_client(config)?;
    let ingestor = Ingestor::new(client, store, config.pacing())
        .with_history_interval(&config.history_interval);

    match mode {
        "history" => {
            ingestor.fetch_historical_data(config.start_date()?, None).await?;
        }
        "backfill" => {
            ingestor.backfill_all_markets(&config.backfill_interval, config.backfill_limit).await?;
        }
        other => {
            return Err(IngestError::Config(format!(
                "Unknown mode '{}', expected 'history' or 'backfill'", other
            )));
        }
    }
    Ok(())
}

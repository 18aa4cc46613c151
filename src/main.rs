//! Portfolio batch ingestion CLI.
//!
//! # Architecture Overview
//!
//! ```text
//!   --input batch.json
//!          │
//!          ▼
//!   ┌──────────────┐    ┌────────────┐    ┌──────────────────────────────┐
//!   │  validator   │───▶│ normalizer │───▶│ retry executor               │
//!   └──────────────┘    └────────────┘    │   + storage circuit breaker  │
//!                                         │   → transaction coordinator  │──▶ DocumentStore
//!                                         └──────────────┬───────────────┘
//!                                                        ▼
//!   stdout (records, input order)  ◀──────────────  assembler
//!
//!   ┌────────────────────────────────────────────────────────────────────┐
//!   │ Cross-cutting: config · logging · metrics · telemetry exporter     │
//!   │ (own breaker) · shutdown                                           │
//!   └────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use portfolio_ingest::config::{load_config, IngestConfig};
use portfolio_ingest::ingest::{BatchIngestor, IngestError, PortfolioCreateInput};
use portfolio_ingest::lifecycle::Shutdown;
use portfolio_ingest::observability::{logging, metrics};
use portfolio_ingest::resilience::CircuitBreaker;
use portfolio_ingest::store::{DocumentStore, InMemoryStore};
use portfolio_ingest::telemetry::{self, TelemetryExporter};

#[derive(Parser)]
#[command(name = "portfolio-ingest")]
#[command(about = "Create a batch of portfolios atomically", long_about = None)]
struct Cli {
    /// TOML configuration file; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON array of portfolios to create
    #[arg(short, long)]
    input: PathBuf,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => IngestConfig::default(),
    };

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "portfolio-ingest starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryStore::new());
    let storage_breaker = Arc::new(CircuitBreaker::new("storage", config.breakers.storage.clone()));
    let mut ingestor = BatchIngestor::new(store, storage_breaker, &config);

    let mut exporter = None;
    if config.telemetry.enabled {
        let sink = telemetry::from_config(&config.telemetry)?;
        let breaker = Arc::new(CircuitBreaker::new(
            "telemetry_export",
            config.breakers.telemetry_export.clone(),
        ));
        let (handle, task) = TelemetryExporter::start(sink, breaker, &config.telemetry, shutdown.subscribe());
        ingestor = ingestor.with_telemetry(handle);
        exporter = Some(task);
    }

    let raw = std::fs::read_to_string(&cli.input)?;
    let batch: Vec<PortfolioCreateInput> = serde_json::from_str(&raw)?;
    tracing::info!(input = %cli.input.display(), batch_size = batch.len(), "Batch loaded");

    let result = tokio::select! {
        result = ingestor.ingest(batch) => Some(result),
        () = shutdown.trigger_on_ctrl_c() => None,
    };

    // Output is written before the telemetry drain starts.
    let code = match result {
        Some(Ok(records)) => {
            println!("{}", serde_json::to_string_pretty(&records)?);
            ExitCode::SUCCESS
        }
        Some(Err(IngestError::Validation(report))) => {
            eprintln!("Error: {report}");
            eprintln!("{}", serde_json::to_string_pretty(&report)?);
            ExitCode::FAILURE
        }
        Some(Err(e)) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
        None => {
            eprintln!("Interrupted");
            ExitCode::FAILURE
        }
    };

    shutdown.trigger();
    if let Some(task) = exporter {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Telemetry exporter task failed");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(code)
}

//! Atomic batch ingestion of portfolio records.

pub mod config;
pub mod ingest;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod store;
pub mod telemetry;

pub use config::schema::IngestConfig;
pub use ingest::{BatchIngestor, IngestError, PortfolioCreateInput, PortfolioRecord};
pub use lifecycle::Shutdown;

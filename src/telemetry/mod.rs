//! Telemetry export subsystem.
//!
//! # Data Flow
//! ```text
//! BatchIngestor
//!     → TelemetryHandle::record (try_send, never blocks)
//!     → bounded queue
//!     → exporter worker
//!         → RetryExecutor + telemetry_export breaker → TelemetrySink
//!         → on failure: buffer (bounded, oldest dropped)
//!     → reprocess tick: expire old entries, re-export while breaker admits
//!     → shutdown: drain queue, flush buffer once
//! ```
//!
//! # Design Decisions
//! - Export failures never reach the ingest caller
//! - The export breaker is independent of the storage breaker

pub mod exporter;
pub mod sink;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub use exporter::{TelemetryExporter, TelemetryHandle, TelemetryStats};
pub use sink::{from_config, ExportError, HttpTelemetrySink, LogSink, TelemetrySink};

/// Summary of one ingest request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub request_id: Uuid,
    pub batch_size: usize,
    pub outcome: String,
    pub records: usize,
    pub duration_ms: u64,
    pub occurred_at: DateTime<Utc>,
}

//! Telemetry sinks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::TelemetryEvent;
use crate::config::{SinkKind, TelemetryConfig};
use crate::resilience::{Classify, ErrorClass, TimeoutError};

/// Export failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExportError {
    #[error("export timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("collector rejected event with status {status}")]
    Rejected { status: u16 },

    #[error("invalid sink configuration: {0}")]
    Config(String),
}

impl Classify for ExportError {
    fn classify(&self) -> ErrorClass {
        match self {
            ExportError::Timeout(_) | ExportError::Transport(_) => ErrorClass::Recoverable,
            ExportError::Rejected { status } => match status {
                408 | 429 => ErrorClass::Recoverable,
                400..=499 => ErrorClass::Permanent,
                _ => ErrorClass::Recoverable,
            },
            ExportError::Config(_) => ErrorClass::Permanent,
        }
    }
}

impl TimeoutError for ExportError {
    fn timed_out(limit: Duration) -> Self {
        ExportError::Timeout(limit)
    }
}

/// Destination for telemetry events.
#[async_trait]
pub trait TelemetrySink: Send + Sync + 'static {
    async fn export(&self, event: &TelemetryEvent) -> Result<(), ExportError>;
}

/// Posts each event as JSON to a collector endpoint.
#[derive(Debug, Clone)]
pub struct HttpTelemetrySink {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpTelemetrySink {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ExportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExportError::Config(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TelemetrySink for HttpTelemetrySink {
    async fn export(&self, event: &TelemetryEvent) -> Result<(), ExportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(event)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExportError::Timeout(self.timeout)
                } else {
                    ExportError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExportError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Writes events to the structured log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl TelemetrySink for LogSink {
    async fn export(&self, event: &TelemetryEvent) -> Result<(), ExportError> {
        tracing::info!(
            target: "telemetry",
            request_id = %event.request_id,
            batch_size = event.batch_size,
            outcome = %event.outcome,
            records = event.records,
            duration_ms = event.duration_ms,
            "Batch telemetry"
        );
        Ok(())
    }
}

/// Build the sink selected in config.
pub fn from_config(config: &TelemetryConfig) -> Result<Arc<dyn TelemetrySink>, ExportError> {
    match config.sink {
        SinkKind::Log => Ok(Arc::new(LogSink)),
        SinkKind::Http => {
            let sink = HttpTelemetrySink::new(
                config.endpoint.clone(),
                Duration::from_secs(config.export_timeout_secs),
            )?;
            Ok(Arc::new(sink))
        }
    }
}

//! Batch ingestion pipeline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::Instrument;
use uuid::Uuid;

use super::assembler::assemble;
use super::normalizer::{normalize, Clock, SystemClock};
use super::transaction::TransactionCoordinator;
use super::types::{FailureKind, IngestError, PortfolioCreateInput, PortfolioRecord};
use super::validator::validate;
use crate::config::IngestConfig;
use crate::observability::metrics;
use crate::resilience::{CircuitBreaker, RetryError, RetryExecutor, RetryPolicy};
use crate::store::{DocumentStore, StoreError};
use crate::telemetry::{TelemetryEvent, TelemetryHandle};

/// Validates, persists and returns one batch of portfolios at a time.
///
/// Cloning is cheap; clones share the store, breaker and telemetry queue.
#[derive(Clone)]
pub struct BatchIngestor {
    coordinator: TransactionCoordinator,
    executor: RetryExecutor,
    clock: Arc<dyn Clock>,
    request_timeout: Duration,
    telemetry: Option<TelemetryHandle>,
}

impl BatchIngestor {
    pub fn new(store: Arc<dyn DocumentStore>, storage_breaker: Arc<CircuitBreaker>, config: &IngestConfig) -> Self {
        Self {
            coordinator: TransactionCoordinator::new(store, config.timeouts.store_call()),
            executor: RetryExecutor::new(RetryPolicy::from(&config.retries), storage_breaker),
            clock: Arc::new(SystemClock),
            request_timeout: config.timeouts.request(),
            telemetry: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryHandle) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn storage_breaker(&self) -> &Arc<CircuitBreaker> {
        self.executor.breaker()
    }

    /// Persist every portfolio in `batch` atomically.
    ///
    /// On success the records are returned in input order. On failure
    /// nothing has been persisted.
    pub async fn ingest(&self, batch: Vec<PortfolioCreateInput>) -> Result<Vec<PortfolioRecord>, IngestError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("ingest_batch", %request_id, batch_size = batch.len());
        self.run(request_id, batch).instrument(span).await
    }

    async fn run(&self, request_id: Uuid, batch: Vec<PortfolioCreateInput>) -> Result<Vec<PortfolioRecord>, IngestError> {
        let start = Instant::now();
        let result = self.process(&batch).await;

        let (outcome, records) = match &result {
            Ok(records) => ("success", records.len()),
            Err(e) => (e.outcome(), 0),
        };
        metrics::record_batch(outcome, records, start);

        match &result {
            Ok(records) => tracing::info!(records = records.len(), "Batch ingested"),
            Err(IngestError::Validation(report)) => {
                tracing::info!(violations = report.len(), "Batch rejected by validation")
            }
            Err(IngestError::Unavailable(kind)) => tracing::error!(kind = kind.as_str(), "Batch ingest failed"),
        }

        if let Some(telemetry) = &self.telemetry {
            telemetry.record(TelemetryEvent {
                request_id,
                batch_size: batch.len(),
                outcome: outcome.to_string(),
                records,
                duration_ms: start.elapsed().as_millis() as u64,
                occurred_at: Utc::now(),
            });
        }

        result
    }

    async fn process(&self, batch: &[PortfolioCreateInput]) -> Result<Vec<PortfolioRecord>, IngestError> {
        validate(batch)?;

        let entities = normalize(batch, self.clock.now());
        let coordinator = &self.coordinator;
        let attempts = self
            .executor
            .execute("storage.insert_batch", |_| coordinator.commit(&entities));

        let persisted = match tokio::time::timeout(self.request_timeout, attempts).await {
            Ok(Ok(persisted)) => persisted,
            Ok(Err(e)) => return Err(unavailable(e)),
            Err(_) => {
                tracing::error!(
                    timeout_secs = self.request_timeout.as_secs(),
                    "Request deadline exceeded, in-flight transaction abandoned"
                );
                return Err(IngestError::Unavailable(FailureKind::DeadlineExceeded));
            }
        };

        Ok(assemble(batch.len(), persisted))
    }
}

fn unavailable(error: RetryError<StoreError>) -> IngestError {
    let kind = match &error {
        RetryError::CircuitOpen { .. } => FailureKind::CircuitOpen,
        RetryError::Permanent { .. } => FailureKind::Permanent,
        RetryError::RetriesExhausted { .. } => FailureKind::RetriesExhausted,
    };
    tracing::error!(
        kind = kind.as_str(),
        attempts = error.attempts(),
        error = %error,
        "Storage write failed"
    );
    IngestError::Unavailable(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use crate::ingest::normalizer::FixedClock;
    use crate::store::{Fault, InMemoryStore};
    use chrono::TimeZone;

    fn ingestor(store: &Arc<InMemoryStore>) -> BatchIngestor {
        let config = IngestConfig::default();
        let breaker = Arc::new(CircuitBreaker::new("storage", config.breakers.storage.clone()));
        BatchIngestor::new(store.clone(), breaker, &config)
    }

    #[tokio::test]
    async fn test_defaults_applied_from_clock() {
        let store = Arc::new(InMemoryStore::new());
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        let ingestor = ingestor(&store).with_clock(Arc::new(FixedClock(now)));

        let records = ingestor.ingest(vec![PortfolioCreateInput::new("Core")]).await.unwrap();

        assert_eq!(records[0].created_at, now);
        assert_eq!(records[0].version, 1);
        assert!(!records[0].id.as_str().is_empty());
    }

    #[tokio::test]
    async fn test_validation_failure_never_touches_store() {
        let store = Arc::new(InMemoryStore::new());
        let err = ingestor(&store).ingest(vec![]).await.unwrap_err();

        assert!(matches!(err, IngestError::Validation(_)));
        assert_eq!(store.begin_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_deadline_abandons_attempt() {
        let store = Arc::new(InMemoryStore::new());
        let mut config = IngestConfig::default();
        config.timeouts.request_secs = 5;
        let breaker = Arc::new(CircuitBreaker::new("storage", CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout_secs: 30,
            success_threshold: 3,
        }));
        let ingestor = BatchIngestor::new(store.clone(), breaker, &config);
        store.push_fault(Fault::Delay(Duration::from_secs(8)));

        let err = ingestor.ingest(vec![PortfolioCreateInput::new("Slow")]).await.unwrap_err();
        assert!(matches!(err, IngestError::Unavailable(FailureKind::DeadlineExceeded)));
        assert_eq!(err.to_string(), "internal server error");

        tokio::task::yield_now().await;
        assert_eq!(store.open_sessions(), 0);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}

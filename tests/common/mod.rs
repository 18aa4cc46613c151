//! Shared utilities for integration tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use portfolio_ingest::config::IngestConfig;
use portfolio_ingest::ingest::{BatchIngestor, PortfolioCreateInput};
use portfolio_ingest::resilience::CircuitBreaker;
use portfolio_ingest::store::{InMemoryStore, StoreError};
use portfolio_ingest::telemetry::{ExportError, TelemetryEvent, TelemetrySink};

/// An ingestor wired to an in-memory store and its own storage breaker.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub breaker: Arc<CircuitBreaker>,
    pub ingestor: BatchIngestor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(IngestConfig::default())
    }

    pub fn with_config(config: IngestConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let breaker = Arc::new(CircuitBreaker::new("storage", config.breakers.storage.clone()));
        let ingestor = BatchIngestor::new(store.clone(), breaker.clone(), &config);
        Self {
            store,
            breaker,
            ingestor,
        }
    }
}

/// `n` inputs with distinct names.
pub fn batch(n: usize) -> Vec<PortfolioCreateInput> {
    (0..n)
        .map(|i| PortfolioCreateInput::new(format!("Portfolio {i:03}")))
        .collect()
}

/// Inputs with the given names.
#[allow(dead_code)]
pub fn named(names: &[&str]) -> Vec<PortfolioCreateInput> {
    names.iter().map(|n| PortfolioCreateInput::new(*n)).collect()
}

/// A failover-style error the executor retries.
#[allow(dead_code)]
pub fn transient() -> StoreError {
    StoreError::Command {
        code: 189,
        message: "primary stepped down".into(),
    }
}

/// A constraint violation the executor does not retry.
#[allow(dead_code)]
pub fn permanent() -> StoreError {
    StoreError::DuplicateKey("portfolios.name_1".into())
}

/// Telemetry sink that can be switched between failing and healthy.
#[allow(dead_code)]
#[derive(Default)]
pub struct FlakySink {
    pub failing: AtomicBool,
    pub attempts: AtomicU32,
    pub delivered: AtomicU32,
}

#[allow(dead_code)]
impl FlakySink {
    pub fn failing() -> Arc<Self> {
        let sink = Self::default();
        sink.failing.store(true, Ordering::SeqCst);
        Arc::new(sink)
    }
}

#[async_trait]
impl TelemetrySink for FlakySink {
    async fn export(&self, _event: &TelemetryEvent) -> Result<(), ExportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ExportError::Transport("collector unreachable".into()));
        }
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Telemetry sink whose exports never finish on their own.
#[allow(dead_code)]
#[derive(Default)]
pub struct HangingSink {
    pub attempts: AtomicU32,
}

#[async_trait]
impl TelemetrySink for HangingSink {
    async fn export(&self, _event: &TelemetryEvent) -> Result<(), ExportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

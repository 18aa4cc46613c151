//! Background telemetry exporter.
//!
//! # Responsibilities
//! - Accept events without ever blocking or failing the caller
//! - Export through the telemetry breaker with bounded retries
//! - Hold failed events in a bounded buffer and retry them periodically
//! - Drain and flush once on shutdown, within one overall deadline
//!
//! Shutdown interrupts an in-flight export or buffer sweep; the
//! interrupted event is kept for the flush.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::sink::{ExportError, TelemetrySink};
use super::TelemetryEvent;
use crate::config::TelemetryConfig;
use crate::observability::metrics;
use crate::resilience::{bounded, CircuitBreaker, Classify, ErrorClass, RetryError, RetryExecutor, RetryPolicy};

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    buffered: AtomicUsize,
}

impl Counters {
    fn drop_events(&self, reason: &'static str, count: u64) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
        metrics::record_telemetry_drop(reason, count);
    }
}

/// Exporter counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TelemetryStats {
    /// Events accepted by the sink.
    pub processed: u64,
    /// Export attempts that ended without delivery (retried or not).
    pub failed: u64,
    /// Events currently waiting in the retry buffer.
    pub buffered: usize,
    /// Events that will never be delivered.
    pub dropped: u64,
}

/// Producer side of the exporter queue.
#[derive(Debug, Clone)]
pub struct TelemetryHandle {
    tx: mpsc::Sender<TelemetryEvent>,
    counters: Arc<Counters>,
}

impl TelemetryHandle {
    /// Enqueue an event. Drops it if the queue is full or the exporter has
    /// stopped.
    pub fn record(&self, event: TelemetryEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(request_id = %event.request_id, "Telemetry queue full, event dropped");
                self.counters.drop_events("queue_full", 1);
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::debug!(request_id = %event.request_id, "Telemetry exporter stopped, event dropped");
                self.counters.drop_events("exporter_stopped", 1);
            }
        }
    }

    pub fn stats(&self) -> TelemetryStats {
        TelemetryStats {
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            buffered: self.counters.buffered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

struct Buffered {
    event: TelemetryEvent,
    since: Instant,
}

/// Worker that owns the sink, the retry buffer and the export breaker.
pub struct TelemetryExporter {
    sink: Arc<dyn TelemetrySink>,
    executor: RetryExecutor,
    export_timeout: Duration,
    buffer: VecDeque<Buffered>,
    buffer_capacity: usize,
    buffer_max_age: Duration,
    reprocess_interval: Duration,
    flush_timeout: Duration,
    counters: Arc<Counters>,
}

impl TelemetryExporter {
    /// Spawn the exporter worker.
    ///
    /// The worker stops when `shutdown` fires or every handle is dropped,
    /// after flushing what it still holds.
    pub fn start(
        sink: Arc<dyn TelemetrySink>,
        breaker: Arc<CircuitBreaker>,
        config: &TelemetryConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> (TelemetryHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let counters = Arc::new(Counters::default());
        let policy = RetryPolicy {
            max_retries: config.max_export_retries,
            ..RetryPolicy::default()
        };

        let exporter = Self {
            sink,
            executor: RetryExecutor::new(policy, breaker),
            export_timeout: Duration::from_secs(config.export_timeout_secs),
            buffer: VecDeque::new(),
            buffer_capacity: config.buffer_capacity,
            buffer_max_age: Duration::from_secs(config.buffer_max_age_secs),
            reprocess_interval: Duration::from_secs(config.reprocess_interval_secs.max(1)),
            flush_timeout: Duration::from_secs(config.flush_timeout_secs),
            counters: Arc::clone(&counters),
        };

        tracing::info!(
            queue_capacity = config.queue_capacity,
            buffer_capacity = config.buffer_capacity,
            reprocess_interval_secs = config.reprocess_interval_secs,
            "Telemetry exporter started"
        );

        let task = tokio::spawn(exporter.run(rx, shutdown));
        (TelemetryHandle { tx, counters }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<TelemetryEvent>, mut shutdown: broadcast::Receiver<()>) {
        let mut reprocess = tokio::time::interval_at(Instant::now() + self.reprocess_interval, self.reprocess_interval);
        reprocess.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let result = tokio::select! {
                        biased;
                        _ = shutdown.recv() => None,
                        result = self.export(&event) => Some(result),
                    };
                    match result {
                        Some(result) => self.settle(event, result),
                        None => {
                            // Interrupted mid-export; the flush gets one more try.
                            self.push_buffer(event);
                            break;
                        }
                    }
                }
                _ = reprocess.tick() => {
                    let interrupted = tokio::select! {
                        biased;
                        _ = shutdown.recv() => true,
                        () = self.reprocess() => false,
                    };
                    if interrupted {
                        break;
                    }
                }
            }
        }

        self.flush(rx).await;
    }

    async fn export(&self, event: &TelemetryEvent) -> Result<(), RetryError<ExportError>> {
        let sink = &self.sink;
        let limit = self.export_timeout;
        self.executor
            .execute("telemetry.export", |_| bounded(limit, sink.export(event)))
            .await
    }

    fn settle(&mut self, event: TelemetryEvent, result: Result<(), RetryError<ExportError>>) {
        match result {
            Ok(()) => {
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(RetryError::Permanent { error, .. }) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(request_id = %event.request_id, error = %error, "Telemetry event rejected, dropped");
                self.counters.drop_events("rejected", 1);
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(request_id = %event.request_id, error = %e, "Telemetry export deferred");
                self.push_buffer(event);
            }
        }
    }

    fn push_buffer(&mut self, event: TelemetryEvent) {
        if self.buffer_capacity == 0 {
            self.counters.drop_events("buffer_overflow", 1);
            return;
        }
        if self.buffer.len() >= self.buffer_capacity {
            self.buffer.pop_front();
            self.counters.drop_events("buffer_overflow", 1);
        }
        self.buffer.push_back(Buffered {
            event,
            since: Instant::now(),
        });
        self.sync_buffered();
    }

    fn sync_buffered(&self) {
        self.counters.buffered.store(self.buffer.len(), Ordering::Relaxed);
    }

    /// Drop expired entries, then give every remaining entry one attempt
    /// while the breaker admits calls.
    ///
    /// An entry leaves the buffer only after its export settles, so
    /// cancelling the sweep loses nothing.
    async fn reprocess(&mut self) {
        let max_age = self.buffer_max_age;
        let before = self.buffer.len();
        self.buffer.retain(|entry| entry.since.elapsed() < max_age);
        let expired = before - self.buffer.len();
        if expired > 0 {
            tracing::warn!(expired, "Expired telemetry events dropped");
            self.counters.drop_events("expired", expired as u64);
        }
        self.sync_buffered();

        let pending = self.buffer.len();
        let breaker = Arc::clone(self.executor.breaker());
        let mut delivered = 0;

        for _ in 0..pending {
            let Some(entry) = self.buffer.front() else {
                break;
            };
            let Ok(permit) = breaker.try_acquire() else {
                break;
            };

            let result = bounded(self.export_timeout, self.sink.export(&entry.event)).await;
            let Some(entry) = self.buffer.pop_front() else {
                break;
            };
            match result {
                Ok(()) => {
                    permit.record_success();
                    delivered += 1;
                    self.counters.processed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    permit.record_failure();
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    if e.classify() == ErrorClass::Permanent {
                        tracing::warn!(request_id = %entry.event.request_id, error = %e, "Telemetry event rejected, dropped");
                        self.counters.drop_events("rejected", 1);
                    } else {
                        self.buffer.push_back(entry);
                    }
                }
            }
            self.sync_buffered();
        }

        if pending > 0 {
            tracing::debug!(pending, delivered, remaining = self.buffer.len(), "Telemetry buffer reprocessed");
        }
    }

    /// Export everything still held, once each, without consulting the
    /// breaker. The whole flush shares one deadline; whatever is left when
    /// it passes is dropped.
    async fn flush(mut self, mut rx: mpsc::Receiver<TelemetryEvent>) {
        rx.close();
        let mut pending: Vec<TelemetryEvent> = self.buffer.drain(..).map(|entry| entry.event).collect();
        while let Some(event) = rx.recv().await {
            pending.push(event);
        }
        self.sync_buffered();

        let deadline = Instant::now() + self.flush_timeout;
        let total = pending.len();
        let mut flushed = 0;
        for (i, event) in pending.iter().enumerate() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let abandoned = total - i;
                self.counters.drop_events("shutdown", abandoned as u64);
                tracing::warn!(
                    abandoned,
                    flush_timeout_secs = self.flush_timeout.as_secs(),
                    "Telemetry flush deadline reached, events dropped"
                );
                break;
            }

            match bounded(remaining.min(self.export_timeout), self.sink.export(event)).await {
                Ok(()) => {
                    flushed += 1;
                    self.counters.processed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    self.counters.drop_events("shutdown", 1);
                    tracing::warn!(request_id = %event.request_id, error = %e, "Telemetry event lost at shutdown");
                }
            }
        }

        tracing::info!(flushed, total, "Telemetry exporter stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use crate::lifecycle::Shutdown;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct ScriptedSink {
        failing: AtomicBool,
        reject: AtomicBool,
        hang: AtomicBool,
        exported: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl TelemetrySink for ScriptedSink {
        async fn export(&self, event: &TelemetryEvent) -> Result<(), ExportError> {
            if self.hang.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.reject.load(Ordering::SeqCst) {
                return Err(ExportError::Rejected { status: 400 });
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(ExportError::Transport("connection refused".into()));
            }
            self.exported.lock().unwrap().push(event.request_id);
            Ok(())
        }
    }

    impl ScriptedSink {
        fn exported(&self) -> usize {
            self.exported.lock().unwrap().len()
        }
    }

    fn event() -> TelemetryEvent {
        TelemetryEvent {
            request_id: Uuid::new_v4(),
            batch_size: 1,
            outcome: "success".into(),
            records: 1,
            duration_ms: 5,
            occurred_at: Utc::now(),
        }
    }

    fn breaker() -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "telemetry_export",
            CircuitBreakerConfig {
                failure_threshold: 3,
                recovery_timeout_secs: 60,
                success_threshold: 2,
            },
        ))
    }

    fn config() -> TelemetryConfig {
        TelemetryConfig {
            enabled: true,
            ..TelemetryConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exports_queued_events() {
        let sink = Arc::new(ScriptedSink::default());
        let shutdown = Shutdown::new();
        let (handle, task) = TelemetryExporter::start(sink.clone(), breaker(), &config(), shutdown.subscribe());

        for _ in 0..3 {
            handle.record(event());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.stats().processed, 3);

        shutdown.trigger();
        task.await.unwrap();
        assert_eq!(sink.exported(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_drops_events() {
        let sink = Arc::new(ScriptedSink::default());
        let shutdown = Shutdown::new();
        let config = TelemetryConfig {
            queue_capacity: 1,
            ..config()
        };
        let (handle, _task) = TelemetryExporter::start(sink, breaker(), &config, shutdown.subscribe());

        for _ in 0..3 {
            handle.record(event());
        }
        assert_eq!(handle.stats().dropped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_export_is_buffered_and_reprocessed() {
        let sink = Arc::new(ScriptedSink::default());
        sink.failing.store(true, Ordering::SeqCst);
        let breaker = breaker();
        let shutdown = Shutdown::new();
        let (handle, _task) = TelemetryExporter::start(sink.clone(), breaker.clone(), &config(), shutdown.subscribe());

        handle.record(event());
        tokio::time::sleep(Duration::from_secs(10)).await;
        let stats = handle.stats();
        assert_eq!(stats.buffered, 1);
        assert_eq!(stats.failed, 1);
        assert!(breaker.try_acquire().is_err());

        sink.failing.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(90)).await;
        let stats = handle.stats();
        assert_eq!(stats.buffered, 0);
        assert_eq!(stats.processed, 1);
        assert_eq!(sink.exported(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_event_is_dropped() {
        let sink = Arc::new(ScriptedSink::default());
        sink.reject.store(true, Ordering::SeqCst);
        let shutdown = Shutdown::new();
        let (handle, _task) = TelemetryExporter::start(sink, breaker(), &config(), shutdown.subscribe());

        handle.record(event());
        tokio::time::sleep(Duration::from_millis(10)).await;
        let stats = handle.stats();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.buffered, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffer_overflow_drops_oldest() {
        let sink = Arc::new(ScriptedSink::default());
        let breaker = breaker();
        breaker.force_open();
        let shutdown = Shutdown::new();
        let config = TelemetryConfig {
            buffer_capacity: 2,
            ..config()
        };
        let (handle, _task) = TelemetryExporter::start(sink, breaker, &config, shutdown.subscribe());

        for _ in 0..3 {
            handle.record(event());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        let stats = handle.stats();
        assert_eq!(stats.buffered, 2);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_dropped() {
        let sink = Arc::new(ScriptedSink::default());
        let breaker = breaker();
        breaker.force_open();
        let shutdown = Shutdown::new();
        let config = TelemetryConfig {
            buffer_max_age_secs: 40,
            reprocess_interval_secs: 30,
            ..config()
        };
        let (handle, _task) = TelemetryExporter::start(sink.clone(), breaker, &config, shutdown.subscribe());

        handle.record(event());
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(handle.stats().buffered, 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        let stats = handle.stats();
        assert_eq!(stats.buffered, 0);
        assert_eq!(stats.dropped, 1);
        assert_eq!(sink.exported(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flush_bypasses_breaker() {
        let sink = Arc::new(ScriptedSink::default());
        let breaker = breaker();
        breaker.force_open();
        let shutdown = Shutdown::new();
        let (handle, task) = TelemetryExporter::start(sink.clone(), breaker, &config(), shutdown.subscribe());

        handle.record(event());
        handle.record(event());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.stats().buffered, 2);

        shutdown.trigger();
        task.await.unwrap();
        assert_eq!(sink.exported(), 2);
        assert_eq!(handle.stats().processed, 2);
        assert_eq!(handle.stats().buffered, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cuts_hung_export_short() {
        let sink = Arc::new(ScriptedSink::default());
        sink.hang.store(true, Ordering::SeqCst);
        let shutdown = Shutdown::new();
        let (handle, task) = TelemetryExporter::start(sink.clone(), breaker(), &config(), shutdown.subscribe());

        for _ in 0..20 {
            handle.record(event());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        let start = Instant::now();
        shutdown.trigger();
        task.await.unwrap();

        assert!(start.elapsed() <= Duration::from_secs(config().flush_timeout_secs));
        let stats = handle.stats();
        assert_eq!(stats.processed, 0);
        assert_eq!(stats.dropped, 20);
        assert_eq!(stats.buffered, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_export_is_flushed() {
        let sink = Arc::new(ScriptedSink::default());
        sink.failing.store(true, Ordering::SeqCst);
        let shutdown = Shutdown::new();
        let (handle, task) = TelemetryExporter::start(sink.clone(), breaker(), &config(), shutdown.subscribe());

        handle.record(event());
        // First attempt failed, worker is in its 1s backoff.
        tokio::time::sleep(Duration::from_millis(500)).await;
        sink.failing.store(false, Ordering::SeqCst);

        let start = Instant::now();
        shutdown.trigger();
        task.await.unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(sink.exported(), 1);
        assert_eq!(handle.stats().processed, 1);
    }
}

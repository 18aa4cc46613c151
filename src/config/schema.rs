//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the ingest
//! service. All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the batch ingest service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct IngestConfig {
    /// Retry schedule for recoverable storage failures.
    pub retries: RetryConfig,

    /// Deadlines for whole requests and single store calls.
    pub timeouts: TimeoutConfig,

    /// Circuit breaker settings, one per protected call path.
    pub breakers: BreakersConfig,

    /// Best-effort telemetry export.
    pub telemetry: TelemetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds.
    pub base_delay_ms: u64,

    /// Growth factor applied to the delay after every retry.
    pub multiplier: u64,

    /// Upper bound for a single delay in milliseconds.
    pub max_delay_ms: u64,

    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            multiplier: 2,
            max_delay_ms: 60_000,
            jitter: false,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Caller deadline for a whole batch, retries included, in seconds.
    pub request_secs: u64,

    /// Deadline for one transactional attempt against the store in seconds.
    pub store_call_secs: u64,
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn store_call(&self) -> Duration {
        Duration::from_secs(self.store_call_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            store_call_secs: 10,
        }
    }
}

/// Thresholds for a single circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed before the breaker opens.
    pub failure_threshold: u32,

    /// Seconds spent Open before trial calls are let through.
    pub recovery_timeout_secs: u64,

    /// Successful trial calls needed to close from HalfOpen.
    pub success_threshold: u32,
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

/// Breaker settings for the storage write path and the telemetry export path.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakersConfig {
    pub storage: CircuitBreakerConfig,
    pub telemetry_export: CircuitBreakerConfig,
}

impl Default for BreakersConfig {
    fn default() -> Self {
        Self {
            storage: CircuitBreakerConfig {
                failure_threshold: 5,
                recovery_timeout_secs: 30,
                success_threshold: 3,
            },
            telemetry_export: CircuitBreakerConfig {
                failure_threshold: 3,
                recovery_timeout_secs: 60,
                success_threshold: 2,
            },
        }
    }
}

/// Where telemetry events are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Write events to the structured log.
    Log,
    /// POST events as JSON to `endpoint`.
    Http,
}

/// Telemetry export configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Enable telemetry export.
    pub enabled: bool,

    /// Sink implementation.
    pub sink: SinkKind,

    /// Collector URL, required for the http sink.
    pub endpoint: String,

    /// Pending events held before new ones are dropped.
    pub queue_capacity: usize,

    /// Failed events kept for later re-export.
    pub buffer_capacity: usize,

    /// Buffered events older than this are discarded, in seconds.
    pub buffer_max_age_secs: u64,

    /// How often the buffer is swept, in seconds.
    pub reprocess_interval_secs: u64,

    /// Deadline for a single export call in seconds.
    pub export_timeout_secs: u64,

    /// Retries per export after the initial attempt.
    pub max_export_retries: u32,

    /// Overall deadline for the shutdown flush in seconds.
    pub flush_timeout_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sink: SinkKind::Log,
            endpoint: String::new(),
            queue_capacity: 1000,
            buffer_capacity: 1000,
            buffer_max_age_secs: 300,
            reprocess_interval_secs: 30,
            export_timeout_secs: 30,
            max_export_retries: 3,
            flush_timeout_secs: 10,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

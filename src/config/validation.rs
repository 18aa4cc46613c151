//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, delays ordered, addresses parse)
//! - Check the telemetry sink has what it needs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: IngestConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{CircuitBreakerConfig, IngestConfig, SinkKind};

/// A single semantic problem in a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Check every semantic rule and report all violations together.
pub fn validate_config(config: &IngestConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let retries = &config.retries;
    if retries.base_delay_ms == 0 {
        errors.push(ValidationError::new("retries.base_delay_ms", "must be greater than 0"));
    }
    if retries.multiplier == 0 {
        errors.push(ValidationError::new("retries.multiplier", "must be at least 1"));
    }
    if retries.max_delay_ms < retries.base_delay_ms {
        errors.push(ValidationError::new(
            "retries.max_delay_ms",
            "must not be smaller than retries.base_delay_ms",
        ));
    }

    let timeouts = &config.timeouts;
    if timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if timeouts.store_call_secs == 0 {
        errors.push(ValidationError::new("timeouts.store_call_secs", "must be greater than 0"));
    }
    if timeouts.store_call_secs > timeouts.request_secs {
        errors.push(ValidationError::new(
            "timeouts.store_call_secs",
            "must not exceed timeouts.request_secs",
        ));
    }

    check_breaker("breakers.storage", &config.breakers.storage, &mut errors);
    check_breaker("breakers.telemetry_export", &config.breakers.telemetry_export, &mut errors);

    let telemetry = &config.telemetry;
    if telemetry.enabled {
        if telemetry.sink == SinkKind::Http && telemetry.endpoint.trim().is_empty() {
            errors.push(ValidationError::new(
                "telemetry.endpoint",
                "required when telemetry.sink = \"http\"",
            ));
        }
        if telemetry.queue_capacity == 0 {
            errors.push(ValidationError::new("telemetry.queue_capacity", "must be greater than 0"));
        }
        if telemetry.buffer_capacity == 0 {
            errors.push(ValidationError::new("telemetry.buffer_capacity", "must be greater than 0"));
        }
        if telemetry.reprocess_interval_secs == 0 {
            errors.push(ValidationError::new(
                "telemetry.reprocess_interval_secs",
                "must be greater than 0",
            ));
        }
        if telemetry.export_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "telemetry.export_timeout_secs",
                "must be greater than 0",
            ));
        }
        if telemetry.flush_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "telemetry.flush_timeout_secs",
                "must be greater than 0",
            ));
        }
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_breaker(prefix: &str, breaker: &CircuitBreakerConfig, errors: &mut Vec<ValidationError>) {
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new(
            format!("{prefix}.failure_threshold"),
            "must be greater than 0",
        ));
    }
    if breaker.success_threshold == 0 {
        errors.push(ValidationError::new(
            format!("{prefix}.success_threshold"),
            "must be greater than 0",
        ));
    }
    if breaker.recovery_timeout_secs == 0 {
        errors.push(ValidationError::new(
            format!("{prefix}.recovery_timeout_secs"),
            "must be greater than 0",
        ));
    }
}

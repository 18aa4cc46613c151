//! Retry executor for breaker-protected calls.
//!
//! # Responsibilities
//! - Ask the breaker before every attempt, including the first
//! - Report every attempt outcome to the breaker
//! - Stop at the first permanent failure
//! - Back off exponentially between recoverable failures
//!
//! # Attempt Loop
//! ```text
//! breaker.try_acquire ── rejected ──▶ CircuitOpen (operation not invoked)
//!        │
//!        ▼
//!   operation(attempt)
//!        ├─ Ok ─────────────────────▶ success
//!        ├─ Permanent ──────────────▶ Permanent
//!        └─ Recoverable
//!             ├─ breaker now open ──▶ CircuitOpen (no sleep)
//!             ├─ attempts left ─────▶ sleep(backoff) → loop
//!             └─ none left ─────────▶ RetriesExhausted
//! ```

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::RetryConfig;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::resilience::classify::{Classify, ErrorClass};

/// Retry budget and delay schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl RetryPolicy {
    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            self.base_delay_ms,
            self.multiplier,
            self.max_delay_ms,
            self.jitter,
        )
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            multiplier: config.multiplier,
            max_delay_ms: config.max_delay_ms,
            jitter: config.jitter,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// Why a protected call did not produce a value.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("circuit breaker '{breaker}' rejected the call after {attempts} attempt(s)")]
    CircuitOpen { breaker: String, attempts: u32 },

    #[error("permanent failure on attempt {attempts}: {error}")]
    Permanent { attempts: u32, error: E },

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    /// Attempts that actually invoked the operation.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::CircuitOpen { attempts, .. }
            | RetryError::Permanent { attempts, .. }
            | RetryError::RetriesExhausted { attempts, .. } => *attempts,
        }
    }

    /// The last failure returned by the operation, if any.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::CircuitOpen { .. } => None,
            RetryError::Permanent { error, .. } => Some(error),
            RetryError::RetriesExhausted { last, .. } => Some(last),
        }
    }
}

/// Runs an operation under a retry policy and a circuit breaker.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, breaker: Arc<CircuitBreaker>) -> Self {
        Self { policy, breaker }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run `op` until it succeeds, fails permanently, exhausts the retry
    /// budget or is refused by the breaker.
    ///
    /// `op` receives the 1-based attempt number. Dropping the returned
    /// future cancels the current attempt or backoff sleep.
    pub async fn execute<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempts = 0;

        loop {
            let permit = match self.breaker.try_acquire() {
                Ok(permit) => permit,
                Err(open) => {
                    tracing::warn!(
                        operation,
                        breaker = %open.breaker,
                        attempts,
                        "Call refused by circuit breaker"
                    );
                    return Err(RetryError::CircuitOpen {
                        breaker: open.breaker,
                        attempts,
                    });
                }
            };

            attempts += 1;
            let error = match op(attempts).await {
                Ok(value) => {
                    permit.record_success();
                    if attempts > 1 {
                        tracing::info!(operation, attempts, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    permit.record_failure();
                    error
                }
            };

            match error.classify() {
                ErrorClass::Permanent => {
                    tracing::warn!(operation, attempt = attempts, error = %error, "Permanent failure, not retrying");
                    return Err(RetryError::Permanent { attempts, error });
                }
                ErrorClass::Recoverable if attempts >= max_attempts => {
                    tracing::error!(operation, attempts, error = %error, "Retry budget exhausted");
                    return Err(RetryError::RetriesExhausted { attempts, last: error });
                }
                ErrorClass::Recoverable if self.breaker.state() == CircuitState::Open => {
                    tracing::warn!(
                        operation,
                        breaker = %self.breaker.name(),
                        attempts,
                        error = %error,
                        "Circuit breaker opened, not retrying"
                    );
                    return Err(RetryError::CircuitOpen {
                        breaker: self.breaker.name().to_string(),
                        attempts,
                    });
                }
                ErrorClass::Recoverable => {
                    let delay = self.policy.delay_for(attempts);
                    tracing::warn!(
                        operation,
                        attempt = attempts,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Recoverable failure, retrying"
                    );
                    metrics::record_retry(operation);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

//! Circuit breaker for protected call paths.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: a limited number of trial calls test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: recovery timeout elapsed (checked on the next admission)
//! Half-Open → Closed: trial successes >= success_threshold
//! Half-Open → Open: any trial failure (open-since timestamp reset)
//! ```
//!
//! # Design Decisions
//! - One breaker per call path, shared by `Arc`, never global
//! - State transitions serialized by a mutex; current state mirrored in an
//!   atomic for lock-free reads
//! - Callers hold a [`CallPermit`] for the duration of the call; outcomes
//!   reported on a permit from an earlier generation only update statistics
//! - Uses Tokio's clock so paused-time tests drive recovery deterministically

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Breaker state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl From<u8> for CircuitState {
    fn from(val: u8) -> Self {
        match val {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }
}

/// A call was rejected because the breaker is not admitting traffic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit breaker '{breaker}' is {state}")]
pub struct CircuitOpen {
    pub breaker: String,
    pub state: &'static str,
}

/// Lifetime counters for one breaker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BreakerStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub closed_to_open: u64,
    pub open_to_half_open: u64,
    pub half_open_to_closed: u64,
    pub half_open_to_open: u64,
}

/// Point-in-time view of a breaker, suitable for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    pub stats: BreakerStats,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    /// Bumped on every transition.
    generation: u64,
    consecutive_failures: u32,
    half_open_successes: u32,
    half_open_in_flight: u32,
    opened_at: Option<Instant>,
    stats: BreakerStats,
}

/// Consecutive-failure circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: AtomicU8,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        tracing::info!(
            breaker = %name,
            failure_threshold = config.failure_threshold,
            recovery_timeout_secs = config.recovery_timeout_secs,
            success_threshold = config.success_threshold,
            "Circuit breaker initialized"
        );
        metrics::record_breaker_state(&name, CircuitState::Closed as u8);

        Self {
            name,
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                generation: 0,
                consecutive_failures: 0,
                half_open_successes: 0,
                half_open_in_flight: 0,
                opened_at: None,
                stats: BreakerStats::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Last recorded state. An Open breaker whose recovery timeout has
    /// elapsed still reads Open until the next admission check.
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Ask to make a call.
    ///
    /// The returned permit must be settled with
    /// [`CallPermit::record_success`] or [`CallPermit::record_failure`];
    /// dropping it unsettled releases a half-open trial slot without
    /// counting an outcome.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, CircuitOpen> {
        let mut inner = self.lock();
        inner.stats.total_calls += 1;

        let state = inner.state;
        let trial = match state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let recovered = inner
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.config.recovery_timeout());
                if !recovered {
                    return Err(self.reject(inner));
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                true
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight >= self.config.success_threshold {
                    return Err(self.reject(inner));
                }
                true
            }
        };

        if trial {
            inner.half_open_in_flight += 1;
        }

        Ok(CallPermit {
            breaker: self,
            generation: inner.generation,
            trial,
            settled: false,
        })
    }

    /// Open the breaker regardless of its counters.
    pub fn force_open(&self) {
        let mut inner = self.lock();
        tracing::warn!(breaker = %self.name, from = inner.state.as_str(), "Circuit breaker manually opened");
        if inner.state == CircuitState::Open {
            inner.opened_at = Some(Instant::now());
        } else {
            self.transition(&mut inner, CircuitState::Open);
        }
    }

    /// Close the breaker and clear its counters. Statistics are kept.
    pub fn reset(&self) {
        let mut inner = self.lock();
        tracing::info!(breaker = %self.name, from = inner.state.as_str(), "Circuit breaker manually reset");
        self.transition(&mut inner, CircuitState::Closed);
        inner.consecutive_failures = 0;
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            half_open_successes: inner.half_open_successes,
            stats: inner.stats.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reject(&self, mut inner: MutexGuard<'_, Inner>) -> CircuitOpen {
        inner.stats.rejected_calls += 1;
        let state = inner.state;
        drop(inner);

        tracing::debug!(breaker = %self.name, state = state.as_str(), "Call rejected by circuit breaker");
        metrics::record_breaker_rejection(&self.name);
        CircuitOpen {
            breaker: self.name.clone(),
            state: state.as_str(),
        }
    }

    fn settle(&self, generation: u64, trial: bool, success: bool) {
        let mut inner = self.lock();
        let current = generation == inner.generation;
        if trial && current {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }

        if success {
            inner.stats.successful_calls += 1;
        } else {
            inner.stats.failed_calls += 1;
        }
        if !current {
            return;
        }

        match (inner.state, success) {
            (CircuitState::Closed, true) => inner.consecutive_failures = 0,
            (CircuitState::Closed, false) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            (CircuitState::HalfOpen, true) => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            (CircuitState::HalfOpen, false) => self.transition(&mut inner, CircuitState::Open),
            (CircuitState::Open, _) => {}
        }
    }

    fn release_trial(&self, generation: u64) {
        let mut inner = self.lock();
        if generation == inner.generation {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }

        inner.state = to;
        inner.generation += 1;
        inner.half_open_successes = 0;
        inner.half_open_in_flight = 0;
        self.state.store(to as u8, Ordering::Release);

        match (from, to) {
            (CircuitState::Closed, CircuitState::Open) => inner.stats.closed_to_open += 1,
            (CircuitState::Open, CircuitState::HalfOpen) => inner.stats.open_to_half_open += 1,
            (CircuitState::HalfOpen, CircuitState::Closed) => inner.stats.half_open_to_closed += 1,
            (CircuitState::HalfOpen, CircuitState::Open) => inner.stats.half_open_to_open += 1,
            _ => {}
        }

        match to {
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
                tracing::warn!(
                    breaker = %self.name,
                    from = from.as_str(),
                    consecutive_failures = inner.consecutive_failures,
                    recovery_timeout_secs = self.config.recovery_timeout_secs,
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                tracing::info!(
                    breaker = %self.name,
                    success_threshold = self.config.success_threshold,
                    "Circuit breaker half-open, admitting trial calls"
                );
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                tracing::info!(breaker = %self.name, from = from.as_str(), "Circuit breaker closed");
            }
        }

        metrics::record_breaker_transition(&self.name, to.as_str(), to as u8);
    }
}

/// Admission to make one protected call.
#[derive(Debug)]
#[must_use = "a permit must be settled with record_success or record_failure"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl CallPermit<'_> {
    /// Whether this call is a half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.settle(self.generation, self.trial, true);
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.settle(self.generation, self.trial, false);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial(self.generation);
        }
    }
}

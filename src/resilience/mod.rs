//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Protected call (store transaction, telemetry export):
//!     → retries.rs (ask breaker, run attempt, classify, back off)
//!         → circuit_breaker.rs (admit or refuse, record outcome)
//!         → timeouts.rs (bound each attempt)
//!         → classify.rs (recoverable vs permanent)
//!         → backoff.rs (delay before the next attempt)
//! ```
//!
//! # Design Decisions
//! - Every external call has a deadline
//! - Only recoverable failures are retried
//! - One breaker per call path so a failing dependency cannot trip another
//! - Breakers are passed in explicitly, never looked up globally

pub mod backoff;
pub mod circuit_breaker;
pub mod classify;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{BreakerSnapshot, BreakerStats, CallPermit, CircuitBreaker, CircuitOpen, CircuitState};
pub use classify::{Classify, ErrorClass};
pub use retries::{RetryError, RetryExecutor, RetryPolicy};
pub use timeouts::{bounded, TimeoutError};

//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → IngestConfig (validated, immutable)
//!     → breakers, retry policy, deadlines and telemetry built from it once
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    BreakersConfig, CircuitBreakerConfig, IngestConfig, LogFormat, ObservabilityConfig,
    RetryConfig, SinkKind, TelemetryConfig, TimeoutConfig,
};

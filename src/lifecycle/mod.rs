//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     Load config → Validate → Logging/metrics → Breakers → Store → Telemetry worker
//!
//! Shutdown (shutdown.rs):
//!     Trigger → telemetry worker drains its queue → buffer flushed once → exit
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;

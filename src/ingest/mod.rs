//! Batch ingestion subsystem.
//!
//! # Data Flow
//! ```text
//! Vec<PortfolioCreateInput>
//!     → validator.rs (size, name, version and duplicate rules; all violations)
//!     → normalizer.rs (fill createdAt/version defaults)
//!     → RetryExecutor + storage breaker
//!         → transaction.rs (begin → insert_many → commit, abort on failure)
//!     → assembler.rs (restore input order)
//!     → Vec<PortfolioRecord>
//! ```
//!
//! # Design Decisions
//! - A batch is all-or-nothing; partial writes are aborted
//! - Validation never touches storage
//! - Callers see storage failures only as a generic error

pub mod assembler;
pub mod normalizer;
pub mod pipeline;
pub mod transaction;
pub mod types;
pub mod validator;

pub use normalizer::{Clock, FixedClock, SystemClock};
pub use pipeline::BatchIngestor;
pub use transaction::{TransactionCoordinator, TransactionScope};
pub use types::{
    DuplicateGroup, FailureKind, IngestError, PersistableEntity, PersistedEntity, PortfolioCreateInput,
    PortfolioRecord, ValidationError, ValidationReport,
};
pub use validator::{validate, MAX_BATCH_SIZE, MAX_NAME_LENGTH};

//! Document store subsystem.
//!
//! # Data Flow
//! ```text
//! TransactionCoordinator
//!     → begin()                      (open session)
//!     → insert_many(session, batch)  (stage all documents, ids returned)
//!     → commit(session) | abort(session)
//! ```
//!
//! # Design Decisions
//! - The store is a trait object so the pipeline never depends on a driver
//! - Staged documents are invisible until commit; abort discards them all
//! - Returned ids carry the batch index; their order is not guaranteed

pub mod memory;
pub mod types;

use async_trait::async_trait;

use crate::ingest::{PersistableEntity, PortfolioRecord};

pub use memory::{Fault, InMemoryStore};
pub use types::{InsertedDocument, RecordId, SessionId, StoreError, StoreResult};

/// Transactional portfolio collection.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Open a session with a transaction started on it.
    async fn begin(&self) -> StoreResult<SessionId>;

    /// Stage every entity inside the session's transaction.
    async fn insert_many(
        &self,
        session: SessionId,
        entities: &[PersistableEntity],
    ) -> StoreResult<Vec<InsertedDocument>>;

    /// Make staged documents visible and end the session.
    async fn commit(&self, session: SessionId) -> StoreResult<()>;

    /// Discard staged documents and end the session. Aborting a session
    /// that is already closed is a no-op.
    async fn abort(&self, session: SessionId) -> StoreResult<()>;

    /// Number of committed records.
    async fn count(&self) -> StoreResult<usize>;

    /// All committed records in insertion order.
    async fn find_all(&self) -> StoreResult<Vec<PortfolioRecord>>;
}

//! One atomic insert attempt.
//!
//! # Attempt
//! ```text
//! begin ─▶ insert_many ─▶ merge ids ─▶ commit ─▶ Ok(persisted)
//!              │              │           │
//!              └──────────────┴───────────┴──▶ abort ─▶ Err(StoreError)
//! ```
//!
//! The coordinator never retries. Each call opens a fresh session, and a
//! [`TransactionScope`] that is dropped mid-attempt aborts its session in
//! the background.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use super::types::{PersistableEntity, PersistedEntity, PortfolioRecord};
use crate::resilience::bounded;
use crate::store::{DocumentStore, InsertedDocument, SessionId, StoreError, StoreResult};

/// An open transaction. Aborted on drop unless committed or aborted first.
pub struct TransactionScope {
    store: Arc<dyn DocumentStore>,
    session: Option<SessionId>,
}

impl TransactionScope {
    pub async fn begin(store: Arc<dyn DocumentStore>) -> StoreResult<Self> {
        let session = store.begin().await?;
        Ok(Self {
            store,
            session: Some(session),
        })
    }

    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    pub async fn insert_many(&self, entities: &[PersistableEntity]) -> StoreResult<Vec<InsertedDocument>> {
        let session = self.open_session()?;
        self.store.insert_many(session, entities).await
    }

    /// Commit the transaction. The scope stays open if the commit fails or
    /// is cancelled, so a later abort or drop still cleans it up.
    pub async fn commit(&mut self) -> StoreResult<()> {
        let session = self.open_session()?;
        self.store.commit(session).await?;
        self.session = None;
        Ok(())
    }

    /// Abort the transaction. Failures are logged; the scope is closed
    /// either way.
    pub async fn abort(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if let Err(e) = self.store.abort(session).await {
            tracing::warn!(%session, error = %e, "Failed to abort transaction");
        }
    }

    fn open_session(&self) -> StoreResult<SessionId> {
        self.session.ok_or(StoreError::ScopeClosed)
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        match Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(%session, "Transaction scope dropped while open, aborting");
                let store = Arc::clone(&self.store);
                handle.spawn(async move {
                    if let Err(e) = store.abort(session).await {
                        tracing::warn!(%session, error = %e, "Failed to abort abandoned transaction");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(%session, "Transaction scope dropped outside a runtime, session left open");
            }
        }
    }
}

/// Runs single insert attempts against the store.
#[derive(Clone)]
pub struct TransactionCoordinator {
    store: Arc<dyn DocumentStore>,
    call_timeout: Duration,
}

impl TransactionCoordinator {
    pub fn new(store: Arc<dyn DocumentStore>, call_timeout: Duration) -> Self {
        Self { store, call_timeout }
    }

    /// Insert every entity in one transaction.
    ///
    /// Returns the persisted entities in the order the store reported them.
    /// Each store call is bounded by the per-call timeout.
    pub async fn commit(&self, entities: &[PersistableEntity]) -> StoreResult<Vec<PersistedEntity>> {
        let mut scope = bounded(self.call_timeout, TransactionScope::begin(Arc::clone(&self.store))).await?;

        let staged = bounded(self.call_timeout, scope.insert_many(entities)).await;
        let inserted = match staged {
            Ok(inserted) => inserted,
            Err(e) => {
                scope.abort().await;
                return Err(e);
            }
        };

        let persisted = match merge_ids(entities, inserted) {
            Ok(persisted) => persisted,
            Err(e) => {
                scope.abort().await;
                return Err(e);
            }
        };

        let committed = bounded(self.call_timeout, scope.commit()).await;
        if let Err(e) = committed {
            scope.abort().await;
            return Err(e);
        }

        tracing::debug!(count = persisted.len(), "Transaction committed");
        Ok(persisted)
    }
}

/// Pair each store-assigned id with the entity at its batch index.
fn merge_ids(entities: &[PersistableEntity], inserted: Vec<InsertedDocument>) -> StoreResult<Vec<PersistedEntity>> {
    let incomplete = StoreError::IncompleteInsert {
        expected: entities.len(),
        returned: inserted.len(),
    };
    if inserted.len() != entities.len() {
        return Err(incomplete);
    }

    let mut by_index: HashMap<usize, &PersistableEntity> = entities.iter().map(|e| (e.index, e)).collect();
    inserted
        .into_iter()
        .map(|doc| {
            let entity = by_index.remove(&doc.index).ok_or_else(|| incomplete.clone())?;
            Ok(PersistedEntity {
                index: doc.index,
                record: PortfolioRecord::from_entity(doc.id, entity),
            })
        })
        .collect()
}

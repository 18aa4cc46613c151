//! In-process transactional store.
//!
//! Backs the CLI and the test suites. Faults can be scripted per insert
//! call to reproduce driver-level failures: transient errors, partial
//! writes, slow calls and failed commits.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;

use super::{DocumentStore, InsertedDocument, RecordId, SessionId, StoreError, StoreResult};
use crate::ingest::{PersistableEntity, PortfolioRecord};

/// Scripted behaviour for the next `insert_many` call.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail before staging anything.
    Fail(StoreError),
    /// Stage the first `applied` documents, then fail.
    PartialFail { applied: usize, error: StoreError },
    /// Sleep before handling the call normally.
    Delay(Duration),
    /// Stage everything, then fail the session's commit.
    FailCommit(StoreError),
}

#[derive(Debug, Default)]
struct Session {
    staged: Vec<PortfolioRecord>,
    commit_error: Option<StoreError>,
}

/// Call counters.
#[derive(Debug, Default)]
struct Calls {
    begin: AtomicU32,
    insert: AtomicU32,
    commit: AtomicU32,
    abort: AtomicU32,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<Vec<PortfolioRecord>>,
    sessions: DashMap<SessionId, Session>,
    faults: Mutex<VecDeque<Fault>>,
    reorder: AtomicBool,
    calls: Calls,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fault for a future insert call.
    pub fn push_fault(&self, fault: Fault) {
        self.faults().push_back(fault);
    }

    /// Fail the next `times` insert calls with `error`.
    pub fn fail_next(&self, times: usize, error: StoreError) {
        let mut faults = self.faults();
        for _ in 0..times {
            faults.push_back(Fault::Fail(error.clone()));
        }
    }

    /// Return inserted ids in reverse order.
    pub fn set_reorder(&self, reorder: bool) {
        self.reorder.store(reorder, Ordering::Relaxed);
    }

    pub fn begin_calls(&self) -> u32 {
        self.calls.begin.load(Ordering::Relaxed)
    }

    pub fn insert_calls(&self) -> u32 {
        self.calls.insert.load(Ordering::Relaxed)
    }

    pub fn commit_calls(&self) -> u32 {
        self.calls.commit.load(Ordering::Relaxed)
    }

    pub fn abort_calls(&self) -> u32 {
        self.calls.abort.load(Ordering::Relaxed)
    }

    /// Sessions begun but neither committed nor aborted.
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn faults(&self) -> MutexGuard<'_, VecDeque<Fault>> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stage(&self, session: SessionId, entities: &[PersistableEntity]) -> StoreResult<Vec<InsertedDocument>> {
        let mut open = self
            .sessions
            .get_mut(&session)
            .ok_or(StoreError::UnknownSession(session))?;

        let mut inserted = Vec::with_capacity(entities.len());
        for entity in entities {
            let id = RecordId::generate();
            open.staged.push(PortfolioRecord::from_entity(id.clone(), entity));
            inserted.push(InsertedDocument {
                index: entity.index,
                id,
            });
        }
        Ok(inserted)
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn begin(&self) -> StoreResult<SessionId> {
        self.calls.begin.fetch_add(1, Ordering::Relaxed);
        let session = SessionId::new();
        self.sessions.insert(session, Session::default());
        tracing::trace!(%session, "Session started");
        Ok(session)
    }

    async fn insert_many(
        &self,
        session: SessionId,
        entities: &[PersistableEntity],
    ) -> StoreResult<Vec<InsertedDocument>> {
        self.calls.insert.fetch_add(1, Ordering::Relaxed);
        let fault = self.faults().pop_front();

        match fault {
            None => {}
            Some(Fault::Fail(error)) => return Err(error),
            Some(Fault::PartialFail { applied, error }) => {
                let applied = applied.min(entities.len());
                self.stage(session, &entities[..applied])?;
                return Err(error);
            }
            Some(Fault::Delay(delay)) => tokio::time::sleep(delay).await,
            Some(Fault::FailCommit(error)) => {
                if let Some(mut open) = self.sessions.get_mut(&session) {
                    open.commit_error = Some(error);
                }
            }
        }

        let mut inserted = self.stage(session, entities)?;
        if self.reorder.load(Ordering::Relaxed) {
            inserted.reverse();
        }
        Ok(inserted)
    }

    async fn commit(&self, session: SessionId) -> StoreResult<()> {
        self.calls.commit.fetch_add(1, Ordering::Relaxed);
        let (_, open) = self
            .sessions
            .remove(&session)
            .ok_or(StoreError::UnknownSession(session))?;

        if let Some(error) = open.commit_error {
            return Err(error);
        }

        let count = open.staged.len();
        self.records.write().await.extend(open.staged);
        tracing::trace!(%session, count, "Session committed");
        Ok(())
    }

    async fn abort(&self, session: SessionId) -> StoreResult<()> {
        self.calls.abort.fetch_add(1, Ordering::Relaxed);
        if let Some((_, open)) = self.sessions.remove(&session) {
            tracing::trace!(%session, discarded = open.staged.len(), "Session aborted");
        }
        Ok(())
    }

    async fn count(&self) -> StoreResult<usize> {
        Ok(self.records.read().await.len())
    }

    async fn find_all(&self) -> StoreResult<Vec<PortfolioRecord>> {
        Ok(self.records.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entities(n: usize) -> Vec<PersistableEntity> {
        (0..n)
            .map(|index| PersistableEntity {
                index,
                name: format!("p{index}"),
                created_at: Utc::now(),
                version: 1,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_commit_makes_documents_visible() {
        let store = InMemoryStore::new();
        let session = store.begin().await.unwrap();
        let inserted = store.insert_many(session, &entities(3)).await.unwrap();
        assert_eq!(inserted.len(), 3);
        assert_eq!(store.count().await.unwrap(), 0);

        store.commit(session).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 3);
        assert_eq!(store.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_abort_discards_partial_write() {
        let store = InMemoryStore::new();
        store.push_fault(Fault::PartialFail {
            applied: 2,
            error: StoreError::Network("reset".into()),
        });

        let session = store.begin().await.unwrap();
        assert!(store.insert_many(session, &entities(5)).await.is_err());
        store.abort(session).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_reorder_reverses_returned_ids() {
        let store = InMemoryStore::new();
        store.set_reorder(true);
        let session = store.begin().await.unwrap();
        let inserted = store.insert_many(session, &entities(3)).await.unwrap();
        let indices: Vec<usize> = inserted.iter().map(|d| d.index).collect();
        assert_eq!(indices, vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_nothing_behind() {
        let store = InMemoryStore::new();
        store.push_fault(Fault::FailCommit(StoreError::WriteConflict("txn".into())));

        let session = store.begin().await.unwrap();
        store.insert_many(session, &entities(2)).await.unwrap();
        assert!(store.commit(session).await.is_err());
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.abort(session).await.is_ok());
    }

    #[tokio::test]
    async fn test_commit_on_unknown_session_fails() {
        let store = InMemoryStore::new();
        let session = SessionId::new();
        assert_eq!(store.commit(session).await, Err(StoreError::UnknownSession(session)));
    }
}

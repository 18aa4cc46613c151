//! Store identifiers and errors.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Store-assigned record identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to an open store transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Id assigned to one inserted entity, keyed by the entity's batch index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertedDocument {
    pub index: usize,
    pub id: RecordId,
}

/// Store operation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("no suitable server: {0}")]
    ServerSelection(String),

    #[error("write conflict: {0}")]
    WriteConflict(String),

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("schema violation: {0}")]
    Schema(String),

    #[error("command failed with code {code}: {message}")]
    Command { code: i32, message: String },

    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("insert returned {returned} ids for {expected} documents")]
    IncompleteInsert { expected: usize, returned: usize },

    #[error("transaction scope already closed")]
    ScopeClosed,
}

pub type StoreResult<T> = Result<T, StoreError>;

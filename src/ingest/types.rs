//! Batch ingestion data types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::RecordId;

/// One portfolio as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioCreateInput {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
}

impl PortfolioCreateInput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: None,
            version: None,
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }
}

/// Storage-ready form of one input, tagged with its position in the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistableEntity {
    pub index: usize,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub version: i64,
}

/// A persisted portfolio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioRecord {
    pub id: RecordId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub version: i64,
}

impl PortfolioRecord {
    pub fn from_entity(id: RecordId, entity: &PersistableEntity) -> Self {
        Self {
            id,
            name: entity.name.clone(),
            created_at: entity.created_at,
            version: entity.version,
        }
    }
}

/// A record paired with the batch position of the entity it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedEntity {
    pub index: usize,
    pub record: PortfolioRecord,
}

/// Entries sharing one case-folded name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    /// Trimmed, lowercased name.
    pub name: String,
    pub indices: Vec<usize>,
}

/// A single batch rule violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("batch must contain at least one portfolio")]
    EmptyBatch,

    #[error("batch of {size} portfolios exceeds the maximum of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("item {index}: invalid name {name:?}")]
    InvalidName { index: usize, name: String },

    #[error("item {index}: version must be a positive integer, got {version}")]
    InvalidVersion { index: usize, version: i64 },

    #[error("duplicate names in batch: {}", format_groups(.names))]
    DuplicateName { names: Vec<DuplicateGroup> },
}

fn format_groups(groups: &[DuplicateGroup]) -> String {
    groups
        .iter()
        .map(|g| format!("{:?} at {:?}", g.name, g.indices))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Every violation found in one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    pub fn new(errors: Vec<ValidationError>) -> Self {
        Self { errors }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn contains(&self, predicate: impl Fn(&ValidationError) -> bool) -> bool {
        self.errors.iter().any(predicate)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid batch: ")?;
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationReport {}

/// Internal failure category behind an [`IngestError::Unavailable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Permanent,
    CircuitOpen,
    RetriesExhausted,
    DeadlineExceeded,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Permanent => "permanent",
            FailureKind::CircuitOpen => "circuit_open",
            FailureKind::RetriesExhausted => "retries_exhausted",
            FailureKind::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

/// Error returned to callers of the ingest pipeline.
///
/// Storage failures never expose their cause; the kind is kept for logs
/// and metrics only.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationReport),

    #[error("internal server error")]
    Unavailable(FailureKind),
}

impl IngestError {
    /// Metric label for this outcome.
    pub fn outcome(&self) -> &'static str {
        match self {
            IngestError::Validation(_) => "validation_failed",
            IngestError::Unavailable(kind) => kind.as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_uses_camel_case() {
        let input: PortfolioCreateInput =
            serde_json::from_str(r#"{"name":"Growth","createdAt":"2024-01-02T03:04:05Z","version":2}"#).unwrap();
        assert_eq!(input.name, "Growth");
        assert_eq!(input.version, Some(2));
        assert!(input.created_at.is_some());

        let minimal: PortfolioCreateInput = serde_json::from_str(r#"{"name":"Income"}"#).unwrap();
        assert_eq!(minimal, PortfolioCreateInput::new("Income"));
    }

    #[test]
    fn test_report_lists_every_violation() {
        let report = ValidationReport::new(vec![
            ValidationError::InvalidName {
                index: 1,
                name: "bad!".into(),
            },
            ValidationError::DuplicateName {
                names: vec![DuplicateGroup {
                    name: "a".into(),
                    indices: vec![0, 2],
                }],
            },
        ]);

        assert_eq!(
            report.to_string(),
            r#"invalid batch: item 1: invalid name "bad!"; duplicate names in batch: "a" at [0, 2]"#
        );
    }

    #[test]
    fn test_validation_error_serializes_with_kind_tag() {
        let json = serde_json::to_value(ValidationError::BatchTooLarge { size: 101, max: 100 }).unwrap();
        assert_eq!(json["kind"], "batch_too_large");
        assert_eq!(json["size"], 101);
    }

    #[test]
    fn test_unavailable_hides_cause() {
        let err = IngestError::Unavailable(FailureKind::RetriesExhausted);
        assert_eq!(err.to_string(), "internal server error");
        assert_eq!(err.outcome(), "retries_exhausted");
    }
}

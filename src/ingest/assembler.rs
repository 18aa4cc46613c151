//! Restores input order on persisted records.

use super::types::{PersistedEntity, PortfolioRecord};

/// Records in the order their inputs were submitted.
pub fn assemble(input_len: usize, mut persisted: Vec<PersistedEntity>) -> Vec<PortfolioRecord> {
    debug_assert_eq!(persisted.len(), input_len, "every input must be persisted exactly once");
    persisted.sort_unstable_by_key(|p| p.index);
    persisted.into_iter().map(|p| p.record).collect()
}

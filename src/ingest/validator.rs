//! Batch validation.
//!
//! Every rule is checked and every violation reported together. Empty and
//! oversized batches are rejected before item checks run.

use std::collections::HashMap;

use super::types::{DuplicateGroup, PortfolioCreateInput, ValidationError, ValidationReport};

/// Largest accepted batch.
pub const MAX_BATCH_SIZE: usize = 100;

/// Longest accepted portfolio name, in characters.
pub const MAX_NAME_LENGTH: usize = 200;

/// Check a batch against the ingestion rules.
pub fn validate(batch: &[PortfolioCreateInput]) -> Result<(), ValidationReport> {
    if batch.is_empty() {
        return Err(ValidationReport::new(vec![ValidationError::EmptyBatch]));
    }
    if batch.len() > MAX_BATCH_SIZE {
        return Err(ValidationReport::new(vec![ValidationError::BatchTooLarge {
            size: batch.len(),
            max: MAX_BATCH_SIZE,
        }]));
    }

    let mut errors = Vec::new();
    for (index, input) in batch.iter().enumerate() {
        if !is_valid_name(&input.name) {
            errors.push(ValidationError::InvalidName {
                index,
                name: input.name.clone(),
            });
        }
        if let Some(version) = input.version.filter(|v| *v < 1) {
            errors.push(ValidationError::InvalidVersion { index, version });
        }
    }

    let duplicates = find_duplicates(batch);
    if !duplicates.is_empty() {
        errors.push(ValidationError::DuplicateName { names: duplicates });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationReport::new(errors))
    }
}

/// 1 to 200 characters of ASCII letters, digits, spaces, hyphens and
/// underscores, with at least one character that is not a space.
pub fn is_valid_name(name: &str) -> bool {
    let len = name.chars().count();
    (1..=MAX_NAME_LENGTH).contains(&len)
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        && name.chars().any(|c| c != ' ')
}

/// Groups of entries whose trimmed, lowercased names collide, in order of
/// first appearance.
fn find_duplicates(batch: &[PortfolioCreateInput]) -> Vec<DuplicateGroup> {
    let mut order: Vec<String> = Vec::new();
    let mut seen: HashMap<String, Vec<usize>> = HashMap::new();

    for (index, input) in batch.iter().enumerate() {
        let key = input.name.trim().to_lowercase();
        seen.entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(index);
    }

    order
        .into_iter()
        .filter_map(|name| {
            let indices = seen.remove(&name)?;
            (indices.len() > 1).then_some(DuplicateGroup { name, indices })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(names: &[&str]) -> Vec<PortfolioCreateInput> {
        names.iter().map(|n| PortfolioCreateInput::new(*n)).collect()
    }

    fn sized(n: usize) -> Vec<PortfolioCreateInput> {
        (0..n).map(|i| PortfolioCreateInput::new(format!("Portfolio {i}"))).collect()
    }

    #[test]
    fn test_batch_size_bounds() {
        let err = validate(&[]).unwrap_err();
        assert_eq!(err.errors, vec![ValidationError::EmptyBatch]);

        assert!(validate(&sized(1)).is_ok());
        assert!(validate(&sized(100)).is_ok());

        let err = validate(&sized(101)).unwrap_err();
        assert_eq!(err.errors, vec![ValidationError::BatchTooLarge { size: 101, max: 100 }]);
    }

    #[test]
    fn test_name_rules() {
        assert!(is_valid_name("Growth Fund_2024-Q1"));
        assert!(is_valid_name(&"a".repeat(200)));
        assert!(!is_valid_name(&"a".repeat(201)));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("   "));
        assert!(!is_valid_name("Fund!"));
        assert!(!is_valid_name("Fund\tTabs"));
        assert!(!is_valid_name("Fundé"));
    }

    #[test]
    fn test_case_insensitive_duplicates() {
        let err = validate(&batch(&["A", "b", "a"])).unwrap_err();
        assert_eq!(
            err.errors,
            vec![ValidationError::DuplicateName {
                names: vec![DuplicateGroup {
                    name: "a".into(),
                    indices: vec![0, 2],
                }],
            }]
        );
    }

    #[test]
    fn test_surrounding_spaces_ignored_for_duplicates() {
        let err = validate(&batch(&["Core", " core "])).unwrap_err();
        assert!(err.contains(|e| matches!(e, ValidationError::DuplicateName { names } if names[0].name == "core")));
    }

    #[test]
    fn test_each_duplicate_name_listed_once() {
        let err = validate(&batch(&["X", "y", "x", "Y", "X"])).unwrap_err();
        let ValidationError::DuplicateName { names } = &err.errors[0] else {
            panic!("expected duplicate error, got {err:?}");
        };
        assert_eq!(names.len(), 2);
        assert_eq!(names[0].indices, vec![0, 2, 4]);
        assert_eq!(names[1].indices, vec![1, 3]);
    }

    #[test]
    fn test_collects_all_violations() {
        let mut inputs = batch(&["ok", "bad!", "OK"]);
        inputs[0].version = Some(0);

        let err = validate(&inputs).unwrap_err();
        assert_eq!(err.len(), 3);
        assert!(err.contains(|e| matches!(e, ValidationError::InvalidName { index: 1, .. })));
        assert!(err.contains(|e| matches!(e, ValidationError::InvalidVersion { index: 0, version: 0 })));
        assert!(err.contains(|e| matches!(e, ValidationError::DuplicateName { .. })));
    }

    #[test]
    fn test_positive_version_accepted() {
        let inputs = vec![PortfolioCreateInput::new("Core").with_version(3)];
        assert!(validate(&inputs).is_ok());
    }
}

//! Failure classification.
//!
//! Retry and breaker logic branch on [`ErrorClass`] only. Each failure type a
//! protected call can produce implements [`Classify`].

use crate::store::StoreError;

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected to succeed on a later attempt (timeouts, failover, conflicts).
    Recoverable,
    /// Will keep failing until something external changes.
    Permanent,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Recoverable => "recoverable",
            ErrorClass::Permanent => "permanent",
        }
    }
}

/// Errors that know their own retry class.
pub trait Classify {
    fn classify(&self) -> ErrorClass;
}

/// Server command codes that indicate a transient condition.
const RECOVERABLE_CODES: &[i32] = &[
    6,     // HostUnreachable
    7,     // HostNotFound
    50,    // MaxTimeMSExpired
    89,    // NetworkTimeout
    91,    // ShutdownInProgress
    112,   // WriteConflict
    189,   // PrimarySteppedDown
    216,   // ExceededMemoryLimit
    10107, // NotWritablePrimary
    11600, // InterruptedAtShutdown
];

/// Server command codes that will not succeed on retry.
const PERMANENT_CODES: &[i32] = &[
    11000, // DuplicateKey
    11001, // DuplicateKey (legacy)
    13,    // Unauthorized
    18,    // AuthenticationFailed
    121,   // DocumentValidationFailure
    16500, // BadValue
];

/// Classify a raw server command code. Unknown codes are permanent.
pub fn classify_code(code: i32) -> ErrorClass {
    if RECOVERABLE_CODES.contains(&code) {
        ErrorClass::Recoverable
    } else {
        if !PERMANENT_CODES.contains(&code) {
            tracing::debug!(code, "Unrecognized store error code, treating as permanent");
        }
        ErrorClass::Permanent
    }
}

impl Classify for StoreError {
    fn classify(&self) -> ErrorClass {
        match self {
            StoreError::Timeout(_)
            | StoreError::Network(_)
            | StoreError::ServerSelection(_)
            | StoreError::WriteConflict(_) => ErrorClass::Recoverable,
            StoreError::Command { code, .. } => classify_code(*code),
            StoreError::DuplicateKey(_)
            | StoreError::Unauthorized(_)
            | StoreError::Schema(_)
            | StoreError::UnknownSession(_)
            | StoreError::IncompleteInsert { .. }
            | StoreError::ScopeClosed => ErrorClass::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn command(code: i32) -> StoreError {
        StoreError::Command {
            code,
            message: "boom".into(),
        }
    }

    #[test]
    fn test_transport_failures_are_recoverable() {
        assert_eq!(StoreError::Timeout(Duration::from_secs(1)).classify(), ErrorClass::Recoverable);
        assert_eq!(StoreError::Network("reset".into()).classify(), ErrorClass::Recoverable);
        assert_eq!(StoreError::ServerSelection("no primary".into()).classify(), ErrorClass::Recoverable);
        assert_eq!(StoreError::WriteConflict("txn".into()).classify(), ErrorClass::Recoverable);
    }

    #[test]
    fn test_constraint_and_auth_failures_are_permanent() {
        assert_eq!(StoreError::DuplicateKey("name".into()).classify(), ErrorClass::Permanent);
        assert_eq!(StoreError::Unauthorized("role".into()).classify(), ErrorClass::Permanent);
        assert_eq!(StoreError::Schema("version".into()).classify(), ErrorClass::Permanent);
        assert_eq!(StoreError::ScopeClosed.classify(), ErrorClass::Permanent);
    }

    #[test]
    fn test_command_codes() {
        assert_eq!(command(50).classify(), ErrorClass::Recoverable);
        assert_eq!(command(216).classify(), ErrorClass::Recoverable);
        assert_eq!(command(112).classify(), ErrorClass::Recoverable);
        assert_eq!(command(11000).classify(), ErrorClass::Permanent);
        assert_eq!(command(11001).classify(), ErrorClass::Permanent);
        assert_eq!(command(16500).classify(), ErrorClass::Permanent);
        assert_eq!(command(13).classify(), ErrorClass::Permanent);
        assert_eq!(command(18).classify(), ErrorClass::Permanent);
    }

    #[test]
    fn test_unknown_code_is_permanent() {
        assert_eq!(command(99999).classify(), ErrorClass::Permanent);
    }
}

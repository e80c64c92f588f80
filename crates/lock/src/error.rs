use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Errors from store adapter operations.
///
/// Every wire-level failure surfaces as one of these variants; the protocol
/// layer wraps them into [`LockError`] with the operation context attached.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("script error: {0}")]
    Script(String),
}

/// Why a release or extension could not be performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The lock key no longer exists on the store.
    NotFound,
    /// The stored lease value does not belong to the presented handle.
    WrongValue,
    /// The store itself failed (transport, timeout, script error).
    Store,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not_found",
            Self::WrongValue => "wrong_value",
            Self::Store => "store_error",
        };
        f.write_str(s)
    }
}

/// Errors from lock construction and the lock protocols.
///
/// Contended or already-expired leases are not errors: `release` and
/// `extend` report those outcomes as `Ok(false)`.
#[derive(Debug, Error)]
pub enum LockError {
    /// Invalid or missing configuration. Raised at construction; not
    /// recoverable at runtime.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The retry budget was exhausted without a successful acquisition.
    /// For quorum locks this includes failing to reach quorum.
    #[error("failed to acquire lock `{key}` after {attempts} attempt(s)")]
    Acquisition {
        key: String,
        attempts: u32,
        #[source]
        source: Option<StoreError>,
    },

    /// The store failed while releasing a lease.
    #[error("failed to release lock `{key}` ({reason})")]
    Release {
        key: String,
        reason: FailureReason,
        #[source]
        source: Option<StoreError>,
    },

    /// The store failed while extending a lease. The caller must treat the
    /// lease as lost.
    #[error("failed to extend lock `{key}` ({reason})")]
    Extension {
        key: String,
        reason: FailureReason,
        #[source]
        source: Option<StoreError>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reason_display() {
        assert_eq!(FailureReason::NotFound.to_string(), "not_found");
        assert_eq!(FailureReason::WrongValue.to_string(), "wrong_value");
        assert_eq!(FailureReason::Store.to_string(), "store_error");
    }

    #[test]
    fn acquisition_error_names_key_and_attempts() {
        let err = LockError::Acquisition {
            key: "jobs:nightly".into(),
            attempts: 4,
            source: None,
        };
        let msg = err.to_string();
        assert!(msg.contains("jobs:nightly"));
        assert!(msg.contains('4'));
    }

    #[test]
    fn release_error_carries_source() {
        let err = LockError::Release {
            key: "k".into(),
            reason: FailureReason::Store,
            source: Some(StoreError::Connection("refused".into())),
        };
        let source = std::error::Error::source(&err).expect("source should be set");
        assert!(source.to_string().contains("refused"));
    }

    #[test]
    fn timeout_error_mentions_duration() {
        let err = StoreError::Timeout(Duration::from_millis(250));
        assert!(err.to_string().contains("250"));
    }
}

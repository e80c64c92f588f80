use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::id;

/// Which protocol produced a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Single-store lock.
    Single,
    /// Quorum lock across multiple independent stores.
    Quorum,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => f.write_str("single"),
            Self::Quorum => f.write_str("quorum"),
        }
    }
}

/// How an acquisition went: attempts used, wall-clock duration, and which
/// stores accepted the lease.
#[derive(Debug, Clone)]
pub struct AcquisitionMetadata {
    pub(crate) attempts: u32,
    pub(crate) elapsed: Duration,
    pub(crate) nodes: Vec<String>,
    pub(crate) strategy: Strategy,
    pub(crate) validity: Option<Duration>,
}

impl AcquisitionMetadata {
    /// Number of tries the acquisition needed (1 = first try).
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Wall-clock duration of the acquisition.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Names of the stores that accepted the lease.
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// The protocol that produced the handle.
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Lower bound on how long the lease is safe to rely on, after clock
    /// drift and acquisition time are subtracted. Only set by the quorum
    /// protocol.
    pub fn validity(&self) -> Option<Duration> {
        self.validity
    }
}

/// Proof of ownership of a lease, returned by a successful acquire.
///
/// A handle is immutable and is the only way to release or extend the lease
/// it represents: it cannot be constructed outside this crate, so ownership
/// verification against the stored lease value cannot be bypassed. A handle
/// whose extension has failed is dead; releasing it is permitted and
/// reports `false`.
#[derive(Debug, Clone)]
pub struct LockHandle {
    id: String,
    key: String,
    value: String,
    acquired_at: DateTime<Utc>,
    ttl: Duration,
    metadata: AcquisitionMetadata,
}

impl LockHandle {
    pub(crate) fn new(key: String, value: String, ttl: Duration, metadata: AcquisitionMetadata) -> Self {
        Self {
            id: id::new_handle_id(),
            key,
            value,
            acquired_at: Utc::now(),
            ttl,
            metadata,
        }
    }

    /// Locally unique identifier for client-side tracking.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The logical key the caller requested (before any store-side prefix).
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The lease value written into the store(s).
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Wall-clock timestamp at which the acquisition returned.
    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// The requested lease duration.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Acquisition details.
    pub fn metadata(&self) -> &AcquisitionMetadata {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_handle() -> LockHandle {
        LockHandle::new(
            "orders:42".into(),
            id::new_lease_value(),
            Duration::from_secs(30),
            AcquisitionMetadata {
                attempts: 2,
                elapsed: Duration::from_millis(210),
                nodes: vec!["primary".into()],
                strategy: Strategy::Single,
                validity: None,
            },
        )
    }

    #[test]
    fn handle_exposes_acquisition_details() {
        let handle = sample_handle();
        assert_eq!(handle.key(), "orders:42");
        assert_eq!(handle.value().len(), 32);
        assert_eq!(handle.ttl(), Duration::from_secs(30));
        assert_eq!(handle.metadata().attempts(), 2);
        assert_eq!(handle.metadata().nodes(), ["primary".to_string()]);
        assert_eq!(handle.metadata().strategy(), Strategy::Single);
        assert!(handle.metadata().validity().is_none());
    }

    #[test]
    fn handles_get_distinct_ids() {
        let a = sample_handle();
        let b = sample_handle();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn strategy_display() {
        assert_eq!(Strategy::Single.to_string(), "single");
        assert_eq!(Strategy::Quorum.to_string(), "quorum");
    }
}

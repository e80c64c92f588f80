use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::id::MAX_VALUE_LEN;

/// Current owner and remaining lifetime of a lock entry, fetched in a single
/// round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    /// The lease value currently stored under the key.
    pub value: String,
    /// Remaining time until the entry expires.
    pub remaining: Duration,
}

/// Result of an [`atomic_extend`](LockStore::atomic_extend) call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtendOutcome {
    /// The expiry was reset to the requested TTL.
    Extended { ttl: Duration },
    /// The remaining TTL was below the safety window; the expiry was left
    /// untouched so a potential reacquirer cannot be raced.
    TooLate { remaining: Duration },
    /// The stored value belongs to someone else; nothing was mutated.
    ValueMismatch { remaining: Duration },
    /// The key does not exist.
    NotFound,
}

/// The key-value capabilities the lock protocols need from a store.
///
/// Implementations must be safe for concurrent use and should complete each
/// operation in a single network round trip. The compare-and-swap operations
/// (`delete_if_match`, `extend_if_match`, `atomic_extend`) must execute
/// server-side as one atomic unit; composing them from a read followed by a
/// write admits a race where a holder deletes a lease that has already been
/// reacquired by someone else.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Install `value` under `key` with the given expiry, only if the key
    /// does not exist. Returns `true` iff the key was installed.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Raw lookup. Returns `None` if the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Unconditional delete. Returns the number of keys removed (0 or 1).
    async fn delete(&self, key: &str) -> Result<u64, StoreError>;

    /// Delete the key only if it currently holds `value`. Returns `true`
    /// iff the key was deleted.
    async fn delete_if_match(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    /// Reset the expiry to `ttl` only if the key currently holds `value`.
    /// Returns `true` iff the expiry was updated.
    async fn extend_if_match(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Reset the expiry to `new_ttl` only if the key holds `value` AND at
    /// least `min_remaining` of the current lease is left. The remaining-TTL
    /// check is the renewal safety window: extending a lease that is about
    /// to expire could steal it back from a reacquirer.
    async fn atomic_extend(
        &self,
        key: &str,
        value: &str,
        min_remaining: Duration,
        new_ttl: Duration,
    ) -> Result<ExtendOutcome, StoreError>;

    /// Fetch the current value and remaining TTL in one round trip.
    async fn inspect(&self, key: &str) -> Result<Option<Inspection>, StoreError>;

    /// Health probe.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Synchronous connection-state hint. A `true` result does not
    /// guarantee the next call will succeed.
    fn is_connected(&self) -> bool;

    /// Tear down the adapter's cached state (script digests, pooled
    /// connections). Idempotent.
    async fn disconnect(&self);

    /// Stable label for this store, used in quorum metadata and log fields.
    fn name(&self) -> &str;
}

/// Validate a lock key at the store boundary.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() {
        return Err(StoreError::InvalidInput("key must not be empty".into()));
    }
    Ok(())
}

/// Validate a lease value at the store boundary: non-empty, bounded, and
/// free of newline, carriage-return, and NUL bytes.
pub fn validate_value(value: &str) -> Result<(), StoreError> {
    if value.is_empty() {
        return Err(StoreError::InvalidInput("value must not be empty".into()));
    }
    if value.len() > MAX_VALUE_LEN {
        return Err(StoreError::InvalidInput(format!(
            "value exceeds {MAX_VALUE_LEN} bytes"
        )));
    }
    if value.bytes().any(|b| b == b'\n' || b == b'\r' || b == 0) {
        return Err(StoreError::InvalidInput(
            "value must not contain newline, carriage-return, or NUL bytes".into(),
        ));
    }
    Ok(())
}

/// Validate a TTL at the store boundary: strictly positive.
pub fn validate_ttl(ttl: Duration) -> Result<(), StoreError> {
    if ttl.is_zero() {
        return Err(StoreError::InvalidInput("ttl must be positive".into()));
    }
    Ok(())
}

/// Validate a full lock entry (key, value, TTL) in one call.
pub fn validate_entry(key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
    validate_key(key)?;
    validate_value(value)?;
    validate_ttl(ttl)
}

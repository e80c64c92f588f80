use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use leasehold::id::safe_compare;
use leasehold::store::{self, ExtendOutcome, Inspection, LockStore};
use leasehold::StoreError;

/// Internal entry representing a held lease.
#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// In-memory [`LockStore`] backed by a [`DashMap`].
///
/// Expiry is lazy: expired entries are treated as absent and evicted on the
/// next operation that touches the key. Because the store is in-process it
/// has no real connection; `disconnect` only flips the connection hint and
/// operations keep working afterwards.
#[derive(Debug, Clone)]
pub struct MemoryLockStore {
    entries: Arc<DashMap<String, Entry>>,
    connected: Arc<AtomicBool>,
    name: String,
}

impl MemoryLockStore {
    /// Create a store named `"memory"`.
    pub fn new() -> Self {
        Self::named("memory")
    }

    /// Create a store with a custom label, useful when several instances
    /// stand in for independent quorum members.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            connected: Arc::new(AtomicBool::new(true)),
            name: name.into(),
        }
    }

    /// Number of live (unexpired) leases, for test assertions.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired())
            .count()
    }

    /// Whether no live lease exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict the entry if it has expired.
    fn purge_expired(&self, key: &str) {
        self.entries.remove_if(key, |_, entry| entry.is_expired());
    }
}

impl Default for MemoryLockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        store::validate_entry(key, value, ttl)?;
        self.purge_expired(key);

        match self.entries.entry(key.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value: value.to_owned(),
                    expires_at: Instant::now() + ttl,
                });
                Ok(true)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        store::validate_key(key)?;
        self.purge_expired(key);
        Ok(self.entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        store::validate_key(key)?;
        self.purge_expired(key);
        Ok(u64::from(self.entries.remove(key).is_some()))
    }

    async fn delete_if_match(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        store::validate_key(key)?;
        store::validate_value(value)?;
        self.purge_expired(key);
        Ok(self
            .entries
            .remove_if(key, |_, entry| {
                safe_compare(entry.value.as_bytes(), value.as_bytes())
            })
            .is_some())
    }

    async fn extend_if_match(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        store::validate_entry(key, value, ttl)?;
        self.purge_expired(key);

        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok(false);
        };
        if !safe_compare(entry.value.as_bytes(), value.as_bytes()) {
            return Ok(false);
        }
        entry.expires_at = Instant::now() + ttl;
        Ok(true)
    }

    async fn atomic_extend(
        &self,
        key: &str,
        value: &str,
        min_remaining: Duration,
        new_ttl: Duration,
    ) -> Result<ExtendOutcome, StoreError> {
        store::validate_entry(key, value, new_ttl)?;
        self.purge_expired(key);

        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok(ExtendOutcome::NotFound);
        };
        let remaining = entry.remaining();
        if !safe_compare(entry.value.as_bytes(), value.as_bytes()) {
            return Ok(ExtendOutcome::ValueMismatch { remaining });
        }
        if remaining < min_remaining {
            return Ok(ExtendOutcome::TooLate { remaining });
        }
        entry.expires_at = Instant::now() + new_ttl;
        Ok(ExtendOutcome::Extended { ttl: new_ttl })
    }

    async fn inspect(&self, key: &str) -> Result<Option<Inspection>, StoreError> {
        store::validate_key(key)?;
        self.purge_expired(key);
        Ok(self.entries.get(key).map(|entry| Inspection {
            value: entry.value.clone(),
            remaining: entry.remaining(),
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Connection("store disconnected".into()))
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use leasehold::testing::run_store_conformance;

    use super::*;

    #[tokio::test]
    async fn conformance() {
        let store = MemoryLockStore::new();
        run_store_conformance(&store)
            .await
            .expect("store conformance suite should pass");
    }

    #[tokio::test(start_paused = true)]
    async fn lease_expires_on_the_tokio_clock() {
        let store = MemoryLockStore::new();
        store
            .set_if_absent("expire", "v", Duration::from_secs(2))
            .await
            .unwrap();
        assert!(store.get("expire").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(3)).await;

        assert!(store.get("expire").await.unwrap().is_none());
        assert!(
            store
                .set_if_absent("expire", "v2", Duration::from_secs(2))
                .await
                .unwrap(),
            "key should be reacquirable after expiry"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn inspect_tracks_remaining_ttl() {
        let store = MemoryLockStore::new();
        store
            .set_if_absent("inspect", "v", Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;

        let inspection = store.inspect("inspect").await.unwrap().expect("held");
        assert_eq!(inspection.value, "v");
        assert_eq!(inspection.remaining, Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn atomic_extend_refuses_near_expiry() {
        let store = MemoryLockStore::new();
        store
            .set_if_absent("ae", "v", Duration::from_secs(1))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(950)).await;

        let outcome = store
            .atomic_extend("ae", "v", Duration::from_millis(200), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ExtendOutcome::TooLate {
                remaining: Duration::from_millis(50)
            }
        );

        // The refused renewal must not have touched the expiry.
        let inspection = store.inspect("ae").await.unwrap().expect("held");
        assert_eq!(inspection.remaining, Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_is_not_deletable_by_match() {
        let store = MemoryLockStore::new();
        store
            .set_if_absent("gone", "v", Duration::from_millis(100))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(200)).await;

        assert!(
            !store.delete_if_match("gone", "v").await.unwrap(),
            "an expired lease is already gone"
        );
    }

    #[tokio::test]
    async fn disconnect_flips_the_hint() {
        let store = MemoryLockStore::new();
        assert!(store.is_connected());
        assert!(store.ping().await.is_ok());

        store.disconnect().await;

        assert!(!store.is_connected());
        assert!(store.ping().await.is_err());
    }
}

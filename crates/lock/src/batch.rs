//! Convenience layer for acquiring several independent keys at once.
//!
//! This is not part of the safety core: each key is an ordinary
//! single-store lease and no atomicity exists across keys. Keys are always
//! acquired in sorted order, which keeps competing batch acquirers from
//! deadlocking against each other in the common case.

use std::sync::Arc;

use tracing::warn;

use crate::error::LockError;
use crate::handle::LockHandle;
use crate::options::LockOptions;
use crate::single::SingleLock;
use crate::store::LockStore;

/// A batch of independent single-store locks acquired in a stable order.
#[derive(Debug)]
pub struct MultiLock {
    locks: Vec<SingleLock>,
}

impl MultiLock {
    /// Build locks for `keys` against one store, sorted and deduplicated,
    /// each using the TTL and retry settings of `template` (its `key` field
    /// is ignored).
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Configuration`] when `keys` is empty or any key
    /// is invalid.
    pub fn new(
        store: Arc<dyn LockStore>,
        keys: Vec<String>,
        template: &LockOptions,
    ) -> Result<Self, LockError> {
        if keys.is_empty() {
            return Err(LockError::Configuration(
                "a batch needs at least one key".into(),
            ));
        }
        let mut keys = keys;
        keys.sort();
        keys.dedup();

        let locks = keys
            .into_iter()
            .map(|key| {
                SingleLock::new(
                    Arc::clone(&store),
                    LockOptions {
                        key,
                        ..template.clone()
                    },
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { locks })
    }

    /// The keys in acquisition order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.locks.iter().map(|lock| lock.options().key.as_str())
    }

    /// Acquire every key, in order. All-or-nothing: if any acquisition
    /// fails, the leases already held are released in reverse order and the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// Propagates the first [`LockError::Acquisition`].
    pub async fn acquire_all(&self) -> Result<Vec<LockHandle>, LockError> {
        let mut handles = Vec::with_capacity(self.locks.len());

        for lock in &self.locks {
            match lock.acquire().await {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    for (held, handle) in self.locks.iter().zip(handles.iter()).rev() {
                        if let Err(release_err) = held.release(handle).await {
                            warn!(key = handle.key(), error = %release_err, "unwind release failed");
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(handles)
    }

    /// Release every handle, in reverse acquisition order. Returns one flag
    /// per handle (in the input order): `true` iff that lease was deleted.
    /// Store failures are logged and read as `false`.
    pub async fn release_all(&self, handles: &[LockHandle]) -> Vec<bool> {
        let mut results = Vec::with_capacity(handles.len());

        for handle in handles.iter().rev() {
            let released = match self.lock_for(handle.key()) {
                Some(lock) => match lock.release(handle).await {
                    Ok(released) => released,
                    Err(e) => {
                        warn!(key = handle.key(), error = %e, "batch release failed");
                        false
                    }
                },
                None => false,
            };
            results.push(released);
        }

        results.reverse();
        results
    }

    fn lock_for(&self, key: &str) -> Option<&SingleLock> {
        self.locks
            .binary_search_by(|lock| lock.options().key.as_str().cmp(key))
            .ok()
            .map(|i| &self.locks[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_batch_rejected() {
        let err = MultiLock::new(
            unreachable_store(),
            Vec::new(),
            &LockOptions::new("unused"),
        )
        .expect_err("empty batch should be rejected");
        assert!(matches!(err, LockError::Configuration(_)));
    }

    #[test]
    fn keys_are_sorted_and_deduplicated() {
        let batch = MultiLock::new(
            unreachable_store(),
            vec!["b".into(), "a".into(), "c".into(), "a".into()],
            &LockOptions::new("unused"),
        )
        .expect("batch should build");
        let keys: Vec<&str> = batch.keys().collect();
        assert_eq!(keys, ["a", "b", "c"]);
    }

    fn unreachable_store() -> Arc<dyn LockStore> {
        use std::time::Duration;

        use async_trait::async_trait;

        use crate::error::StoreError;
        use crate::store::{ExtendOutcome, Inspection};

        struct Unreachable;

        #[async_trait]
        impl LockStore for Unreachable {
            async fn set_if_absent(
                &self,
                _: &str,
                _: &str,
                _: Duration,
            ) -> Result<bool, StoreError> {
                Err(StoreError::Connection("unreachable".into()))
            }
            async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
                Err(StoreError::Connection("unreachable".into()))
            }
            async fn delete(&self, _: &str) -> Result<u64, StoreError> {
                Err(StoreError::Connection("unreachable".into()))
            }
            async fn delete_if_match(&self, _: &str, _: &str) -> Result<bool, StoreError> {
                Err(StoreError::Connection("unreachable".into()))
            }
            async fn extend_if_match(
                &self,
                _: &str,
                _: &str,
                _: Duration,
            ) -> Result<bool, StoreError> {
                Err(StoreError::Connection("unreachable".into()))
            }
            async fn atomic_extend(
                &self,
                _: &str,
                _: &str,
                _: Duration,
                _: Duration,
            ) -> Result<ExtendOutcome, StoreError> {
                Err(StoreError::Connection("unreachable".into()))
            }
            async fn inspect(&self, _: &str) -> Result<Option<Inspection>, StoreError> {
                Err(StoreError::Connection("unreachable".into()))
            }
            async fn ping(&self) -> Result<(), StoreError> {
                Err(StoreError::Connection("unreachable".into()))
            }
            fn is_connected(&self) -> bool {
                false
            }
            async fn disconnect(&self) {}
            fn name(&self) -> &str {
                "unreachable"
            }
        }

        Arc::new(Unreachable)
    }
}

//! Executable contract for [`LockStore`] implementations, plus test-support
//! wrappers used by the protocol scenario tests.
//!
//! Call [`run_store_conformance`] from a backend's test module with a fresh
//! store instance. The suite uses short-lived keys under a `conf-` prefix;
//! point real backends at a throwaway namespace.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::store::{ExtendOutcome, Inspection, LockStore};

/// Run the full store conformance suite.
///
/// # Errors
///
/// Returns an error if any conformance test fails at the store level;
/// contract violations panic with a description.
pub async fn run_store_conformance(store: &dyn LockStore) -> Result<(), StoreError> {
    test_get_missing(store).await?;
    test_set_if_absent(store).await?;
    test_delete(store).await?;
    test_delete_if_match(store).await?;
    test_extend_if_match(store).await?;
    test_atomic_extend_matrix(store).await?;
    test_inspect(store).await?;
    test_input_validation(store).await;
    store.ping().await?;
    Ok(())
}

async fn test_get_missing(store: &dyn LockStore) -> Result<(), StoreError> {
    let val = store.get("conf-missing").await?;
    assert!(val.is_none(), "get on a missing key should return None");
    Ok(())
}

async fn test_set_if_absent(store: &dyn LockStore) -> Result<(), StoreError> {
    let installed = store
        .set_if_absent("conf-sia", "v1", Duration::from_secs(60))
        .await?;
    assert!(installed, "set_if_absent on a new key should succeed");

    let installed = store
        .set_if_absent("conf-sia", "v2", Duration::from_secs(60))
        .await?;
    assert!(!installed, "set_if_absent on a held key should fail");

    let val = store.get("conf-sia").await?;
    assert_eq!(val.as_deref(), Some("v1"), "original value should remain");

    store.delete("conf-sia").await?;
    Ok(())
}

async fn test_delete(store: &dyn LockStore) -> Result<(), StoreError> {
    store
        .set_if_absent("conf-del", "v", Duration::from_secs(60))
        .await?;
    assert_eq!(store.delete("conf-del").await?, 1);
    assert_eq!(store.delete("conf-del").await?, 0, "second delete is a no-op");
    Ok(())
}

async fn test_delete_if_match(store: &dyn LockStore) -> Result<(), StoreError> {
    store
        .set_if_absent("conf-dim", "mine", Duration::from_secs(60))
        .await?;

    let deleted = store.delete_if_match("conf-dim", "theirs").await?;
    assert!(!deleted, "mismatched value must not delete");
    assert_eq!(store.get("conf-dim").await?.as_deref(), Some("mine"));

    let deleted = store.delete_if_match("conf-dim", "mine").await?;
    assert!(deleted, "matching value should delete");
    assert!(store.get("conf-dim").await?.is_none());

    let deleted = store.delete_if_match("conf-dim", "mine").await?;
    assert!(!deleted, "delete of an absent key reports false");
    Ok(())
}

async fn test_extend_if_match(store: &dyn LockStore) -> Result<(), StoreError> {
    store
        .set_if_absent("conf-eim", "mine", Duration::from_secs(10))
        .await?;

    let extended = store
        .extend_if_match("conf-eim", "theirs", Duration::from_secs(60))
        .await?;
    assert!(!extended, "mismatched value must not extend");

    let extended = store
        .extend_if_match("conf-eim", "mine", Duration::from_secs(60))
        .await?;
    assert!(extended, "matching value should extend");

    let inspection = store.inspect("conf-eim").await?.expect("key should exist");
    assert!(
        inspection.remaining > Duration::from_secs(10),
        "expiry should have been reset past the original ttl"
    );

    let extended = store
        .extend_if_match("conf-eim-absent", "mine", Duration::from_secs(60))
        .await?;
    assert!(!extended, "extend of an absent key reports false");

    store.delete("conf-eim").await?;
    Ok(())
}

async fn test_atomic_extend_matrix(store: &dyn LockStore) -> Result<(), StoreError> {
    // Absent key.
    let outcome = store
        .atomic_extend("conf-ae-absent", "v", Duration::from_secs(1), Duration::from_secs(5))
        .await?;
    assert_eq!(outcome, ExtendOutcome::NotFound);

    // Wrong value: nothing mutated.
    store
        .set_if_absent("conf-ae", "mine", Duration::from_secs(10))
        .await?;
    let outcome = store
        .atomic_extend("conf-ae", "theirs", Duration::from_millis(1), Duration::from_secs(60))
        .await?;
    assert!(
        matches!(outcome, ExtendOutcome::ValueMismatch { .. }),
        "expected ValueMismatch, got {outcome:?}"
    );
    let inspection = store.inspect("conf-ae").await?.expect("key should exist");
    assert!(
        inspection.remaining <= Duration::from_secs(10),
        "mismatch must not reset the expiry"
    );

    // Remaining TTL below the safety window: refused, expiry untouched.
    let outcome = store
        .atomic_extend("conf-ae", "mine", Duration::from_secs(60), Duration::from_secs(60))
        .await?;
    match outcome {
        ExtendOutcome::TooLate { remaining } => {
            assert!(remaining <= Duration::from_secs(10));
        }
        other => panic!("expected TooLate, got {other:?}"),
    }
    let inspection = store.inspect("conf-ae").await?.expect("key should exist");
    assert!(
        inspection.remaining <= Duration::from_secs(10),
        "a refused extension must not reset the expiry"
    );

    // Healthy renewal.
    let outcome = store
        .atomic_extend("conf-ae", "mine", Duration::from_millis(1), Duration::from_secs(60))
        .await?;
    assert_eq!(
        outcome,
        ExtendOutcome::Extended {
            ttl: Duration::from_secs(60)
        }
    );
    let inspection = store.inspect("conf-ae").await?.expect("key should exist");
    assert!(inspection.remaining > Duration::from_secs(10));

    store.delete("conf-ae").await?;
    Ok(())
}

async fn test_inspect(store: &dyn LockStore) -> Result<(), StoreError> {
    assert!(store.inspect("conf-inspect-absent").await?.is_none());

    store
        .set_if_absent("conf-inspect", "holder", Duration::from_secs(30))
        .await?;
    let Inspection { value, remaining } =
        store.inspect("conf-inspect").await?.expect("key should exist");
    assert_eq!(value, "holder");
    assert!(remaining > Duration::ZERO && remaining <= Duration::from_secs(30));

    store.delete("conf-inspect").await?;
    Ok(())
}

async fn test_input_validation(store: &dyn LockStore) {
    let err = store
        .set_if_absent("", "v", Duration::from_secs(1))
        .await
        .expect_err("empty key must be rejected");
    assert!(matches!(err, StoreError::InvalidInput(_)));

    let err = store
        .set_if_absent("conf-val", "bad\nvalue", Duration::from_secs(1))
        .await
        .expect_err("control bytes in the value must be rejected");
    assert!(matches!(err, StoreError::InvalidInput(_)));

    let err = store
        .set_if_absent("conf-val", "v", Duration::ZERO)
        .await
        .expect_err("zero ttl must be rejected");
    assert!(matches!(err, StoreError::InvalidInput(_)));
}

/// A [`LockStore`] wrapper that can be switched into failing or hanging
/// states, for exercising partial-failure and deadline paths in the quorum
/// protocol.
pub struct FlakyStore {
    inner: Arc<dyn LockStore>,
    down: AtomicBool,
    hung: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn LockStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            down: AtomicBool::new(false),
            hung: AtomicBool::new(false),
        })
    }

    /// Make every subsequent operation fail with a connection error (or
    /// recover when `down` is false).
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Make every subsequent operation pend forever, like a server that
    /// accepts connections but never answers. Callers are expected to be
    /// saved by their own deadlines.
    pub fn set_hung(&self, hung: bool) {
        self.hung.store(hung, Ordering::SeqCst);
    }

    async fn check(&self) -> Result<(), StoreError> {
        if self.hung.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("store is down".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LockStore for FlakyStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.check().await?;
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check().await?;
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        self.check().await?;
        self.inner.delete(key).await
    }

    async fn delete_if_match(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        self.check().await?;
        self.inner.delete_if_match(key, value).await
    }

    async fn extend_if_match(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.check().await?;
        self.inner.extend_if_match(key, value, ttl).await
    }

    async fn atomic_extend(
        &self,
        key: &str,
        value: &str,
        min_remaining: Duration,
        new_ttl: Duration,
    ) -> Result<ExtendOutcome, StoreError> {
        self.check().await?;
        self.inner
            .atomic_extend(key, value, min_remaining, new_ttl)
            .await
    }

    async fn inspect(&self, key: &str) -> Result<Option<Inspection>, StoreError> {
        self.check().await?;
        self.inner.inspect(key).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check().await?;
        self.inner.ping().await
    }

    fn is_connected(&self) -> bool {
        !self.down.load(Ordering::SeqCst) && self.inner.is_connected()
    }

    async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

//! Single-store lock protocol.
//!
//! Acquisition is an atomic set-if-absent with a fixed-delay retry budget;
//! release and extension verify the lease value server-side in the same
//! atomic unit as the mutation, so a stale holder can never touch a lease
//! that has been reacquired by someone else.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::error::{FailureReason, LockError};
use crate::handle::{AcquisitionMetadata, LockHandle, Strategy};
use crate::id;
use crate::options::{LockOptions, SupervisorOptions};
use crate::store::{ExtendOutcome, LockStore};
use crate::supervisor::{self, AbortSignal, Supervised};

/// A mutual-exclusion lease on one key against one store.
pub struct SingleLock {
    store: Arc<dyn LockStore>,
    options: LockOptions,
}

impl std::fmt::Debug for SingleLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleLock")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl SingleLock {
    /// Create a lock for the key described by `options`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Configuration`] when the options are invalid
    /// (empty key, zero TTL, out-of-range supervisor ratios).
    pub fn new(store: Arc<dyn LockStore>, options: LockOptions) -> Result<Self, LockError> {
        options.validate()?;
        Ok(Self { store, options })
    }

    /// The options this lock was built with.
    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Acquire the lease, retrying up to the configured budget with a fixed
    /// delay between tries.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Acquisition`] when every try found the key held
    /// by someone else or failed at the store; the last store error, if
    /// any, is attached as the cause.
    #[instrument(skip(self), fields(key = %self.options.key))]
    pub async fn acquire(&self) -> Result<LockHandle, LockError> {
        let started = Instant::now();
        let value = id::new_lease_value();
        let tries = self.options.retry_attempts.saturating_add(1);
        let mut last_err = None;

        for attempt in 1..=tries {
            match self
                .store
                .set_if_absent(&self.options.key, &value, self.options.ttl)
                .await
            {
                Ok(true) => {
                    debug!(attempt, "lease acquired");
                    return Ok(LockHandle::new(
                        self.options.key.clone(),
                        value,
                        self.options.ttl,
                        AcquisitionMetadata {
                            attempts: attempt,
                            elapsed: started.elapsed(),
                            nodes: vec![self.store.name().to_owned()],
                            strategy: Strategy::Single,
                            validity: None,
                        },
                    ));
                }
                Ok(false) => debug!(attempt, "key already held"),
                Err(e) => {
                    warn!(attempt, error = %e, "store error during acquisition");
                    last_err = Some(e);
                }
            }

            if attempt < tries {
                tokio::time::sleep(self.options.retry_delay).await;
            }
        }

        Err(LockError::Acquisition {
            key: self.options.key.clone(),
            attempts: tries,
            source: last_err,
        })
    }

    /// Release the lease held by `handle`.
    ///
    /// Returns `Ok(true)` iff the lease was deleted, `Ok(false)` when it was
    /// already gone (expired or taken over) — an ordinary outcome, not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Release`] when the handle targets a different
    /// key or the store call fails.
    pub async fn release(&self, handle: &LockHandle) -> Result<bool, LockError> {
        if handle.key() != self.options.key {
            return Err(LockError::Release {
                key: handle.key().to_owned(),
                reason: FailureReason::WrongValue,
                source: None,
            });
        }

        self.store
            .delete_if_match(&self.options.key, handle.value())
            .await
            .map_err(|e| LockError::Release {
                key: self.options.key.clone(),
                reason: FailureReason::Store,
                source: Some(e),
            })
    }

    /// Reset the lease expiry to `new_ttl`.
    ///
    /// Returns `Ok(true)` iff the lease still belonged to `handle` and was
    /// extended; `Ok(false)` means the lease is lost and the handle is
    /// dead.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Configuration`] for a zero TTL and
    /// [`LockError::Extension`] when the handle targets a different key or
    /// the store call fails.
    pub async fn extend(
        &self,
        handle: &LockHandle,
        new_ttl: Duration,
    ) -> Result<bool, LockError> {
        if new_ttl.is_zero() {
            return Err(LockError::Configuration("new ttl must be positive".into()));
        }
        if handle.key() != self.options.key {
            return Err(LockError::Extension {
                key: handle.key().to_owned(),
                reason: FailureReason::WrongValue,
                source: None,
            });
        }

        self.store
            .extend_if_match(&self.options.key, handle.value(), new_ttl)
            .await
            .map_err(|e| LockError::Extension {
                key: self.options.key.clone(),
                reason: FailureReason::Store,
                source: Some(e),
            })
    }

    /// Best-effort diagnostic: whether any holder currently has the key.
    /// Transport errors read as `false`; do not build safety decisions on
    /// this.
    pub async fn is_locked(&self) -> bool {
        matches!(self.store.get(&self.options.key).await, Ok(Some(_)))
    }

    /// Run `routine` inside the lease with automatic renewal.
    ///
    /// The lease is acquired first (the routine is not invoked when that
    /// fails), renewed whenever its remaining TTL crosses the supervisor
    /// threshold, and released on every exit path. A failed renewal aborts
    /// the [`AbortSignal`] passed to the routine; the routine's own result
    /// is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Acquisition`] when the lease cannot be
    /// acquired.
    #[instrument(skip(self, routine), fields(key = %self.options.key))]
    pub async fn using<F, Fut, T>(&self, routine: F) -> Result<T, LockError>
    where
        F: FnOnce(AbortSignal) -> Fut,
        Fut: Future<Output = T>,
    {
        let handle = self.acquire().await?;
        Ok(supervisor::supervise(self, &handle, routine).await)
    }
}

#[async_trait]
impl Supervised for SingleLock {
    fn lease_key(&self) -> &str {
        &self.options.key
    }

    fn lease_ttl(&self) -> Duration {
        self.options.ttl
    }

    fn supervisor_options(&self) -> &SupervisorOptions {
        &self.options.supervisor
    }

    async fn renew(&self, handle: &LockHandle, min_remaining: Duration) -> Result<(), String> {
        let key = &self.options.key;
        match self
            .store
            .atomic_extend(key, handle.value(), min_remaining, self.options.ttl)
            .await
        {
            Ok(ExtendOutcome::Extended { .. }) => Ok(()),
            Ok(ExtendOutcome::TooLate { remaining }) => Err(format!(
                "renewal of key `{key}` refused: {remaining:?} left, below the safety window"
            )),
            Ok(ExtendOutcome::ValueMismatch { .. }) => {
                Err(format!("key `{key}` is now held by someone else"))
            }
            Ok(ExtendOutcome::NotFound) => Err(format!("key `{key}` no longer exists")),
            Err(e) => Err(format!("store error while renewing key `{key}`: {e}")),
        }
    }

    async fn settle(&self, handle: &LockHandle) {
        match self
            .store
            .delete_if_match(&self.options.key, handle.value())
            .await
        {
            Ok(true) => debug!(key = %self.options.key, "lease released"),
            Ok(false) => debug!(key = %self.options.key, "lease already gone at release"),
            Err(e) => {
                warn!(key = %self.options.key, error = %e, "release failed; lease will expire on its own");
            }
        }
    }
}

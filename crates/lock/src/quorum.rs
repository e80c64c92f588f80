//! Quorum lock protocol across independent stores.
//!
//! One lease value is written to every store in parallel; the lock commits
//! when a quorum of stores accepted it and enough of the TTL survives the
//! acquisition round trip plus a clock-drift allowance. Anything short of
//! that is unwound with best-effort deletes on every store, including ones
//! that timed out, since their write may still have landed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use rand_core::{OsRng, RngCore};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::error::{FailureReason, LockError, StoreError};
use crate::handle::{AcquisitionMetadata, LockHandle, Strategy};
use crate::id;
use crate::options::{QuorumOptions, SupervisorOptions};
use crate::store::{ExtendOutcome, LockStore};
use crate::supervisor::{self, AbortSignal, Supervised};

/// A mutual-exclusion lease on one key across multiple independent stores.
pub struct QuorumLock {
    stores: Vec<Arc<dyn LockStore>>,
    quorum: usize,
    options: QuorumOptions,
}

impl QuorumLock {
    /// Create a quorum lock over `stores` for the key described by
    /// `options`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Configuration`] when the options are invalid:
    /// no stores, a quorum outside `1..=N`, zero TTL, a drift factor
    /// outside `[0, 1)`, or an acquire timeout at or above the TTL.
    pub fn new(
        stores: Vec<Arc<dyn LockStore>>,
        options: QuorumOptions,
    ) -> Result<Self, LockError> {
        options.validate(stores.len())?;
        let quorum = options.quorum.unwrap_or(stores.len() / 2 + 1);
        Ok(Self {
            stores,
            quorum,
            options,
        })
    }

    /// The number of stores that must accept an acquisition.
    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// The options this lock was built with.
    pub fn options(&self) -> &QuorumOptions {
        &self.options
    }

    /// Acquire the lease on a quorum of stores.
    ///
    /// Each round writes to every store in parallel under a per-store
    /// deadline; a round that misses quorum or has too little validity left
    /// is unwound everywhere before the next try. Retries are delayed by
    /// the configured base delay with ±50% jitter and stop early once the
    /// elapsed time plus the next delay would outlive the TTL.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Acquisition`] when the retry budget is
    /// exhausted; the last store error observed, if any, is attached.
    #[instrument(skip(self), fields(key = %self.options.key))]
    pub async fn acquire(&self) -> Result<LockHandle, LockError> {
        let started = Instant::now();
        let value = id::new_lease_value();
        let tries = self.options.retry_attempts.saturating_add(1);
        let per_store = self.options.effective_acquire_timeout();
        let mut last_err: Option<StoreError> = None;
        let mut attempts_used = 0;

        for attempt in 1..=tries {
            attempts_used = attempt;
            let round_start = Instant::now();

            let results = join_all(self.stores.iter().map(|store| {
                let key = self.options.key.as_str();
                let value = value.as_str();
                let ttl = self.options.ttl;
                async move {
                    match tokio::time::timeout(per_store, store.set_if_absent(key, value, ttl))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(StoreError::Timeout(per_store)),
                    }
                }
            }))
            .await;

            let mut accepted = Vec::new();
            for (store, result) in self.stores.iter().zip(results) {
                match result {
                    Ok(true) => accepted.push(store.name().to_owned()),
                    Ok(false) => debug!(store = store.name(), attempt, "key already held"),
                    Err(e) => {
                        debug!(store = store.name(), attempt, error = %e, "store did not accept");
                        last_err = Some(e);
                    }
                }
            }

            let validity =
                validity_after(self.options.ttl, round_start.elapsed(), self.options.clock_drift_factor);

            if accepted.len() >= self.quorum {
                if let Some(validity) = validity {
                    debug!(attempt, nodes = accepted.len(), "quorum reached");
                    return Ok(LockHandle::new(
                        self.options.key.clone(),
                        value,
                        self.options.ttl,
                        AcquisitionMetadata {
                            attempts: attempt,
                            elapsed: started.elapsed(),
                            nodes: accepted,
                            strategy: Strategy::Quorum,
                            validity: Some(validity),
                        },
                    ));
                }
                debug!(attempt, "quorum reached but no validity left");
            }

            // A store that timed out may still have accepted the write, so
            // the unwind targets every store, not only the accepting ones.
            self.delete_everywhere(&value).await;

            if attempt < tries {
                let delay = jittered(self.options.retry_delay);
                if started.elapsed() + delay >= self.options.ttl {
                    debug!(attempt, "abandoning retries; budget would outlive the ttl");
                    break;
                }
                tokio::time::sleep(delay).await;
            }
        }

        Err(LockError::Acquisition {
            key: self.options.key.clone(),
            attempts: attempts_used,
            source: last_err,
        })
    }

    /// Release the lease held by `handle` on every configured store — not
    /// only the ones recorded in the handle metadata, since a store that
    /// timed out during acquisition might still hold the lease.
    ///
    /// Returns `Ok(true)` iff at least one store confirmed the deletion.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Release`] only when the handle targets a
    /// different key or every store failed at the transport level.
    pub async fn release(&self, handle: &LockHandle) -> Result<bool, LockError> {
        if handle.key() != self.options.key {
            return Err(LockError::Release {
                key: handle.key().to_owned(),
                reason: FailureReason::WrongValue,
                source: None,
            });
        }

        let results = join_all(
            self.stores
                .iter()
                .map(|store| store.delete_if_match(&self.options.key, handle.value())),
        )
        .await;

        let mut deleted = false;
        let mut failures = 0;
        let mut first_err = None;
        for result in results {
            match result {
                Ok(true) => deleted = true,
                Ok(false) => {}
                Err(e) => {
                    failures += 1;
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }

        if failures == self.stores.len() {
            return Err(LockError::Release {
                key: self.options.key.clone(),
                reason: FailureReason::Store,
                source: first_err,
            });
        }
        Ok(deleted)
    }

    /// Reset the lease expiry to `new_ttl` on a quorum of stores.
    ///
    /// Returns `Ok(true)` iff at least a quorum extended. `Ok(false)` means
    /// the lease must be considered lost; partially reset TTLs are left to
    /// expire on their own.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Configuration`] for a zero TTL and
    /// [`LockError::Extension`] when the handle targets a different key or
    /// every store failed at the transport level.
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

        let min_remaining = self.options.supervisor.safety_window(self.options.ttl);
        let (extended, failures, first_err) =
            self.extend_everywhere(handle, min_remaining, new_ttl).await;

        if failures == self.stores.len() {
            return Err(LockError::Extension {
                key: self.options.key.clone(),
                reason: FailureReason::Store,
                source: first_err,
            });
        }
        Ok(extended >= self.quorum)
    }

    /// Best-effort diagnostic: whether a quorum of stores currently holds
    /// any value under the key. Transport errors read as "not held".
    pub async fn is_locked(&self) -> bool {
        let results = join_all(self.stores.iter().map(|store| store.get(&self.options.key))).await;
        let held = results
            .iter()
            .filter(|r| matches!(r, Ok(Some(_))))
            .count();
        held >= self.quorum
    }

    /// Run `routine` inside the lease with automatic renewal, as
    /// [`SingleLock::using`](crate::single::SingleLock::using) but renewing
    /// on every store and requiring a quorum of successful renewals.
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

    async fn delete_everywhere(&self, value: &str) -> usize {
        let results = join_all(
            self.stores
                .iter()
                .map(|store| store.delete_if_match(&self.options.key, value)),
        )
        .await;
        results.into_iter().filter(|r| matches!(r, Ok(true))).count()
    }

    /// Fan an `atomic_extend` out to every store; returns how many
    /// extended, how many failed transport-wise, and the first error.
    async fn extend_everywhere(
        &self,
        handle: &LockHandle,
        min_remaining: Duration,
        new_ttl: Duration,
    ) -> (usize, usize, Option<StoreError>) {
        let results = join_all(self.stores.iter().map(|store| {
            store.atomic_extend(&self.options.key, handle.value(), min_remaining, new_ttl)
        }))
        .await;

        let mut extended = 0;
        let mut failures = 0;
        let mut first_err = None;
        for (store, result) in self.stores.iter().zip(results) {
            match result {
                Ok(ExtendOutcome::Extended { .. }) => extended += 1,
                Ok(outcome) => {
                    debug!(store = store.name(), ?outcome, "store refused renewal");
                }
                Err(e) => {
                    debug!(store = store.name(), error = %e, "store error during renewal");
                    failures += 1;
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        (extended, failures, first_err)
    }
}

#[async_trait]
impl Supervised for QuorumLock {
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
        let (extended, _, _) = self
            .extend_everywhere(handle, min_remaining, self.options.ttl)
            .await;
        if extended >= self.quorum {
            Ok(())
        } else {
            Err(format!(
                "lost quorum for key `{}`: {extended} of {} stores renewed (need {})",
                self.options.key,
                self.stores.len(),
                self.quorum
            ))
        }
    }

    async fn settle(&self, handle: &LockHandle) {
        let deleted = self.delete_everywhere(handle.value()).await;
        if deleted > 0 {
            debug!(key = %self.options.key, stores = deleted, "lease released");
        } else {
            warn!(key = %self.options.key, "no store confirmed the release; lease will expire on its own");
        }
    }
}

/// Remaining validity of a fresh lease after the acquisition round trip and
/// the clock-drift allowance are subtracted. `None` means the lease cannot
/// be trusted at all.
fn validity_after(ttl: Duration, elapsed: Duration, drift_factor: f64) -> Option<Duration> {
    let drift = Duration::from_millis(1).max(ttl.mul_f64(drift_factor));
    ttl.checked_sub(elapsed)?
        .checked_sub(drift)
        .filter(|v| !v.is_zero())
}

/// Uniform ±50% jitter around the base delay.
fn jittered(delay: Duration) -> Duration {
    let mut buf = [0u8; 4];
    OsRng.fill_bytes(&mut buf);
    let unit = f64::from(u32::from_le_bytes(buf)) / f64::from(u32::MAX);
    delay.mul_f64(0.5 + unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity_subtracts_elapsed_and_drift() {
        // 10 s TTL, 1 s elapsed, 1% drift (100 ms).
        let v = validity_after(
            Duration::from_secs(10),
            Duration::from_secs(1),
            0.01,
        )
        .expect("validity should remain");
        assert_eq!(v, Duration::from_millis(8900));
    }

    #[test]
    fn validity_drift_has_one_millisecond_floor() {
        // Tiny TTL: 1% of 50 ms is below 1 ms, so the floor applies.
        let v = validity_after(Duration::from_millis(50), Duration::ZERO, 0.01)
            .expect("validity should remain");
        assert_eq!(v, Duration::from_millis(49));
    }

    #[test]
    fn validity_gone_when_acquisition_outlives_ttl() {
        assert!(validity_after(
            Duration::from_millis(100),
            Duration::from_millis(200),
            0.01
        )
        .is_none());

        // Exactly consumed: no validity either.
        assert!(validity_after(
            Duration::from_millis(100),
            Duration::from_millis(99),
            0.01
        )
        .is_none());
    }

    #[test]
    fn jitter_stays_within_half_and_one_and_a_half() {
        let base = Duration::from_millis(200);
        for _ in 0..100 {
            let d = jittered(base);
            assert!(d >= Duration::from_millis(100), "jitter below -50%: {d:?}");
            assert!(d <= Duration::from_millis(300), "jitter above +50%: {d:?}");
        }
    }
}

//! Auto-extension supervision for critical sections.
//!
//! [`supervise`] drives a caller-supplied routine and a renewal schedule in
//! the same task: while the routine runs, the lease is renewed whenever its
//! remaining TTL drops below the configured threshold. A failed renewal
//! aborts the signal handed to the routine; the routine is expected to poll
//! it at natural checkpoints and wind down. The lease is released on every
//! exit path, including a panic inside the routine.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::handle::LockHandle;
use crate::options::SupervisorOptions;

/// Cooperative abort signal handed to a [`using`] routine.
///
/// The supervisor never interrupts the routine; it cancels this signal when
/// a renewal fails and the lease can no longer be trusted. Routines should
/// check [`is_aborted`](Self::is_aborted) at natural checkpoints, or await
/// [`cancelled`](Self::cancelled) alongside their own work.
///
/// [`using`]: crate::single::SingleLock::using
#[derive(Debug, Clone)]
pub struct AbortSignal {
    token: CancellationToken,
    error: Arc<OnceLock<String>>,
}

impl AbortSignal {
    pub(crate) fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            error: Arc::new(OnceLock::new()),
        }
    }

    /// Whether the supervisor has given up on the lease.
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes when the signal is aborted. Never completes if the lease
    /// stays healthy for the whole critical section.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// The renewal failure that triggered the abort, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.get().map(String::as_str)
    }

    pub(crate) fn abort(&self, reason: String) {
        let _ = self.error.set(reason);
        self.token.cancel();
    }
}

/// What the supervisor needs from a lock protocol.
#[async_trait]
pub(crate) trait Supervised: Send + Sync {
    fn lease_key(&self) -> &str;
    fn lease_ttl(&self) -> Duration;
    fn supervisor_options(&self) -> &SupervisorOptions;

    /// Renew the lease back to its full TTL, refusing when less than
    /// `min_remaining` is left. `Err` carries a message describing why the
    /// lease must be considered lost.
    async fn renew(&self, handle: &LockHandle, min_remaining: Duration) -> Result<(), String>;

    /// Release the lease, swallowing and logging failures; there is nothing
    /// useful a caller could do with them at this point.
    async fn settle(&self, handle: &LockHandle);
}

/// Delay until the next renewal: time until the remaining TTL crosses the
/// threshold, floored so clock anomalies cannot produce a tight loop.
fn next_renewal_delay(
    last_extension: Instant,
    ttl: Duration,
    threshold: Duration,
    floor: Duration,
) -> Duration {
    let target = last_extension + (ttl - threshold);
    target.saturating_duration_since(Instant::now()).max(floor)
}

/// Run `routine` under renewal supervision of an already-acquired lease.
///
/// At most one renewal is in flight at a time. When the routine finishes
/// while a renewal is still pending, the renewal is awaited to a terminal
/// state (its outcome ignored) before release, so no request is abandoned
/// mid-wire.
pub(crate) async fn supervise<F, Fut, T>(
    lock: &dyn Supervised,
    handle: &LockHandle,
    routine: F,
) -> T
where
    F: FnOnce(AbortSignal) -> Fut,
    Fut: Future<Output = T>,
{
    let opts = lock.supervisor_options();
    let ttl = lock.lease_ttl();
    let threshold = ttl.mul_f64(opts.threshold_ratio);
    let min_remaining = opts.safety_window(ttl);
    let floor = opts.min_extension_interval;

    let signal = AbortSignal::new();
    let routine_fut = AssertUnwindSafe(routine(signal.clone())).catch_unwind();
    tokio::pin!(routine_fut);

    let mut last_extension = Instant::now();

    let outcome = loop {
        let delay = next_renewal_delay(last_extension, ttl, threshold, floor);
        tokio::select! {
            out = &mut routine_fut => break out,
            () = tokio::time::sleep(delay) => {}
        }

        let renew_fut = lock.renew(handle, min_remaining);
        tokio::pin!(renew_fut);
        let renewed = tokio::select! {
            out = &mut routine_fut => {
                let _ = renew_fut.await;
                break out;
            }
            renewed = &mut renew_fut => renewed,
        };

        match renewed {
            Ok(()) => {
                last_extension = Instant::now();
                tracing::debug!(key = %lock.lease_key(), "lease renewed");
            }
            Err(reason) => {
                tracing::warn!(key = %lock.lease_key(), %reason, "lease lost; aborting critical section");
                signal.abort(reason);
                break (&mut routine_fut).await;
            }
        }
    };

    lock.settle(handle).await;

    match outcome {
        Ok(value) => value,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn renewal_delay_targets_threshold_crossing() {
        let ttl = Duration::from_secs(10);
        let threshold = Duration::from_secs(2);
        let floor = Duration::from_millis(100);

        // Fresh lease: renew once 80% of the TTL has elapsed.
        let delay = next_renewal_delay(Instant::now(), ttl, threshold, floor);
        assert_eq!(delay, Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_delay_is_floored() {
        let ttl = Duration::from_secs(10);
        let threshold = Duration::from_secs(2);
        let floor = Duration::from_millis(100);

        // A lease extended long ago is overdue; the floor still applies.
        let stale = Instant::now();
        tokio::time::advance(Duration::from_secs(30)).await;
        let delay = next_renewal_delay(stale, ttl, threshold, floor);
        assert_eq!(delay, floor);
    }

    #[tokio::test]
    async fn abort_signal_records_first_error() {
        let signal = AbortSignal::new();
        assert!(!signal.is_aborted());
        assert!(signal.error().is_none());

        signal.abort("lost quorum".into());
        signal.abort("second reason".into());

        assert!(signal.is_aborted());
        assert_eq!(signal.error(), Some("lost quorum"));
        // Already aborted: completes immediately.
        signal.cancelled().await;
    }

    #[tokio::test]
    async fn abort_signal_clones_share_state() {
        let signal = AbortSignal::new();
        let observer = signal.clone();
        signal.abort("gone".into());
        assert!(observer.is_aborted());
        assert_eq!(observer.error(), Some("gone"));
    }
}

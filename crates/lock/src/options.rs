use std::time::Duration;

use crate::error::LockError;
use crate::store;

/// Tuning for the auto-extension supervisor used by
/// [`using`](crate::single::SingleLock::using).
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Renew when the remaining TTL drops below this fraction of the
    /// original TTL.
    pub threshold_ratio: f64,
    /// Floor on the delay between renewals, so clock anomalies cannot
    /// produce a tight renewal loop.
    pub min_extension_interval: Duration,
    /// Fraction of the TTL used as the renewal safety window.
    pub safety_buffer_ratio: f64,
    /// Absolute ceiling on the safety window.
    pub safety_cap: Duration,
}

impl SupervisorOptions {
    /// Defaults for single-store locks (safety window 10% of TTL).
    pub fn single() -> Self {
        Self {
            threshold_ratio: 0.2,
            min_extension_interval: Duration::from_millis(100),
            safety_buffer_ratio: 0.1,
            safety_cap: Duration::from_millis(2000),
        }
    }

    /// Defaults for quorum locks (safety window 20% of TTL, to absorb
    /// cross-store clock skew).
    pub fn quorum() -> Self {
        Self {
            safety_buffer_ratio: 0.2,
            ..Self::single()
        }
    }

    /// Effective safety window for a lease of the given TTL.
    pub(crate) fn safety_window(&self, ttl: Duration) -> Duration {
        self.safety_cap.min(ttl.mul_f64(self.safety_buffer_ratio))
    }

    fn validate(&self) -> Result<(), LockError> {
        if !(self.threshold_ratio > 0.0 && self.threshold_ratio < 1.0) {
            return Err(LockError::Configuration(
                "threshold_ratio must be in (0, 1)".into(),
            ));
        }
        if !(self.safety_buffer_ratio > 0.0 && self.safety_buffer_ratio < 1.0) {
            return Err(LockError::Configuration(
                "safety_buffer_ratio must be in (0, 1)".into(),
            ));
        }
        if self.min_extension_interval.is_zero() {
            return Err(LockError::Configuration(
                "min_extension_interval must be positive".into(),
            ));
        }
        if self.safety_cap.is_zero() {
            return Err(LockError::Configuration(
                "safety_cap must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self::single()
    }
}

/// Configuration for a single-store lock.
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// The logical key to lock.
    pub key: String,
    /// Lease duration.
    pub ttl: Duration,
    /// Additional acquisition tries after the first (0 = exactly one try).
    pub retry_attempts: u32,
    /// Fixed delay between acquisition tries.
    pub retry_delay: Duration,
    /// Auto-extension tuning for [`using`](crate::single::SingleLock::using).
    pub supervisor: SupervisorOptions,
}

impl LockOptions {
    /// Options for `key` with the default TTL (30 s), 3 retries, and a
    /// 100 ms retry delay.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ttl: Duration::from_secs(30),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
            supervisor: SupervisorOptions::single(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), LockError> {
        store::validate_key(&self.key)
            .map_err(|e| LockError::Configuration(e.to_string()))?;
        if self.ttl.is_zero() {
            return Err(LockError::Configuration("ttl must be positive".into()));
        }
        self.supervisor.validate()
    }
}

/// Configuration for a quorum lock across multiple independent stores.
#[derive(Debug, Clone)]
pub struct QuorumOptions {
    /// The logical key to lock.
    pub key: String,
    /// Lease duration.
    pub ttl: Duration,
    /// Stores that must accept the lease for a commit. `None` means a
    /// simple majority of the configured stores.
    pub quorum: Option<usize>,
    /// Additional acquisition rounds after the first.
    pub retry_attempts: u32,
    /// Base delay between acquisition rounds; a ±50% uniform jitter is
    /// applied to reduce live-lock between competing acquirers.
    pub retry_delay: Duration,
    /// Fractional allowance subtracted from the TTL to account for clock
    /// skew between stores.
    pub clock_drift_factor: f64,
    /// Per-store deadline for each acquisition attempt. `None` means
    /// `min(1 s, ttl / 2)`. Must be strictly below the TTL so one hung
    /// store cannot burn the whole lease.
    pub acquire_timeout: Option<Duration>,
    /// Auto-extension tuning for [`using`](crate::quorum::QuorumLock::using).
    pub supervisor: SupervisorOptions,
}

impl QuorumOptions {
    /// Options for `key` with the default TTL (30 s), majority quorum,
    /// 3 retries, and a 200 ms base retry delay.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ttl: Duration::from_secs(30),
            quorum: None,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(200),
            clock_drift_factor: 0.01,
            acquire_timeout: None,
            supervisor: SupervisorOptions::quorum(),
        }
    }

    /// The per-store acquisition deadline in effect.
    pub(crate) fn effective_acquire_timeout(&self) -> Duration {
        self.acquire_timeout
            .unwrap_or_else(|| Duration::from_secs(1).min(self.ttl / 2))
    }

    pub(crate) fn validate(&self, store_count: usize) -> Result<(), LockError> {
        store::validate_key(&self.key)
            .map_err(|e| LockError::Configuration(e.to_string()))?;
        if self.ttl.is_zero() {
            return Err(LockError::Configuration("ttl must be positive".into()));
        }
        if store_count == 0 {
            return Err(LockError::Configuration(
                "a quorum lock needs at least one store".into(),
            ));
        }
        let quorum = self.quorum.unwrap_or(store_count / 2 + 1);
        if quorum == 0 || quorum > store_count {
            return Err(LockError::Configuration(format!(
                "quorum {quorum} is outside 1..={store_count}"
            )));
        }
        if !(0.0..1.0).contains(&self.clock_drift_factor) {
            return Err(LockError::Configuration(
                "clock_drift_factor must be in [0, 1)".into(),
            ));
        }
        if let Some(t) = self.acquire_timeout {
            if t.is_zero() || t >= self.ttl {
                return Err(LockError::Configuration(
                    "acquire_timeout must be positive and below the ttl".into(),
                ));
            }
        }
        self.supervisor.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_defaults() {
        let opts = LockOptions::new("k");
        assert_eq!(opts.ttl, Duration::from_secs(30));
        assert_eq!(opts.retry_attempts, 3);
        assert_eq!(opts.retry_delay, Duration::from_millis(100));
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn quorum_defaults() {
        let opts = QuorumOptions::new("k");
        assert_eq!(opts.retry_delay, Duration::from_millis(200));
        assert!((opts.clock_drift_factor - 0.01).abs() < f64::EPSILON);
        assert!(opts.quorum.is_none());
        assert!(opts.validate(5).is_ok());
    }

    #[test]
    fn empty_key_is_configuration_error() {
        let opts = LockOptions::new("");
        assert!(matches!(
            opts.validate(),
            Err(LockError::Configuration(_))
        ));
    }

    #[test]
    fn zero_ttl_is_configuration_error() {
        let opts = LockOptions {
            ttl: Duration::ZERO,
            ..LockOptions::new("k")
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn quorum_must_fit_store_count() {
        let opts = QuorumOptions {
            quorum: Some(4),
            ..QuorumOptions::new("k")
        };
        assert!(opts.validate(3).is_err());
        assert!(opts.validate(5).is_ok());

        let opts = QuorumOptions::new("k");
        assert!(opts.validate(0).is_err());
    }

    #[test]
    fn acquire_timeout_must_be_below_ttl() {
        let opts = QuorumOptions {
            ttl: Duration::from_secs(1),
            acquire_timeout: Some(Duration::from_secs(1)),
            ..QuorumOptions::new("k")
        };
        assert!(opts.validate(3).is_err());
    }

    #[test]
    fn effective_acquire_timeout_stays_below_ttl() {
        let opts = QuorumOptions {
            ttl: Duration::from_millis(400),
            ..QuorumOptions::new("k")
        };
        assert_eq!(opts.effective_acquire_timeout(), Duration::from_millis(200));

        let opts = QuorumOptions::new("k");
        assert_eq!(opts.effective_acquire_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn supervisor_ratio_bounds() {
        let opts = LockOptions {
            supervisor: SupervisorOptions {
                threshold_ratio: 1.0,
                ..SupervisorOptions::single()
            },
            ..LockOptions::new("k")
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn safety_window_is_capped() {
        let opts = SupervisorOptions::single();
        // 10% of 60 s is 6 s, capped at 2 s.
        assert_eq!(
            opts.safety_window(Duration::from_secs(60)),
            Duration::from_millis(2000)
        );
        // 10% of 5 s is 500 ms, under the cap.
        assert_eq!(
            opts.safety_window(Duration::from_secs(5)),
            Duration::from_millis(500)
        );
    }
}

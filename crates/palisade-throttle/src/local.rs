//! Local pass/fail gates.
//!
//! Authoritative counting happens in the remote counting service; these
//! gates only answer the hard-limit and subscription-burst questions that
//! must not wait for remote aggregation.

use std::num::NonZeroU32;
use std::sync::Arc;

use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Hard-limit and burst gates, keyed by throttle key.
pub struct LocalGates {
    hard: Option<KeyedLimiter>,
    /// Burst gates are created per key because each subscription policy
    /// carries its own quota.
    burst: DashMap<String, Arc<DefaultDirectRateLimiter>>,
}

impl LocalGates {
    /// Create the gates; a zero hard limit disables the hard gate.
    #[must_use]
    pub fn new(hard_limit_per_min: u32) -> Self {
        let hard = NonZeroU32::new(hard_limit_per_min)
            .map(|limit| RateLimiter::keyed(Quota::per_minute(limit)));
        Self {
            hard,
            burst: DashMap::new(),
        }
    }

    /// Check the deployment hard limit for a key. Returns `true` when the
    /// request is allowed.
    #[must_use]
    pub fn check_hard_limit(&self, key: &str) -> bool {
        self.hard
            .as_ref()
            .is_none_or(|limiter| limiter.check_key(&key.to_string()).is_ok())
    }

    /// Check the burst (spike-arrest) gate for a key with the given quota.
    /// A zero quota disables the gate. Returns `true` when allowed.
    #[must_use]
    pub fn check_burst(&self, key: &str, per_min: u32) -> bool {
        let Some(limit) = NonZeroU32::new(per_min) else {
            return true;
        };
        let limiter = self
            .burst
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::direct(Quota::per_minute(limit))))
            .clone();
        limiter.check().is_ok()
    }
}

impl std::fmt::Debug for LocalGates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalGates")
            .field("hard_enabled", &self.hard.is_some())
            .field("burst_keys", &self.burst.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_hard_limit_always_allows() {
        let gates = LocalGates::new(0);
        for _ in 0..1000 {
            assert!(gates.check_hard_limit("/petstore:1.0.0"));
        }
    }

    #[test]
    fn test_hard_limit_trips() {
        let gates = LocalGates::new(5);
        let allowed = (0..10).filter(|_| gates.check_hard_limit("/petstore:1.0.0")).count();
        assert!(allowed < 10);
        // Other keys are unaffected.
        assert!(gates.check_hard_limit("/other:1.0.0"));
    }

    #[test]
    fn test_burst_gate_per_key_quota() {
        let gates = LocalGates::new(0);
        let allowed = (0..10).filter(|_| gates.check_burst("sub-1", 3)).count();
        assert!(allowed <= 3 + 1); // governor allows an initial burst of the quota
        assert!(allowed < 10);
        assert!(gates.check_burst("sub-2", 3));
    }

    #[test]
    fn test_zero_burst_quota_disables_gate() {
        let gates = LocalGates::new(0);
        for _ in 0..100 {
            assert!(gates.check_burst("sub-1", 0));
        }
    }
}

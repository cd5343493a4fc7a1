//! Adaptive multi-identifier limiter — wraps a map of [`TokenBucket`]s and
//! scales the capacity of *newly created* buckets by a load factor sampled
//! from CPU/memory usage (§4.2). Existing buckets keep their original
//! capacity — the spec chooses stability over strict fairness here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use gw_error::ClassifiedError;

use crate::bucket::TokenBucket;

/// CPU/memory usage snapshot used to compute the load factor.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadSample {
    pub cpu_usage: f64,
    pub memory_usage: f64,
}

/// Load factor table from §4.2.
fn load_factor(sample: LoadSample) -> f64 {
    if sample.cpu_usage > 0.80 || sample.memory_usage > 0.80 {
        0.5
    } else if sample.cpu_usage < 0.50 && sample.memory_usage < 0.50 {
        1.2
    } else {
        1.0
    }
}

/// A rate limiter keyed by an arbitrary identifier string (user/session/IP),
/// whose new-bucket capacity adapts to system load.
pub struct AdaptiveLimiter {
    buckets: DashMap<String, TokenBucket>,
    base_limit: u64,
    window: Duration,
    /// Fixed-point load factor (`f * 1000`) so it can be read/written
    /// atomically without a lock on the hot path.
    load_factor_milli: AtomicU64,
}

impl AdaptiveLimiter {
    pub fn new(base_limit: u64, window: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            base_limit,
            window,
            load_factor_milli: AtomicU64::new(1000),
        }
    }

    /// Update the load factor from a fresh sample. Intended to be driven by
    /// a sampler subscribed to the memory-pressure bus (C2).
    pub fn update_load(&self, sample: LoadSample) {
        let f = load_factor(sample);
        self.load_factor_milli.store((f * 1000.0) as u64, Ordering::Relaxed);
    }

    fn current_load_factor(&self) -> f64 {
        self.load_factor_milli.load(Ordering::Relaxed) as f64 / 1000.0
    }

    fn effective_capacity(&self) -> f64 {
        (self.base_limit as f64 * self.current_load_factor()).floor()
    }

    /// Check and consume one token for `identifier`. Creates a bucket with
    /// the *current* effective capacity if none exists yet.
    pub fn allow(&self, identifier: &str) -> Result<(), ClassifiedError> {
        self.allow_n(identifier, 1.0)
    }

    pub fn allow_n(&self, identifier: &str, n: f64) -> Result<(), ClassifiedError> {
        let mut bucket = self.buckets.entry(identifier.to_string()).or_insert_with(|| {
            let capacity = self.effective_capacity().max(0.0);
            let refill_rate = capacity / self.window.as_secs_f64().max(1e-9);
            TokenBucket::new(capacity, refill_rate)
        });

        if bucket.allow(n) {
            Ok(())
        } else {
            Err(ClassifiedError::rate_limited(identifier))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_factor_table_matches_spec() {
        assert_eq!(load_factor(LoadSample { cpu_usage: 0.81, memory_usage: 0.0 }), 0.5);
        assert_eq!(load_factor(LoadSample { cpu_usage: 0.0, memory_usage: 0.81 }), 0.5);
        assert_eq!(load_factor(LoadSample { cpu_usage: 0.49, memory_usage: 0.49 }), 1.2);
        assert_eq!(load_factor(LoadSample { cpu_usage: 0.6, memory_usage: 0.6 }), 1.0);
    }

    #[test]
    fn boundary_at_exactly_0_50_and_0_80() {
        // Exactly 0.50 is not "< 0.50", and exactly 0.80 is not "> 0.80" —
        // both fall into the "otherwise" bucket, f = 1.0.
        assert_eq!(load_factor(LoadSample { cpu_usage: 0.50, memory_usage: 0.50 }), 1.0);
        assert_eq!(load_factor(LoadSample { cpu_usage: 0.80, memory_usage: 0.0 }), 1.0);
    }

    #[test]
    fn new_buckets_pick_up_current_load_factor_but_existing_ones_are_stable() {
        let limiter = AdaptiveLimiter::new(10, Duration::from_secs(60));
        limiter.update_load(LoadSample { cpu_usage: 0.9, memory_usage: 0.0 });
        // First touch creates the bucket at capacity floor(10*0.5) = 5.
        assert!(limiter.allow("alice").is_ok());
        let cap_before = limiter.buckets.get("alice").unwrap().capacity();
        assert_eq!(cap_before, 5.0);

        // Load recovers, but alice's existing bucket keeps its capacity.
        limiter.update_load(LoadSample { cpu_usage: 0.1, memory_usage: 0.1 });
        assert_eq!(limiter.buckets.get("alice").unwrap().capacity(), 5.0);

        // A brand new identifier picks up the new load factor (floor(10*1.2)=12).
        assert!(limiter.allow("bob").is_ok());
        assert_eq!(limiter.buckets.get("bob").unwrap().capacity(), 12.0);
    }

    #[test]
    fn sixth_request_in_one_second_is_denied_with_five_allowed() {
        let limiter = AdaptiveLimiter::new(5, Duration::from_secs(60));
        for _ in 0..5 {
            assert!(limiter.allow("carol").is_ok());
        }
        let result = limiter.allow("carol");
        assert!(result.is_err());
    }
}

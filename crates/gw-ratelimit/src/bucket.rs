//! Token bucket — the primitive the adaptive limiter builds on.

use std::time::Instant;

/// A single token bucket. `tokens` is fractional so that lazy refill never
/// loses precision across many small ticks.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Attempt to consume `n` tokens at the given monotonic instant.
    /// `n == 0` always succeeds (and still refills), per the spec.
    pub fn allow_at(&mut self, n: f64, now: Instant) -> bool {
        self.refill(now);
        if n == 0.0 {
            return true;
        }
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    pub fn allow(&mut self, n: f64) -> bool {
        self.allow_at(n, Instant::now())
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn zero_token_requests_always_allowed() {
        let mut bucket = TokenBucket::new(1.0, 1.0);
        let now = Instant::now();
        assert!(bucket.allow_at(0.0, now));
        // Drain it, then confirm zero-cost requests still pass.
        assert!(bucket.allow_at(1.0, now));
        assert!(!bucket.allow_at(1.0, now));
        assert!(bucket.allow_at(0.0, now));
    }

    #[test]
    fn tokens_never_exceed_capacity() {
        let mut bucket = TokenBucket::new(5.0, 100.0);
        let now = Instant::now();
        bucket.refill(now + Duration::from_secs(10));
        assert!(bucket.tokens() <= bucket.capacity());
    }

    #[test]
    fn tokens_never_go_negative() {
        let mut bucket = TokenBucket::new(3.0, 1.0);
        let now = Instant::now();
        for _ in 0..10 {
            bucket.allow_at(1.0, now);
        }
        assert!(bucket.tokens() >= 0.0);
    }

    #[test]
    fn grants_over_a_window_are_bounded_by_capacity_plus_refill() {
        let capacity = 10.0;
        let refill_rate = 2.0; // tokens/sec
        let mut bucket = TokenBucket::new(capacity, refill_rate);
        let start = Instant::now();
        let window = Duration::from_secs(5);

        let mut granted = 0.0;
        let mut t = start;
        while t <= start + window {
            if bucket.allow_at(1.0, t) {
                granted += 1.0;
            }
            t += Duration::from_millis(50);
        }

        let bound = capacity + window.as_secs_f64() * refill_rate;
        assert!(granted <= bound);
    }
}

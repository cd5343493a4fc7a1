//! Retry strategy: which errors get retried, how many times, and how the
//! delay between attempts grows.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use gw_error::{ClassifiedError, ErrorCategory};

/// A predicate that decides, for categories in the retryable set, whether
/// this particular error/attempt combination should actually retry.
pub type RetryPredicate = Arc<dyn Fn(&ClassifiedError, u32) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct Strategy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    pub retryable: HashSet<ErrorCategory>,
    pub non_retryable: HashSet<ErrorCategory>,
    pub predicate: Option<RetryPredicate>,
}

/// The default retryable set (§4.5): categories that represent transient
/// infrastructure trouble rather than a caller mistake.
pub fn default_retryable() -> HashSet<ErrorCategory> {
    [
        ErrorCategory::ConnectionError,
        ErrorCategory::TimeoutError,
        ErrorCategory::NetworkError,
        ErrorCategory::Deadlock,
        ErrorCategory::LockWaitTimeout,
        ErrorCategory::ResourceExhausted,
        ErrorCategory::RateLimit,
        ErrorCategory::ServerGone,
        ErrorCategory::SslError,
    ]
    .into_iter()
    .collect()
}

/// The default non-retryable set: caller errors and security decisions
/// that retrying can never fix.
pub fn default_non_retryable() -> HashSet<ErrorCategory> {
    [
        ErrorCategory::AccessDenied,
        ErrorCategory::SecurityViolation,
        ErrorCategory::SyntaxError,
        ErrorCategory::ObjectNotFound,
        ErrorCategory::ConstraintViolation,
        ErrorCategory::QueryInterrupted,
        ErrorCategory::ValidationError,
    ]
    .into_iter()
    .collect()
}

impl Default for Strategy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
            retryable: default_retryable(),
            non_retryable: default_non_retryable(),
            predicate: None,
        }
    }
}

impl Strategy {
    /// DDL statements: few attempts, since a failed schema change is
    /// rarely worth blindly repeating.
    #[must_use]
    pub fn ddl() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// Plain reads: the library default.
    #[must_use]
    pub fn read() -> Self {
        Self::default()
    }

    /// Transactional writes: only retry on the two categories that are
    /// safe to blindly re-issue (deadlock victim, lock-wait timeout).
    #[must_use]
    pub fn transactional_write() -> Self {
        let retryable: HashSet<ErrorCategory> =
            [ErrorCategory::Deadlock, ErrorCategory::LockWaitTimeout].into_iter().collect();
        Self { max_attempts: 4, retryable, ..Self::default() }
    }

    /// Decision for attempt `k` with error `e` (§4.5 steps 1-5). `k` is
    /// the attempt that just failed (1-indexed).
    pub fn should_retry(&self, error: &ClassifiedError, k: u32) -> bool {
        if k >= self.max_attempts {
            return false;
        }
        if error.is_fatal() {
            return false;
        }
        if self.non_retryable.contains(&error.category) {
            return false;
        }
        if self.retryable.contains(&error.category) {
            return match &self.predicate {
                Some(p) => p(error, k),
                None => true,
            };
        }
        false
    }

    /// Delay before attempt `k+1`, given that attempt `k` just failed.
    pub fn delay_for(&self, k: u32) -> Duration {
        let exponent = (k.saturating_sub(1)) as i32;
        let raw = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let bounded = raw.min(self.max_delay.as_secs_f64());
        let jittered = if self.jitter {
            let spread = rand::random::<f64>() * 0.2 - 0.1; // U(-0.1, +0.1)
            (bounded * (1.0 + spread)).max(0.0)
        } else {
            bounded
        };
        Duration::from_secs_f64(jittered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_error::Severity;

    fn err(category: ErrorCategory, severity: Severity) -> ClassifiedError {
        ClassifiedError::new(category, severity, "boom")
    }

    #[test]
    fn stops_at_max_attempts() {
        let s = Strategy::default();
        let e = err(ErrorCategory::ConnectionError, Severity::Medium);
        assert!(!s.should_retry(&e, s.max_attempts));
    }

    #[test]
    fn fatal_severity_stops_regardless_of_category() {
        let s = Strategy::default();
        let e = err(ErrorCategory::ConnectionError, Severity::Fatal);
        assert!(!s.should_retry(&e, 1));
    }

    #[test]
    fn non_retryable_category_stops() {
        let s = Strategy::default();
        let e = err(ErrorCategory::ValidationError, Severity::Low);
        assert!(!s.should_retry(&e, 1));
    }

    #[test]
    fn retryable_category_retries_by_default() {
        let s = Strategy::default();
        let e = err(ErrorCategory::Deadlock, Severity::Medium);
        assert!(s.should_retry(&e, 1));
    }

    #[test]
    fn unlisted_category_denies_by_default() {
        let s = Strategy::default();
        let e = err(ErrorCategory::Unknown, Severity::Medium);
        assert!(!s.should_retry(&e, 1));
    }

    #[test]
    fn predicate_overrides_verdict_for_retryable_categories() {
        let mut s = Strategy::default();
        s.predicate = Some(Arc::new(|_e, _k| false));
        let e = err(ErrorCategory::Deadlock, Severity::Medium);
        assert!(!s.should_retry(&e, 1));
    }

    #[test]
    fn delay_grows_exponentially_and_is_capped() {
        let s = Strategy {
            jitter: false,
            base_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(1),
            ..Strategy::default()
        };
        assert_eq!(s.delay_for(1), Duration::from_millis(100));
        assert_eq!(s.delay_for(2), Duration::from_millis(200));
        assert_eq!(s.delay_for(3), Duration::from_millis(400));
        // 100ms * 2^9 = 51200ms, capped to 1s.
        assert_eq!(s.delay_for(10), Duration::from_secs(1));
    }

    #[test]
    fn transactional_write_only_retries_deadlock_and_lock_wait() {
        let s = Strategy::transactional_write();
        assert!(s.should_retry(&err(ErrorCategory::Deadlock, Severity::Medium), 1));
        assert!(s.should_retry(&err(ErrorCategory::LockWaitTimeout, Severity::Medium), 1));
        assert!(!s.should_retry(&err(ErrorCategory::ConnectionError, Severity::Medium), 1));
    }

    #[test]
    fn ddl_strategy_allows_exactly_one_attempt() {
        let s = Strategy::ddl();
        assert_eq!(s.max_attempts, 1);
    }
}

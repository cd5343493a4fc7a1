//! Circuit breaker guarding the pool's acquire/health-check path.
//!
//! Three states: `Closed` (normal operation), `Open` (fail fast),
//! `HalfOpen` (a single recovery probe in flight). The circuit opens after
//! `failure_threshold` *consecutive* failures (not a failure rate over a
//! sample window); once open, a single probe is let through after
//! `open_timeout` elapses, and a failed probe re-opens the circuit with the
//! timeout doubled, up to `max_open_timeout`.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gw_error::{ClassifiedError, ErrorCategory, Result, Severity};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive acquire failures that trips the breaker.
    pub failure_threshold: u32,
    /// Initial wait before a half-open probe is allowed.
    pub open_timeout: Duration,
    /// Ceiling the backoff doubles up to on repeated re-opens.
    pub max_open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(5),
            max_open_timeout: Duration::from_secs(120),
        }
    }
}

struct OpenState {
    opened_at: Instant,
    timeout: Duration,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Arc<Mutex<CircuitState>>,
    consecutive_failures: Arc<AtomicU64>,
    open: Arc<Mutex<Option<OpenState>>>,
    /// Set while the single half-open probe is in flight, so concurrent
    /// callers don't all slip through as probes at once.
    probe_in_flight: Arc<AtomicU32>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(CircuitState::Closed)),
            consecutive_failures: Arc::new(AtomicU64::new(0)),
            open: Arc::new(Mutex::new(None)),
            probe_in_flight: Arc::new(AtomicU32::new(0)),
        }
    }

    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        match self.get_state().await {
            CircuitState::Closed => self.attempt(f, false).await,
            CircuitState::Open => Err(ClassifiedError::new(
                ErrorCategory::ConnectionError,
                Severity::High,
                "circuit breaker is open",
            )),
            CircuitState::HalfOpen => {
                if self.probe_in_flight.compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst).is_err() {
                    return Err(ClassifiedError::new(
                        ErrorCategory::ConnectionError,
                        Severity::High,
                        "half-open circuit already has a probe in flight",
                    ));
                }
                let result = self.attempt(f, true).await;
                self.probe_in_flight.store(0, Ordering::SeqCst);
                result
            }
        }
    }

    async fn attempt<F, Fut, T>(&self, f: F, is_probe: bool) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        match f().await {
            Ok(v) => {
                self.record_success(is_probe).await;
                Ok(v)
            }
            Err(e) => {
                self.record_failure(is_probe).await;
                Err(e)
            }
        }
    }

    pub async fn get_state(&self) -> CircuitState {
        let mut state = self.state.lock().await;
        if *state == CircuitState::Open {
            let ready = self.open.lock().await.as_ref().is_some_and(|o| o.opened_at.elapsed() >= o.timeout);
            if ready {
                *state = CircuitState::HalfOpen;
            }
        }
        *state
    }

    async fn record_success(&self, is_probe: bool) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        if is_probe {
            *self.state.lock().await = CircuitState::Closed;
            *self.open.lock().await = None;
        }
    }

    async fn record_failure(&self, is_probe: bool) {
        if is_probe {
            self.reopen_with_backoff().await;
            return;
        }
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= u64::from(self.config.failure_threshold) {
            let mut state = self.state.lock().await;
            if *state == CircuitState::Closed {
                *state = CircuitState::Open;
                *self.open.lock().await = Some(OpenState { opened_at: Instant::now(), timeout: self.config.open_timeout });
            }
        }
    }

    /// A failed half-open probe re-opens the circuit with the wait doubled,
    /// capped at `max_open_timeout`.
    async fn reopen_with_backoff(&self) {
        let mut open = self.open.lock().await;
        let next_timeout = open
            .as_ref()
            .map_or(self.config.open_timeout, |o| (o.timeout * 2).min(self.config.max_open_timeout));
        *open = Some(OpenState { opened_at: Instant::now(), timeout: next_timeout });
        drop(open);
        *self.state.lock().await = CircuitState::Open;
    }

    /// Clear all counters and force the circuit closed. Called by the
    /// pool's primary recovery step.
    pub async fn reset(&self) {
        *self.state.lock().await = CircuitState::Closed;
        *self.open.lock().await = None;
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.probe_in_flight.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing() -> impl std::future::Future<Output = Result<()>> {
        async { Err(ClassifiedError::new(ErrorCategory::Unknown, Severity::Medium, "boom")) }
    }

    #[tokio::test]
    async fn starts_closed() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        assert_eq!(cb.get_state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_consecutive_failure_threshold() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig { failure_threshold: 3, ..CircuitBreakerConfig::default() });
        for _ in 0..2 {
            let _ = cb.call(failing).await;
            assert_eq!(cb.get_state().await, CircuitState::Closed);
        }
        let _ = cb.call(failing).await;
        assert_eq!(cb.get_state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn a_success_resets_the_consecutive_failure_count() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig { failure_threshold: 2, ..CircuitBreakerConfig::default() });
        let _ = cb.call(failing).await;
        let _ = cb.call(|| async { Ok::<_, ClassifiedError>(1) }).await;
        let _ = cb.call(failing).await;
        assert_eq!(cb.get_state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn open_circuit_fails_fast() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            open_timeout: Duration::from_secs(30),
            ..CircuitBreakerConfig::default()
        });
        let _ = cb.call(failing).await;
        let result = cb.call(|| async { Ok::<_, ClassifiedError>(1) }).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn half_open_allows_a_single_probe_after_timeout() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            open_timeout: Duration::from_millis(20),
            ..CircuitBreakerConfig::default()
        });
        let _ = cb.call(failing).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        let result = cb.call(|| async { Ok::<_, ClassifiedError>(1) }).await;
        assert!(result.is_ok());
        assert_eq!(cb.get_state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn failed_probe_reopens_with_doubled_backoff() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            open_timeout: Duration::from_millis(20),
            max_open_timeout: Duration::from_secs(10),
        });
        let _ = cb.call(failing).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cb.get_state().await, CircuitState::HalfOpen);
        let _ = cb.call(failing).await;
        assert_eq!(cb.get_state().await, CircuitState::Open);

        // Original 20ms timeout has elapsed again, but backoff doubled it to
        // ~40ms so the circuit must still be open.
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(cb.get_state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(cb.get_state().await, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn reset_forces_closed_state() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig { failure_threshold: 1, ..CircuitBreakerConfig::default() });
        let _ = cb.call(failing).await;
        assert_eq!(cb.get_state().await, CircuitState::Open);
        cb.reset().await;
        assert_eq!(cb.get_state().await, CircuitState::Closed);
    }
}

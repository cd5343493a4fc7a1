//! C9 — retry engine: wraps a fallible async operation in a retry loop
//! governed by a [`Strategy`], with cancellable jittered backoff sleeps.

pub mod stats;
pub mod strategy;

pub use stats::{OperationStats, StatsRegistry};
pub use strategy::Strategy;

use std::time::{Duration, Instant};

use gw_error::ClassifiedError;
use tokio_util::sync::CancellationToken;

/// One entry in a [`RetryResult`]'s history, including the terminal
/// attempt (whose `error` is `None` on eventual success).
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub error: Option<ClassifiedError>,
    pub delay: Duration,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct RetryResult<T> {
    pub success: bool,
    pub attempts: u32,
    pub total_delay: Duration,
    pub final_result: Option<T>,
    pub last_error: Option<ClassifiedError>,
    pub history: Vec<AttemptRecord>,
}

/// Run `thunk` under `strategy`, retrying per the decision table in
/// §4.5. `thunk` is invoked with the 1-indexed attempt number. Sleeps
/// between attempts observe `cancel` and return early (as a failed
/// attempt, not a panic) if it fires mid-sleep.
pub async fn execute_with_retry<F, Fut, T>(
    mut thunk: F,
    strategy: &Strategy,
    cancel: &CancellationToken,
) -> RetryResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = gw_error::Result<T>>,
{
    let mut history = Vec::new();
    let mut total_delay = Duration::ZERO;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let outcome = thunk(attempt).await;

        match outcome {
            Ok(value) => {
                history.push(AttemptRecord {
                    attempt,
                    error: None,
                    delay: Duration::ZERO,
                    timestamp: chrono::Utc::now(),
                });
                return RetryResult {
                    success: true,
                    attempts: attempt,
                    total_delay,
                    final_result: Some(value),
                    last_error: None,
                    history,
                };
            }
            Err(error) => {
                let retry = strategy.should_retry(&error, attempt);
                if !retry {
                    history.push(AttemptRecord {
                        attempt,
                        error: Some(error.clone()),
                        delay: Duration::ZERO,
                        timestamp: chrono::Utc::now(),
                    });
                    return RetryResult {
                        success: false,
                        attempts: attempt,
                        total_delay,
                        final_result: None,
                        last_error: Some(error),
                        history,
                    };
                }

                let delay = strategy.delay_for(attempt);
                history.push(AttemptRecord {
                    attempt,
                    error: Some(error.clone()),
                    delay,
                    timestamp: chrono::Utc::now(),
                });
                total_delay += delay;

                let cancelled = sleep_cancellable(delay, cancel).await;
                if cancelled {
                    return RetryResult {
                        success: false,
                        attempts: attempt,
                        total_delay,
                        final_result: None,
                        last_error: Some(error),
                        history,
                    };
                }
            }
        }
    }
}

async fn sleep_cancellable(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => false,
        () = cancel.cancelled() => true,
    }
}

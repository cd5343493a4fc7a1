//! Per-operation retry statistics.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct OperationStats {
    pub total_attempts: u64,
    pub successful_retries: u64,
    pub failed_retries: u64,
    pub moving_average_retry_duration: Duration,
    pub last_retry_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl OperationStats {
    fn record(&mut self, attempts: u32, succeeded: bool, duration: Duration) {
        self.total_attempts += u64::from(attempts);
        if attempts > 1 {
            if succeeded {
                self.successful_retries += 1;
            } else {
                self.failed_retries += 1;
            }
            let prior = self.moving_average_retry_duration.as_secs_f64();
            let n = (self.successful_retries + self.failed_retries).max(1) as f64;
            let updated = prior + (duration.as_secs_f64() - prior) / n;
            self.moving_average_retry_duration = Duration::from_secs_f64(updated.max(0.0));
            self.last_retry_at = Some(chrono::Utc::now());
        }
    }
}

/// Accumulates [`OperationStats`] keyed by an operation name
/// (`"query"`, `"backup"`, a tool name — caller's choice).
#[derive(Default)]
pub struct StatsRegistry {
    by_operation: DashMap<String, Mutex<OperationStats>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, operation: &str, attempts: u32, succeeded: bool, duration: Duration) {
        let entry = self.by_operation.entry(operation.to_string()).or_default();
        entry.lock().record(attempts, succeeded, duration);
    }

    pub fn get(&self, operation: &str) -> Option<OperationStats> {
        self.by_operation.get(operation).map(|e| *e.lock())
    }

    pub fn reset(&self, operation: Option<&str>) {
        match operation {
            Some(op) => {
                self.by_operation.remove(op);
            }
            None => self.by_operation.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_attempt_success_does_not_count_as_a_retry() {
        let reg = StatsRegistry::new();
        reg.record("query", 1, true, Duration::from_millis(5));
        let stats = reg.get("query").unwrap();
        assert_eq!(stats.total_attempts, 1);
        assert_eq!(stats.successful_retries, 0);
    }

    #[test]
    fn multi_attempt_success_counts_as_successful_retry() {
        let reg = StatsRegistry::new();
        reg.record("query", 3, true, Duration::from_millis(50));
        let stats = reg.get("query").unwrap();
        assert_eq!(stats.total_attempts, 3);
        assert_eq!(stats.successful_retries, 1);
        assert!(stats.last_retry_at.is_some());
    }

    #[test]
    fn reset_one_operation_leaves_others_intact() {
        let reg = StatsRegistry::new();
        reg.record("query", 2, true, Duration::from_millis(10));
        reg.record("backup", 2, true, Duration::from_millis(10));
        reg.reset(Some("query"));
        assert!(reg.get("query").is_none());
        assert!(reg.get("backup").is_some());
    }

    #[test]
    fn reset_all_clears_everything() {
        let reg = StatsRegistry::new();
        reg.record("query", 2, true, Duration::from_millis(10));
        reg.reset(None);
        assert!(reg.get("query").is_none());
    }
}

//! C3 — metrics store.
//!
//! One bounded time series per metric name, each behind its own `RwLock` so
//! that writing `query_time` never contends with a reader snapshotting
//! `cache_hit_rate` (per the spec's "series-level locks only" rule).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use gw_error::Severity;
use tracing::error;

/// One recorded observation.
#[derive(Debug, Clone)]
pub struct Point {
    pub timestamp_ms: u64,
    pub value: f64,
    pub tags: HashMap<String, String>,
}

/// Aggregated statistics over a window of points.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct Stats {
    pub count: usize,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p95: f64,
    pub p99: f64,
}

struct Series {
    points: Vec<Point>,
    max_points: usize,
    retention: Duration,
}

impl Series {
    fn new(max_points: usize, retention: Duration) -> Self {
        Self {
            points: Vec::new(),
            max_points,
            retention,
        }
    }

    fn push(&mut self, mut point: Point) {
        // Timestamps must be strictly non-decreasing; ties resolved by
        // insertion order, so a point that arrives with an equal-or-earlier
        // timestamp than the last one is bumped forward by one millisecond.
        if let Some(last) = self.points.last() {
            if point.timestamp_ms <= last.timestamp_ms {
                point.timestamp_ms = last.timestamp_ms + 1;
            }
        }
        self.points.push(point);
        self.evict(point_now_ms());
    }

    fn evict(&mut self, now_ms: u64) {
        let retention_ms = self.retention.as_millis() as u64;
        self.points
            .retain(|p| now_ms.saturating_sub(p.timestamp_ms) <= retention_ms);
        if self.points.len() > self.max_points {
            let overflow = self.points.len() - self.max_points;
            self.points.drain(0..overflow);
        }
    }

    fn snapshot(&self, window: Duration) -> Stats {
        let now_ms = point_now_ms();
        let window_ms = window.as_millis() as u64;
        let mut values: Vec<f64> = self
            .points
            .iter()
            .filter(|p| now_ms.saturating_sub(p.timestamp_ms) <= window_ms)
            .map(|p| p.value)
            .collect();

        if values.is_empty() {
            return Stats::default();
        }
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let count = values.len();
        let sum: f64 = values.iter().sum();
        let min = values[0];
        let max = values[count - 1];
        let avg = sum / count as f64;
        let p95 = percentile(&values, 0.95);
        let p99 = percentile(&values, 0.99);

        Stats {
            count,
            sum,
            min,
            max,
            avg,
            p95,
            p99,
        }
    }
}

/// Linear-interpolation percentile, matching the formula in the spec:
/// `idx = p*(n-1)`, `value = sorted[floor(idx)]*(1-frac) + sorted[ceil(idx)]*frac`.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let idx = p * (sorted.len() - 1) as f64;
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    let frac = idx - lo as f64;
    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}

fn point_now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// A triggered alert, handed to every subscriber.
#[derive(Debug, Clone)]
pub struct Alert {
    pub rule: &'static str,
    pub metric: String,
    pub message: String,
    pub severity: Severity,
}

type AlertCallback = Box<dyn Fn(&Alert) + Send + Sync>;

/// Bounded multi-series metrics store with table-driven alerting.
pub struct MetricsStore {
    series: RwLock<HashMap<String, RwLock<Series>>>,
    max_points: usize,
    retention: Duration,
    cpu_count: usize,
    subscribers: Mutex<Vec<AlertCallback>>,
}

impl MetricsStore {
    pub fn new(max_points: usize, retention: Duration, cpu_count: usize) -> Arc<Self> {
        Arc::new(Self {
            series: RwLock::new(HashMap::new()),
            max_points,
            retention,
            cpu_count: cpu_count.max(1),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Record a value, evaluate alert rules against it, and fan out any
    /// that fire.
    pub fn record(&self, name: &str, value: f64, tags: HashMap<String, String>) {
        self.record_at(name, value, tags, point_now_ms());
    }

    fn record_at(&self, name: &str, value: f64, tags: HashMap<String, String>, timestamp_ms: u64) {
        {
            let needs_insert = !self.series.read().unwrap().contains_key(name);
            if needs_insert {
                self.series
                    .write()
                    .unwrap()
                    .entry(name.to_string())
                    .or_insert_with(|| RwLock::new(Series::new(self.max_points, self.retention)));
            }
            let series_guard = self.series.read().unwrap();
            let series = series_guard.get(name).expect("just inserted");
            series.write().unwrap().push(Point {
                timestamp_ms,
                value,
                tags,
            });
        }
        self.evaluate_alerts(name, value);
    }

    pub fn snapshot(&self, name: &str, window: Duration) -> Stats {
        let series_guard = self.series.read().unwrap();
        match series_guard.get(name) {
            Some(series) => series.read().unwrap().snapshot(window),
            None => Stats::default(),
        }
    }

    pub fn subscribe_alert<F>(&self, callback: F)
    where
        F: Fn(&Alert) + Send + Sync + 'static,
    {
        self.subscribers.lock().unwrap().push(Box::new(callback));
    }

    /// Record a HIGH or CRITICAL severity error — feeds the
    /// `error_occurred` alert rule directly, bypassing the time-series path
    /// since a single occurrence is the trigger, not a windowed average.
    pub fn record_error(&self, category: &str, severity: Severity) {
        self.record(
            "error_statistics.count",
            1.0,
            HashMap::from([("category".to_string(), category.to_string())]),
        );
        if severity >= Severity::High {
            self.fire(Alert {
                rule: "error_occurred",
                metric: "error_statistics.count".to_string(),
                message: format!("{severity:?} severity error recorded: {category}"),
                severity,
            });
        }
    }

    fn evaluate_alerts(&self, name: &str, value: f64) {
        match name {
            "query_time" if value > 2.0 => self.fire(Alert {
                rule: "slow_query",
                metric: name.to_string(),
                message: format!("query took {value:.3}s"),
                severity: Severity::Medium,
            }),
            "cache_hit_rate" if value < 0.60 => self.fire(Alert {
                rule: "low_cache_hit_rate",
                metric: name.to_string(),
                message: format!("cache hit rate dropped to {value:.2}"),
                severity: Severity::Medium,
            }),
            "error_rate" => {
                let stats = self.snapshot(name, Duration::from_secs(300));
                if stats.avg > 0.05 {
                    self.fire(Alert {
                        rule: "high_error_rate",
                        metric: name.to_string(),
                        message: format!("5m avg error rate {:.3}", stats.avg),
                        severity: Severity::High,
                    });
                }
            }
            "cpu_loadavg_5m" => {
                let stats = self.snapshot(name, Duration::from_secs(300));
                let cores = self.cpu_count as f64;
                if stats.avg > 10.0 * cores {
                    self.fire(Alert {
                        rule: "critical_cpu_load",
                        metric: name.to_string(),
                        message: format!("5m loadavg {:.2} > 10x{}", stats.avg, self.cpu_count),
                        severity: Severity::Critical,
                    });
                } else if stats.avg > 5.0 * cores {
                    self.fire(Alert {
                        rule: "high_cpu_load",
                        metric: name.to_string(),
                        message: format!("5m loadavg {:.2} > 5x{}", stats.avg, self.cpu_count),
                        severity: Severity::High,
                    });
                }
            }
            _ => {}
        }
    }

    fn fire(&self, alert: Alert) {
        let subscribers = self.subscribers.lock().unwrap();
        for cb in subscribers.iter() {
            // A panicking or erroring callback is logged and skipped —
            // alert delivery is best-effort and must never block the rest.
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(&alert)));
            if result.is_err() {
                error!(rule = alert.rule, "alert callback panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<MetricsStore> {
        MetricsStore::new(1000, Duration::from_secs(3600), 4)
    }

    #[test]
    fn percentile_boundaries_match_min_max() {
        let sorted = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&sorted, 0.0), 1.0);
        assert_eq!(percentile(&sorted, 1.0), 5.0);
    }

    #[test]
    fn percentile_ordering_holds() {
        let sorted: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let p0 = percentile(&sorted, 0.0);
        let p50 = percentile(&sorted, 0.5);
        let p95 = percentile(&sorted, 0.95);
        let p99 = percentile(&sorted, 0.99);
        let p100 = percentile(&sorted, 1.0);
        assert!(p0 <= p50 && p50 <= p95 && p95 <= p99 && p99 <= p100);
    }

    #[test]
    fn snapshot_reflects_recorded_points() {
        let store = store();
        for v in [1.0, 2.0, 3.0] {
            store.record("latency", v, HashMap::new());
        }
        let stats = store.snapshot("latency", Duration::from_secs(60));
        assert_eq!(stats.count, 3);
        assert!((stats.avg - 2.0).abs() < 1e-9);
    }

    #[test]
    fn missing_series_snapshots_to_default() {
        let store = store();
        let stats = store.snapshot("nonexistent", Duration::from_secs(60));
        assert_eq!(stats.count, 0);
    }

    #[test]
    fn points_beyond_max_points_are_evicted() {
        let store = MetricsStore::new(5, Duration::from_secs(3600), 4);
        for i in 0..20 {
            store.record("series", i as f64, HashMap::new());
        }
        let stats = store.snapshot("series", Duration::from_secs(3600));
        assert_eq!(stats.count, 5);
        assert_eq!(stats.max, 19.0);
    }

    #[test]
    fn slow_query_alert_fires_above_threshold() {
        let store = store();
        let fired = Arc::new(Mutex::new(false));
        let fired_clone = Arc::clone(&fired);
        store.subscribe_alert(move |alert| {
            if alert.rule == "slow_query" {
                *fired_clone.lock().unwrap() = true;
            }
        });
        store.record("query_time", 2.5, HashMap::new());
        assert!(*fired.lock().unwrap());
    }

    #[test]
    fn alert_callback_panic_does_not_block_others() {
        let store = store();
        let second_fired = Arc::new(Mutex::new(false));
        let second_clone = Arc::clone(&second_fired);
        store.subscribe_alert(|_| panic!("boom"));
        store.subscribe_alert(move |_| {
            *second_clone.lock().unwrap() = true;
        });
        store.record("query_time", 3.0, HashMap::new());
        assert!(*second_fired.lock().unwrap());
    }
}

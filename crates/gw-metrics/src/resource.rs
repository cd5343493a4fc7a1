//! C1 — clock/resource probe.
//!
//! A thin wrapper over the monotonic clock plus best-effort process resource
//! sampling (RSS, load average). Every other component that needs "now"
//! for backoff, TTL, or health-check timing goes through here rather than
//! calling `Instant::now()` directly, so the whole pipeline shares one
//! notion of monotonic time.

use std::time::Instant;

/// A single resource sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceSample {
    /// Resident set size, in bytes. Zero when unavailable on this platform.
    pub rss_bytes: u64,
    /// 1-minute load average. Zero when unavailable.
    pub loadavg_1m: f64,
    /// 5-minute load average. Zero when unavailable.
    pub loadavg_5m: f64,
    /// Number of logical CPUs, used by the high/critical CPU-load alert rules.
    pub cpu_count: usize,
}

/// Monotonic clock + resource sampler.
#[derive(Debug, Clone)]
pub struct ResourceProbe {
    started_at: Instant,
}

impl Default for ResourceProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }

    /// Monotonic "now", independent of wall-clock adjustments — used by the
    /// token bucket and cache TTL so that a wall-clock jump never grants a
    /// burst or extends a TTL.
    pub fn now(&self) -> Instant {
        Instant::now()
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Best-effort process resource sample. On platforms without `/proc`
    /// this returns zeroed fields rather than erroring — resource pressure
    /// is advisory input to C2, never a correctness dependency.
    pub fn sample(&self) -> ResourceSample {
        let cpu_count = std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(1);

        #[cfg(target_os = "linux")]
        {
            let rss_bytes = read_rss_bytes().unwrap_or(0);
            let (loadavg_1m, loadavg_5m) = read_loadavg().unwrap_or((0.0, 0.0));
            return ResourceSample {
                rss_bytes,
                loadavg_1m,
                loadavg_5m,
                cpu_count,
            };
        }

        #[cfg(not(target_os = "linux"))]
        {
            ResourceSample {
                rss_bytes: 0,
                loadavg_1m: 0.0,
                loadavg_5m: 0.0,
                cpu_count,
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn read_rss_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(target_os = "linux")]
fn read_loadavg() -> Option<(f64, f64)> {
    let raw = std::fs::read_to_string("/proc/loadavg").ok()?;
    let mut parts = raw.split_whitespace();
    let one: f64 = parts.next()?.parse().ok()?;
    let five: f64 = parts.next()?.parse().ok()?;
    Some((one, five))
}

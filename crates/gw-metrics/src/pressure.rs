//! C2 — memory-pressure bus.
//!
//! A single publisher samples [`ResourceProbe`] on an interval, computes a
//! pressure scalar in `[0, 1]`, and fans it out via a `tokio::sync::watch`
//! channel. `watch` gives us exactly the semantics the spec asks for:
//! subscribers only ever see the latest value, and a subscriber that misses
//! a tick simply catches up on the next one — no queue, no blocking the
//! publisher on a slow observer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::resource::ResourceProbe;

/// Handle to the running pressure bus. Dropping all clones of the sender
/// half (owned internally) stops the background task; callers just hold
/// the [`PressureBus`] for as long as they want sampling to continue.
pub struct PressureBus {
    rx: watch::Receiver<f64>,
    _task: Arc<JoinHandle<()>>,
}

impl PressureBus {
    /// Spawn the sampler on the current Tokio runtime.
    pub fn spawn(probe: ResourceProbe, sample_interval: Duration) -> Self {
        let (tx, rx) = watch::channel(0.0_f64);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(sample_interval);
            loop {
                interval.tick().await;
                let sample = probe.sample();
                let pressure = pressure_from_sample(&sample);
                // A closed channel means every receiver (and this handle)
                // was dropped; stop sampling rather than spin forever.
                if tx.send(pressure).is_err() {
                    break;
                }
            }
        });

        Self {
            rx,
            _task: Arc::new(task),
        }
    }

    /// Current pressure scalar, in `[0, 1]`.
    pub fn current(&self) -> f64 {
        *self.rx.borrow()
    }

    /// Subscribe to future updates. Subscribers never block the publisher;
    /// a subscriber that doesn't poll for a while just observes a gap and
    /// picks up the latest value on its next read.
    pub fn subscribe(&self) -> watch::Receiver<f64> {
        self.rx.clone()
    }
}

/// Pure function mapping a resource sample to a pressure scalar.
///
/// RSS relative to an assumed working-set ceiling and load average relative
/// to CPU count are blended; this is advisory input for the rate limiter's
/// load factor and the cache's TTL adjustment, not a hard resource limit.
fn pressure_from_sample(sample: &crate::resource::ResourceSample) -> f64 {
    const ASSUMED_CEILING_BYTES: f64 = 2.0 * 1024.0 * 1024.0 * 1024.0; // 2 GiB
    let rss_pressure = (sample.rss_bytes as f64 / ASSUMED_CEILING_BYTES).min(1.0);

    let cpu_count = sample.cpu_count.max(1) as f64;
    let load_pressure = (sample.loadavg_1m / cpu_count).min(1.0);

    rss_pressure.max(load_pressure).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceSample;

    #[test]
    fn pressure_is_clamped_to_unit_interval() {
        let sample = ResourceSample {
            rss_bytes: u64::MAX,
            loadavg_1m: 1000.0,
            loadavg_5m: 1000.0,
            cpu_count: 1,
        };
        let p = pressure_from_sample(&sample);
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn idle_sample_yields_near_zero_pressure() {
        let sample = ResourceSample {
            rss_bytes: 0,
            loadavg_1m: 0.0,
            loadavg_5m: 0.0,
            cpu_count: 8,
        };
        assert_eq!(pressure_from_sample(&sample), 0.0);
    }

    #[tokio::test]
    async fn subscribers_observe_published_updates() {
        let probe = ResourceProbe::new();
        let bus = PressureBus::spawn(probe, Duration::from_millis(10));
        let mut rx = bus.subscribe();
        rx.changed().await.unwrap();
        let value = *rx.borrow();
        assert!((0.0..=1.0).contains(&value));
    }
}

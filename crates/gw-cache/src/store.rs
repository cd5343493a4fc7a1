//! Tiered result cache: a fast count-bounded tier and a slower
//! byte-bounded tier, with promotion on access. Locking is per-shard so
//! `get` never blocks on an unrelated `put`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;

const SHARD_COUNT: usize = 16;
const MIN_TTL_SECS: u64 = 60;

/// Tuning knobs for a [`CacheStore`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in the fast tier, per shard.
    pub fast_tier_entries_per_shard: usize,
    /// Maximum total bytes held in the slow tier, per shard.
    pub slow_tier_bytes_per_shard: usize,
    /// Baseline TTL before pressure adjustment.
    pub base_ttl: Duration,
    /// Payloads larger than this are never cached.
    pub max_payload_bytes: usize,
    /// Whether the slow tier is used at all; when `false` the store
    /// behaves as a single fast tier with no promotion/demotion.
    pub tiered: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fast_tier_entries_per_shard: 256,
            slow_tier_bytes_per_shard: 16 * 1024 * 1024,
            base_ttl: Duration::from_secs(300),
            max_payload_bytes: 8 * 1024 * 1024,
            tiered: true,
        }
    }
}

#[derive(Clone)]
struct Entry {
    payload: Value,
    byte_size: usize,
    tables: Vec<String>,
    cached_at: Instant,
    ttl: Duration,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.cached_at) > self.ttl
    }
}

struct Shard {
    fast: LruCache<String, Entry>,
    slow: Vec<(String, Entry)>,
    slow_bytes: usize,
}

impl Shard {
    fn new(fast_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(fast_capacity.max(1)).unwrap();
        Self { fast: LruCache::new(capacity), slow: Vec::new(), slow_bytes: 0 }
    }
}

/// Cache-wide counters, read without locking any shard.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub rejections: AtomicU64,
}

impl CacheMetrics {
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub rejections: u64,
}

/// The result cache itself (C7).
pub struct CacheStore {
    shards: Vec<Mutex<Shard>>,
    config: CacheConfig,
    metrics: CacheMetrics,
}

impl CacheStore {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(Shard::new(config.fast_tier_entries_per_shard)))
            .collect();
        Self { shards, config, metrics: CacheMetrics::default() }
    }

    fn shard_for(&self, fingerprint: &str) -> &Mutex<Shard> {
        let mut hasher = DefaultHasher::new();
        fingerprint.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Effective TTL under the given pressure scalar (§4.3): baseTTL
    /// scaled down, never below 60s and never above baseTTL.
    fn effective_ttl(&self, pressure: f64) -> Duration {
        let pressure = pressure.clamp(0.0, 1.0);
        let scaled = self.config.base_ttl.as_secs_f64() * (1.0 - pressure * 0.5);
        let bounded = scaled.max(MIN_TTL_SECS as f64).min(self.config.base_ttl.as_secs_f64());
        Duration::from_secs_f64(bounded)
    }

    /// Look up a fingerprint. On a slow-tier hit, promotes the entry into
    /// the fast tier (tiered mode only).
    pub fn get(&self, fingerprint: &str) -> Option<Value> {
        let mut shard = self.shard_for(fingerprint).lock();
        let now = Instant::now();

        if let Some(entry) = shard.fast.get(fingerprint) {
            if entry.is_expired(now) {
                shard.fast.pop(fingerprint);
            } else {
                let payload = entry.payload.clone();
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                return Some(payload);
            }
        }

        if self.config.tiered {
            if let Some(pos) = shard.slow.iter().position(|(k, _)| k == fingerprint) {
                let (key, entry) = shard.slow.remove(pos);
                shard.slow_bytes = shard.slow_bytes.saturating_sub(entry.byte_size);
                if entry.is_expired(now) {
                    self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                let payload = entry.payload.clone();
                promote(&mut shard, key, entry);
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                return Some(payload);
            }
        }

        self.metrics.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert a payload. Refuses (without error) anything larger than
    /// `max_payload_bytes` — the caller still gets the value, it is just
    /// not cached.
    pub fn put(&self, fingerprint: &str, payload: Value, tables: Vec<String>, byte_size: usize, pressure: f64) {
        if byte_size > self.config.max_payload_bytes {
            self.metrics.rejections.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let entry = Entry {
            payload,
            byte_size,
            tables,
            cached_at: Instant::now(),
            ttl: self.effective_ttl(pressure),
        };
        let mut shard = self.shard_for(fingerprint).lock();
        if let Some(evicted) = shard.fast.push(fingerprint.to_string(), entry) {
            // `push` returns the evicted LRU pair when over capacity.
            if self.config.tiered {
                demote(&mut shard, evicted.0, evicted.1, self.config.slow_tier_bytes_per_shard, &self.metrics);
            } else {
                self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Invalidate every entry whose table set references `table`. Used
    /// for both the DDL and DML invalidation classes — the difference
    /// between them is in which operations the orchestrator calls this
    /// for, not in the matching logic here.
    pub fn invalidate_table(&self, table: &str) {
        for shard_lock in &self.shards {
            let mut shard = shard_lock.lock();
            let fast_keys: Vec<String> = shard
                .fast
                .iter()
                .filter(|(_, e)| e.tables.iter().any(|t| t == table))
                .map(|(k, _)| k.clone())
                .collect();
            for key in fast_keys {
                shard.fast.pop(&key);
            }
            shard.slow.retain(|(_, e)| !e.tables.iter().any(|t| t == table));
        }
    }

    /// Invalidate every entry in the cache (pool reset).
    pub fn invalidate_all(&self) {
        for shard_lock in &self.shards {
            let mut shard = shard_lock.lock();
            shard.fast.clear();
            shard.slow.clear();
            shard.slow_bytes = 0;
        }
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }
}

fn promote(shard: &mut Shard, key: String, entry: Entry) {
    if let Some(evicted) = shard.fast.push(key, entry) {
        shard.slow.push(evicted);
    }
}

fn demote(shard: &mut Shard, key: String, entry: Entry, byte_budget: usize, metrics: &CacheMetrics) {
    shard.slow_bytes += entry.byte_size;
    shard.slow.push((key, entry));
    while shard.slow_bytes > byte_budget {
        if shard.slow.is_empty() {
            break;
        }
        let (_, oldest) = shard.slow.remove(0);
        shard.slow_bytes = shard.slow_bytes.saturating_sub(oldest.byte_size);
        metrics.evictions.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(config: CacheConfig) -> CacheStore {
        CacheStore::new(config)
    }

    #[test]
    fn put_then_get_round_trips() {
        let c = store(CacheConfig::default());
        c.put("fp1", json!({"rows": [1, 2, 3]}), vec!["orders".into()], 32, 0.0);
        assert_eq!(c.get("fp1"), Some(json!({"rows": [1, 2, 3]})));
    }

    #[test]
    fn miss_returns_none() {
        let c = store(CacheConfig::default());
        assert_eq!(c.get("absent"), None);
        assert_eq!(c.metrics().misses, 1);
    }

    #[test]
    fn oversized_payload_is_not_cached() {
        let config = CacheConfig { max_payload_bytes: 10, ..CacheConfig::default() };
        let c = store(config);
        c.put("fp1", json!({"big": "payload"}), vec![], 1000, 0.0);
        assert_eq!(c.get("fp1"), None);
        assert_eq!(c.metrics().rejections, 1);
    }

    #[test]
    fn ttl_zero_pressure_uses_base_ttl() {
        let c = store(CacheConfig::default());
        assert_eq!(c.effective_ttl(0.0), Duration::from_secs(300));
    }

    #[test]
    fn ttl_is_clamped_to_minimum_60_seconds() {
        let config = CacheConfig { base_ttl: Duration::from_secs(80), ..CacheConfig::default() };
        let c = store(config);
        // baseTTL * (1 - 1.0*0.5) = 40, clamped up to 60.
        assert_eq!(c.effective_ttl(1.0), Duration::from_secs(60));
    }

    #[test]
    fn ttl_scales_linearly_with_pressure() {
        let config = CacheConfig { base_ttl: Duration::from_secs(300), ..CacheConfig::default() };
        let c = store(config);
        // 300 * (1 - 0.5*0.5) = 225
        assert_eq!(c.effective_ttl(0.5), Duration::from_secs(225));
    }

    #[test]
    fn invalidate_table_removes_only_matching_entries() {
        let c = store(CacheConfig::default());
        c.put("fp_orders", json!(1), vec!["orders".into()], 8, 0.0);
        c.put("fp_users", json!(2), vec!["users".into()], 8, 0.0);
        c.invalidate_table("orders");
        assert_eq!(c.get("fp_orders"), None);
        assert_eq!(c.get("fp_users"), Some(json!(2)));
    }

    #[test]
    fn invalidate_all_clears_everything() {
        let c = store(CacheConfig::default());
        c.put("fp1", json!(1), vec![], 8, 0.0);
        c.put("fp2", json!(2), vec![], 8, 0.0);
        c.invalidate_all();
        assert_eq!(c.get("fp1"), None);
        assert_eq!(c.get("fp2"), None);
    }

    #[test]
    fn single_tier_mode_skips_slow_tier_on_eviction() {
        let config = CacheConfig { tiered: false, fast_tier_entries_per_shard: 1, ..CacheConfig::default() };
        let c = store(config);
        // Force both entries into the same shard by reusing the same fingerprint prefix
        // is not guaranteed, so just check metrics behave sanely after many inserts.
        for i in 0..32 {
            c.put(&format!("fp{i}"), json!(i), vec![], 8, 0.0);
        }
        // Non-tiered: nothing should ever land in a slow tier.
        for shard in &c.shards {
            assert!(shard.lock().slow.is_empty());
        }
    }
}

//! C8 — MySQL connection pool: sizing, health checks, a 4-state recovery
//! machine, and leak detection over `sqlx::MySqlPool`.

pub mod circuit;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use circuit::{CircuitBreaker, CircuitBreakerConfig};
use gw_error::{ClassifiedError, ErrorCategory, Result, Severity};
use gw_metrics::event_log::{EventLog, RecoveryEvent};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Pool sizing and timing configuration (mirrors §6's environment table).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub connection_string: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    pub health_check_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connection_string: "mysql://root@localhost/mysql".to_string(),
            min_connections: 1,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
            health_check_interval: Duration::from_secs(30),
        }
    }
}

/// Recovery state machine driven by consecutive health-check failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Normal,
    PrimaryRecovery,
    SecondaryRecovery,
    CriticalAlert,
}

const HEALTH_CHECK_FAILURE_THRESHOLD: u32 = 5;
const SECONDARY_RECOVERY_BACKOFF: Duration = Duration::from_secs(5);

/// Metadata tracked per currently-acquired connection, for leak detection
/// and for force-release during primary recovery.
struct ConnectionRecord {
    acquired_at: Instant,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub state: PoolState,
    pub live_connections: u32,
    pub idle_connections: u32,
    pub health_check_failures: u32,
    pub tracked_active: usize,
}

/// A connection checked out of the pool. Must be released through
/// [`ConnectionPool::release`] in every exit path — dropping it without
/// releasing still returns it to `sqlx`'s own pool, but leaves a stale
/// entry in the leak-detection map until the next sweep.
pub struct PooledConnection {
    id: Uuid,
    pub inner: sqlx::pool::PoolConnection<sqlx::MySql>,
}

pub struct ConnectionPool {
    config: PoolConfig,
    pool: RwLock<MySqlPool>,
    state: RwLock<PoolState>,
    circuit: CircuitBreaker,
    health_check_failures: AtomicU32,
    tracked: RwLock<HashMap<Uuid, ConnectionRecord>>,
    event_log: Arc<dyn EventLog>,
    acquires: AtomicU64,
    releases: AtomicU64,
}

impl ConnectionPool {
    /// Open `min_connections` in parallel. Non-fatal if some fail, as
    /// long as at least one succeeds.
    pub async fn initialize(config: PoolConfig, event_log: Arc<dyn EventLog>) -> Result<Self> {
        let pool = build_pool(&config).await?;
        Ok(Self {
            config,
            pool: RwLock::new(pool),
            state: RwLock::new(PoolState::Normal),
            circuit: CircuitBreaker::new(CircuitBreakerConfig::default()),
            health_check_failures: AtomicU32::new(0),
            tracked: RwLock::new(HashMap::new()),
            event_log,
            acquires: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        })
    }

    /// Build a pool without performing any I/O — the underlying
    /// `sqlx::MySqlPool` connects lazily on first acquire. For tests that
    /// exercise validation/RBAC/rate-limit short-circuits upstream of this
    /// crate and never actually reach the database.
    #[must_use]
    pub fn new_lazy(config: PoolConfig, event_log: Arc<dyn EventLog>) -> Self {
        let pool = MySqlPoolOptions::new()
            .min_connections(0)
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect_lazy(&config.connection_string)
            .expect("connect_lazy only fails on a malformed URL, never on I/O");
        Self {
            config,
            pool: RwLock::new(pool),
            state: RwLock::new(PoolState::Normal),
            circuit: CircuitBreaker::new(CircuitBreakerConfig::default()),
            health_check_failures: AtomicU32::new(0),
            tracked: RwLock::new(HashMap::new()),
            event_log,
            acquires: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        }
    }

    pub async fn state(&self) -> PoolState {
        *self.state.read().await
    }

    pub async fn stats(&self) -> PoolStats {
        let pool = self.pool.read().await;
        PoolStats {
            state: self.state().await,
            live_connections: pool.size(),
            idle_connections: u32::try_from(pool.num_idle()).unwrap_or(u32::MAX),
            health_check_failures: self.health_check_failures.load(Ordering::Relaxed),
            tracked_active: self.tracked.read().await.len(),
        }
    }

    /// Acquire a connection, failing fast with `RESOURCE_EXHAUSTED` after
    /// `acquire_timeout`, or immediately if the pool is in `CriticalAlert`.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        if self.state().await == PoolState::CriticalAlert {
            return Err(ClassifiedError::new(
                ErrorCategory::ResourceExhausted,
                Severity::Critical,
                "pool is in critical-alert state; acquires fail fast",
            ));
        }

        let pool = self.pool.read().await.clone();
        let timeout = self.config.acquire_timeout;
        let conn = self
            .circuit
            .call(|| async move {
                tokio::time::timeout(timeout, pool.acquire())
                    .await
                    .map_err(|_| {
                        ClassifiedError::new(
                            ErrorCategory::ResourceExhausted,
                            Severity::High,
                            "connection pool acquire timed out",
                        )
                    })?
                    .map_err(ClassifiedError::from)
            })
            .await?;

        let id = Uuid::new_v4();
        self.tracked.write().await.insert(id, ConnectionRecord { acquired_at: Instant::now() });
        self.acquires.fetch_add(1, Ordering::Relaxed);
        Ok(PooledConnection { id, inner: conn })
    }

    /// Release a connection back to the pool. Always call this, even on
    /// the error path, so leak detection does not fire spuriously.
    pub async fn release(&self, conn: PooledConnection) {
        self.tracked.write().await.remove(&conn.id);
        self.releases.fetch_add(1, Ordering::Relaxed);
        drop(conn.inner);
    }

    /// Run one health-check cycle: acquire a connection, run a cheap
    /// liveness probe, release it. On failure, bump the failure counter
    /// and, at the threshold, enter primary recovery.
    pub async fn run_health_check(&self) -> Result<()> {
        let probe = self.probe().await;
        match probe {
            Ok(()) => {
                self.health_check_failures.store(0, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                let failures = self.health_check_failures.fetch_add(1, Ordering::Relaxed) + 1;
                self.event_log.append(
                    RecoveryEvent::new("HEALTH_CHECK_FAILURE", Severity::Medium)
                        .with_context("failures", failures.to_string()),
                );
                if failures >= HEALTH_CHECK_FAILURE_THRESHOLD {
                    self.enter_primary_recovery().await;
                }
                Err(e)
            }
        }
    }

    async fn probe(&self) -> Result<()> {
        let conn = self.acquire().await?;
        let mut conn = conn;
        let result = sqlx::query("SELECT 1").fetch_one(&mut *conn.inner).await;
        self.release(conn).await;
        result.map(|_| ()).map_err(ClassifiedError::from)
    }

    async fn enter_primary_recovery(&self) {
        *self.state.write().await = PoolState::PrimaryRecovery;
        self.event_log.append(RecoveryEvent::new("PRIMARY_RECOVERY_START", Severity::High));

        let leaked: Vec<(Uuid, Duration)> = {
            let tracked = self.tracked.read().await;
            tracked.iter().map(|(id, r)| (*id, r.acquired_at.elapsed())).collect()
        };
        for (id, age) in &leaked {
            tracing::warn!(connection_id = %id, acquired_ms_ago = age.as_millis(), "force-releasing tracked connection during primary recovery");
        }
        self.tracked.write().await.clear();

        match build_pool(&self.config).await {
            Ok(new_pool) => {
                *self.pool.write().await = new_pool;
                self.circuit.reset().await;
                self.health_check_failures.store(0, Ordering::Relaxed);
                *self.state.write().await = PoolState::Normal;
                self.event_log.append(
                    RecoveryEvent::new("RECOVERY_SUCCESS", Severity::Medium)
                        .with_context("strategy", "primary"),
                );
            }
            Err(e) => {
                self.event_log.append(
                    RecoveryEvent::new("PRIMARY_RECOVERY_FAILED", Severity::High)
                        .with_context("error", e.message.clone()),
                );
                self.enter_secondary_recovery().await;
            }
        }
    }

    async fn enter_secondary_recovery(&self) {
        *self.state.write().await = PoolState::SecondaryRecovery;
        self.event_log.append(RecoveryEvent::new("SECONDARY_RECOVERY_START", Severity::High));

        tokio::time::sleep(SECONDARY_RECOVERY_BACKOFF).await;

        let rebuilt = build_pool(&self.config).await;
        match rebuilt {
            Ok(new_pool) => {
                *self.pool.write().await = new_pool;
                match self.probe().await {
                    Ok(()) => {
                        self.circuit.reset().await;
                        self.health_check_failures.store(0, Ordering::Relaxed);
                        *self.state.write().await = PoolState::Normal;
                        self.event_log.append(
                            RecoveryEvent::new("RECOVERY_SUCCESS", Severity::Medium)
                                .with_context("strategy", "secondary"),
                        );
                    }
                    Err(e) => {
                        self.event_log.append(
                            RecoveryEvent::new("SECONDARY_RECOVERY_FAILED", Severity::Critical)
                                .with_context("error", e.message.clone()),
                        );
                        self.enter_critical_alert().await;
                    }
                }
            }
            Err(e) => {
                self.event_log.append(
                    RecoveryEvent::new("SECONDARY_RECOVERY_FAILED", Severity::Critical)
                        .with_context("error", e.message.clone()),
                );
                self.enter_critical_alert().await;
            }
        }
    }

    async fn enter_critical_alert(&self) {
        *self.state.write().await = PoolState::CriticalAlert;
        self.event_log.append(RecoveryEvent::new("CRITICAL_ALERT", Severity::Critical));
        tracing::error!("connection pool entered critical-alert state; acquires will fail fast");
    }

    /// Sweep the tracked-connection map and warn about entries older than
    /// `threshold` — a possible leaked handle that was never released.
    pub async fn detect_leaks(&self, threshold: Duration) -> Vec<Uuid> {
        let tracked = self.tracked.read().await;
        let leaked: Vec<Uuid> = tracked
            .iter()
            .filter(|(_, r)| r.acquired_at.elapsed() > threshold)
            .map(|(id, _)| *id)
            .collect();
        for id in &leaked {
            tracing::warn!(connection_id = %id, "possible leaked connection handle");
        }
        leaked
    }

    pub async fn close(&self) {
        self.pool.read().await.close().await;
    }
}

async fn build_pool(config: &PoolConfig) -> Result<MySqlPool> {
    MySqlPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect(&config.connection_string)
        .await
        .map_err(ClassifiedError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_config_defaults_are_sane() {
        let c = PoolConfig::default();
        assert!(c.min_connections <= c.max_connections);
        assert!(c.acquire_timeout > Duration::ZERO);
    }

    #[test]
    fn health_check_threshold_matches_spec() {
        assert_eq!(HEALTH_CHECK_FAILURE_THRESHOLD, 5);
    }
}

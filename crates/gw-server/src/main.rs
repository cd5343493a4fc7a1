//! MySQL tool gateway server binary: stdio JSON-RPC transport, process
//! composition, and graceful shutdown.

mod dispatch;
mod progress;
mod rpc;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use gw_cache::{CacheConfig, CacheStore};
use gw_config::GatewayConfig;
use gw_metrics::{EventLog, FileEventLog, InMemoryEventLog, MetricsStore, PressureBus, RecoveryEvent, ResourceProbe};
use gw_orchestrator::Gateway;
use gw_pool::{ConnectionPool, PoolConfig};
use gw_ratelimit::{AdaptiveLimiter, LoadSample};
use gw_rbac::RbacEngine;
use gw_scheduler::TaskScheduler;
use gw_validation::Validator;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::rpc::{RpcError, RpcRequest, RpcResponse};

const EVENT_LOG_PATH: &str = "gateway-events.log";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
const MAX_CONCURRENT_TASKS: usize = 4;
const METRICS_RETENTION: Duration = Duration::from_secs(3600);
const METRICS_MAX_POINTS: usize = 10_000;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "gw_server=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(GatewayConfig::from_env());
    info!(config = %config.redacted_snapshot(), "starting mysql tool gateway");

    let event_log: Arc<dyn EventLog> = match FileEventLog::open(EVENT_LOG_PATH) {
        Ok(log) => Arc::new(log),
        Err(e) => {
            warn!(error = %e, path = EVENT_LOG_PATH, "could not open event log file, falling back to in-memory");
            Arc::new(InMemoryEventLog::default())
        }
    };

    let pool_config = PoolConfig {
        connection_string: mysql_connection_string(&config),
        min_connections: 1,
        max_connections: config.mysql_connection_limit,
        acquire_timeout: Duration::from_secs(config.mysql_connect_timeout_secs),
        idle_timeout: Duration::from_secs(config.mysql_idle_timeout_secs),
        max_lifetime: Duration::from_secs(1800),
        health_check_interval: Duration::from_secs(30),
    };
    let pool = match ConnectionPool::initialize(pool_config, Arc::clone(&event_log)).await {
        Ok(pool) => Arc::new(pool),
        Err(e) => {
            error!(error = %e.message, "failed to initialize connection pool; exiting");
            return ExitCode::FAILURE;
        }
    };

    let metrics = MetricsStore::new(METRICS_MAX_POINTS, METRICS_RETENTION, cpu_count());
    let pressure = PressureBus::spawn(ResourceProbe::new(), Duration::from_secs(5));
    let rate_limiter =
        Arc::new(AdaptiveLimiter::new(u64::from(config.rate_limit_max), Duration::from_secs(config.rate_limit_window_secs)));
    let validator = Arc::new(Validator::new());
    // The role/permission catalog is populated by an external admin tool,
    // not hardcoded here; an empty engine denies everything, which is the
    // correct default until that catalog is loaded.
    let rbac = Arc::new(RbacEngine::new());
    let cache = Arc::new(CacheStore::new(CacheConfig {
        base_ttl: Duration::from_secs(config.query_cache_ttl_secs),
        tiered: config.enable_tiered_cache,
        max_payload_bytes: config.max_query_result_size,
        fast_tier_entries_per_shard: (config.query_cache_size / 16).max(1),
        ..CacheConfig::default()
    }));
    let scheduler = Arc::new(TaskScheduler::new(MAX_CONCURRENT_TASKS));

    spawn_load_feed(Arc::clone(&rate_limiter), Arc::clone(&scheduler), Arc::clone(&metrics), &pressure);
    spawn_pool_maintenance(Arc::clone(&pool), Duration::from_secs(30));

    let gateway = Arc::new(Gateway::new(
        Arc::clone(&config),
        metrics,
        pressure,
        rate_limiter,
        validator,
        rbac,
        cache,
        Arc::clone(&pool),
        Arc::clone(&scheduler),
        Arc::clone(&event_log),
    ));

    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(run_writer(outgoing_rx));
    let progress_task = tokio::spawn(progress::relay(Arc::clone(&scheduler), outgoing_tx.clone()));

    let shutdown = CancellationToken::new();
    let shutdown_watcher = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_watcher.cancel();
    });

    let handles = run_request_loop(Arc::clone(&gateway), outgoing_tx.clone(), shutdown.clone()).await;
    for handle in handles {
        let _ = handle.await;
    }

    info!("stdin closed or shutdown requested; draining task queue");
    let cancelled = scheduler.cancel_all_queued().await;
    info!(cancelled, "cancelled queued tasks");
    wait_for_running_tasks(&scheduler, SHUTDOWN_GRACE).await;

    progress_task.abort();
    drop(outgoing_tx);
    let _ = writer.await;
    pool.close().await;
    event_log.append(RecoveryEvent::new("SERVER_SHUTDOWN", gw_error::Severity::Info));

    ExitCode::SUCCESS
}

/// Reads newline-framed JSON-RPC requests from stdin until EOF or
/// `shutdown` fires, dispatching each to its own task so a slow request
/// never blocks reading the next line. Returns the spawned handles so the
/// caller can await their completion during shutdown.
async fn run_request_loop(
    gateway: Arc<Gateway>,
    outgoing: mpsc::UnboundedSender<String>,
    shutdown: CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut handles = Vec::new();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            next = lines.next_line() => {
                match next {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => {
                        let gateway = Arc::clone(&gateway);
                        let outgoing = outgoing.clone();
                        let shutdown = shutdown.clone();
                        handles.push(tokio::spawn(async move {
                            handle_line(&gateway, &line, &outgoing, &shutdown).await;
                        }));
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "error reading stdin; stopping request loop");
                        break;
                    }
                }
            }
        }
    }
    handles
}

async fn handle_line(gateway: &Gateway, line: &str, outgoing: &mpsc::UnboundedSender<String>, shutdown: &CancellationToken) {
    let request: RpcRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            send(outgoing, &RpcResponse::err(Value::Null, RpcError { code: rpc::PARSE_ERROR, message: e.to_string(), data: None }));
            return;
        }
    };

    let result = dispatch::dispatch(gateway, &request.method, request.params, shutdown).await;

    let Some(id) = request.id else {
        // A request with no `id` is a JSON-RPC notification: no response.
        if let Err(e) = result {
            warn!(method = %request.method, error = %e.message, "notification-style call failed");
        }
        return;
    };

    let response = match result {
        Ok(value) => RpcResponse::ok(id, value),
        Err(e) => RpcResponse::err(id, e),
    };
    send(outgoing, &response);
}

fn send(outgoing: &mpsc::UnboundedSender<String>, response: &RpcResponse) {
    match serde_json::to_string(response) {
        Ok(line) => {
            let _ = outgoing.send(line);
        }
        Err(e) => error!(error = %e, "failed to serialize response"),
    }
}

async fn run_writer(mut rx: mpsc::UnboundedReceiver<String>) {
    let mut stdout = tokio::io::stdout();
    while let Some(line) = rx.recv().await {
        if stdout.write_all(line.as_bytes()).await.is_err() {
            break;
        }
        if stdout.write_all(b"\n").await.is_err() {
            break;
        }
        if stdout.flush().await.is_err() {
            break;
        }
    }
}

async fn wait_for_running_tasks(scheduler: &TaskScheduler, grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        let stats = scheduler.stats().await;
        if stats.running == 0 {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(running = stats.running, "shutdown grace period elapsed with tasks still running");
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Feeds the memory-pressure bus's samples into the rate limiter's load
/// factor and the scheduler's effective concurrency, so both adapt to the
/// same notion of system load; also records the 5-minute load average so
/// the `high_cpu_load`/`critical_cpu_load` alert rules have data to act on.
fn spawn_load_feed(
    rate_limiter: Arc<AdaptiveLimiter>,
    scheduler: Arc<TaskScheduler>,
    metrics: Arc<MetricsStore>,
    pressure: &PressureBus,
) {
    let mut pressure_rx = pressure.subscribe();
    let probe = ResourceProbe::new();
    tokio::spawn(async move {
        while pressure_rx.changed().await.is_ok() {
            let p = *pressure_rx.borrow();
            scheduler.update_pressure(p);
            let sample = probe.sample();
            let cpu_usage = (sample.loadavg_1m / sample.cpu_count.max(1) as f64).min(1.0);
            rate_limiter.update_load(LoadSample { cpu_usage, memory_usage: p });
            metrics.record("cpu_loadavg_5m", sample.loadavg_5m, std::collections::HashMap::new());
        }
    });
}

/// Periodically runs the pool's health check (driving the recovery state
/// machine on repeated failure) and sweeps for connections that were
/// acquired and never released.
fn spawn_pool_maintenance(pool: Arc<ConnectionPool>, interval: Duration) {
    let leak_threshold = interval * 10;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = pool.run_health_check().await {
                warn!(error = %e.message, "pool health check failed");
            }
            let leaked = pool.detect_leaks(leak_threshold).await;
            if !leaked.is_empty() {
                warn!(count = leaked.len(), "possible leaked connections detected");
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}

fn cpu_count() -> usize {
    std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(1)
}

fn mysql_connection_string(config: &GatewayConfig) -> String {
    let ssl_suffix = if config.mysql_ssl { "?ssl-mode=REQUIRED" } else { "" };
    format!(
        "mysql://{user}:{password}@{host}:{port}/{db}{ssl_suffix}",
        user = percent_encode(&config.mysql_user),
        password = percent_encode(config.mysql_password.expose()),
        host = config.mysql_host,
        port = config.mysql_port,
        db = config.mysql_database,
    )
}

/// Percent-encodes everything outside the unreserved set (`A-Za-z0-9-_.~`)
/// for use in the userinfo segment of a connection URL. Not a
/// general-purpose URL encoder — just enough for MySQL usernames/passwords,
/// which is all this ever sees.
fn percent_encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '~') {
            out.push(ch);
        } else {
            let mut buf = [0u8; 4];
            for byte in ch.encode_utf8(&mut buf).as_bytes() {
                out.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_encode_leaves_plain_identifiers_alone() {
        assert_eq!(percent_encode("root"), "root");
    }

    #[test]
    fn percent_encode_escapes_reserved_characters() {
        assert_eq!(percent_encode("p@ss:word"), "p%40ss%3Aword");
    }

    #[test]
    fn cpu_count_is_at_least_one() {
        assert!(cpu_count() >= 1);
    }
}

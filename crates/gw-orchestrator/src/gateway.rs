//! The composition root: one `Gateway` holding every other component as an
//! `Arc`, and the nine-step `execute()`/`submit_task()` pipeline that wires
//! them together for a single tool invocation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use gw_cache::{fingerprint, CacheStore};
use gw_config::GatewayConfig;
use gw_error::{ClassifiedError, Result};
use gw_metrics::{EventLog, MetricsStore, PressureBus, RecoveryEvent};
use gw_pool::ConnectionPool;
use gw_ratelimit::AdaptiveLimiter;
use gw_rbac::RbacEngine;
use gw_retry::execute_with_retry;
use gw_scheduler::{TaskScheduler, TaskThunk};
use gw_validation::{Level, Validator};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::backup::run_long_task;
use crate::sql_introspect::{extract_target_table, row_to_json};
use crate::tool::{is_ddl, strategy_for, ToolKind};

pub struct Gateway {
    config: Arc<GatewayConfig>,
    metrics: Arc<MetricsStore>,
    pressure: PressureBus,
    rate_limiter: Arc<AdaptiveLimiter>,
    validator: Arc<Validator>,
    rbac: Arc<RbacEngine>,
    cache: Arc<CacheStore>,
    pool: Arc<ConnectionPool>,
    scheduler: Arc<TaskScheduler>,
    event_log: Arc<dyn EventLog>,
}

impl Gateway {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        config: Arc<GatewayConfig>,
        metrics: Arc<MetricsStore>,
        pressure: PressureBus,
        rate_limiter: Arc<AdaptiveLimiter>,
        validator: Arc<Validator>,
        rbac: Arc<RbacEngine>,
        cache: Arc<CacheStore>,
        pool: Arc<ConnectionPool>,
        scheduler: Arc<TaskScheduler>,
        event_log: Arc<dyn EventLog>,
    ) -> Self {
        Self { config, metrics, pressure, rate_limiter, validator, rbac, cache, pool, scheduler, event_log }
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Run a short-path tool to completion. Long-running tools must go
    /// through [`Self::submit_task`] instead.
    pub async fn execute(&self, tool: ToolKind, args: Value, principal: &str) -> Result<Value> {
        self.execute_cancellable(tool, args, principal, &CancellationToken::new()).await
    }

    /// Same as [`Self::execute`], observing `cancel` across the retry
    /// engine's backoff sleeps.
    pub async fn execute_cancellable(
        &self,
        tool: ToolKind,
        args: Value,
        principal: &str,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        if tool.is_long_running() {
            return Err(ClassifiedError::validation(
                "long-running tools must be submitted via submit_task",
                "tool",
            ));
        }

        // 1. validate
        self.validate_args(tool, &args)?;
        // 2. RBAC
        self.rbac.check(principal, tool.permission())?;
        // 3. rate limit
        self.rate_limiter.allow(principal)?;

        // 4. cache probe, read-shaped tools only
        let cacheable = tool.is_read_shaped();
        let fp = cacheable.then(|| fingerprint(tool.name(), &args));
        if let Some(fp) = &fp {
            if let Some(cached) = self.cache.get(fp) {
                self.metrics.record("cache_hit_rate", 1.0, HashMap::new());
                return Ok(cached);
            }
            self.metrics.record("cache_hit_rate", 0.0, HashMap::new());
        }

        // 5+6. execute under retry, acquiring/releasing a connection per attempt
        let strategy = strategy_for(tool, &args);
        let start = Instant::now();
        let outcome = execute_with_retry(|_attempt| self.run(tool, &args), &strategy, cancel).await;

        self.metrics.record("query_time", start.elapsed().as_secs_f64(), HashMap::new());

        let result = match outcome.final_result {
            Some(value) => {
                // 7. invalidate on DML/DDL (only `execute` is non-read-shaped here)
                if !tool.is_read_shaped() {
                    if let Some(table) = args.get("sql").and_then(Value::as_str).and_then(extract_target_table) {
                        let sql = args.get("sql").and_then(Value::as_str).unwrap_or_default();
                        if is_ddl(sql) {
                            self.cache.invalidate_ddl(&table);
                        } else {
                            self.cache.invalidate_dml(&table);
                        }
                    }
                }
                // 9. populate the cache on a fresh, cacheable success
                if let Some(fp) = &fp {
                    let tables: Vec<String> =
                        args.get("sql").and_then(Value::as_str).and_then(extract_target_table).into_iter().collect();
                    let byte_size = serde_json::to_vec(&value).map(|v| v.len()).unwrap_or(0);
                    self.cache.put(fp, value.clone(), tables, byte_size, self.pressure.current());
                }
                Ok(value)
            }
            None => {
                let error = outcome.last_error.expect("a failed RetryResult always carries last_error");
                self.metrics.record_error(&error.category.to_string(), error.severity);
                Err(error)
            }
        };

        // Feeds the `high_error_rate` alert: a 0/1 series whose 5-minute
        // average is the observed error rate.
        self.metrics.record("error_rate", if result.is_ok() { 0.0 } else { 1.0 }, HashMap::new());
        result
    }

    /// Validate and enqueue a long-running tool, returning its task id.
    /// Progress and completion are observed via `scheduler().subscribe_progress()`/`status()`.
    pub async fn submit_task(&self, tool: ToolKind, args: Value, principal: &str) -> Result<String> {
        let Some(task_type) = tool.task_type() else {
            return Err(ClassifiedError::validation("tool is not a long-running task", "tool"));
        };

        self.validate_args(tool, &args)?;
        self.rbac.check(principal, tool.permission())?;
        self.rate_limiter.allow(principal)?;

        let priority = args.get("priority").and_then(Value::as_i64).unwrap_or(0);
        let pool = Arc::clone(&self.pool);
        let cache = Arc::clone(&self.cache);
        let metrics = Arc::clone(&self.metrics);

        let thunk: TaskThunk = Box::new(move |task_id, cancel, progress_tx| {
            Box::pin(run_long_task(task_id, tool, args, pool, cache, metrics, cancel, progress_tx))
        });

        let task_id = self.scheduler.submit(task_type, priority, thunk).await;
        self.event_log.append(
            RecoveryEvent::new("TASK_SUBMITTED", gw_error::Severity::Info)
                .with_context("task_id", task_id.clone())
                .with_context("tool", tool.name())
                .with_context("principal", principal),
        );
        Ok(task_id)
    }

    /// A redacted snapshot of gateway-wide state, for diagnostic tooling
    /// outside the tool-call path (not itself a `ToolKind`).
    pub async fn diagnostics(&self) -> Value {
        serde_json::json!({
            "config": self.config.redacted_snapshot(),
            "pool": {
                "state": format!("{:?}", self.pool.state().await),
            },
            "cache": self.cache.metrics(),
            "scheduler": self.scheduler.stats().await,
            "pressure": self.pressure.current(),
        })
    }

    fn validate_args(&self, tool: ToolKind, args: &Value) -> Result<()> {
        match tool {
            ToolKind::Query | ToolKind::Execute => {
                let sql = args.get("sql").ok_or_else(|| ClassifiedError::validation("missing field", "sql"))?;
                self.validator.validate(sql, "sql", Level::Strict)?;
                let sql_text = sql.as_str().ok_or_else(|| ClassifiedError::validation("sql must be text", "sql"))?;
                self.validator.validate_query_type(sql_text, "sql", Level::Strict, &self.config.allowed_query_types)?;
            }
            ToolKind::ShowTables => {}
            ToolKind::Backup | ToolKind::Export | ToolKind::Import => {
                let table = args.get("table").ok_or_else(|| ClassifiedError::validation("missing field", "table"))?;
                self.validator.validate_table_name(table, "table", Level::Strict)?;
            }
        }
        Ok(())
    }

    async fn run(&self, tool: ToolKind, args: &Value) -> Result<Value> {
        match tool {
            ToolKind::Query => self.run_select(args).await,
            ToolKind::Execute => self.run_execute(args).await,
            ToolKind::ShowTables => self.run_show_tables().await,
            ToolKind::Backup | ToolKind::Export | ToolKind::Import => {
                unreachable!("long-running tools are dispatched through submit_task, not run")
            }
        }
    }

    async fn run_select(&self, args: &Value) -> Result<Value> {
        let sql = args.get("sql").and_then(Value::as_str).unwrap_or_default();
        let mut conn = self.pool.acquire().await?;
        let fetched = sqlx::query(sql).fetch_all(&mut *conn.inner).await.map_err(ClassifiedError::from);
        self.pool.release(conn).await;
        let rows = fetched?;
        let values: Vec<Value> = rows.iter().map(row_to_json).collect();
        Ok(serde_json::json!({ "rows": values, "row_count": values.len() }))
    }

    async fn run_execute(&self, args: &Value) -> Result<Value> {
        let sql = args.get("sql").and_then(Value::as_str).unwrap_or_default();
        let mut conn = self.pool.acquire().await?;
        let executed = sqlx::query(sql).execute(&mut *conn.inner).await.map_err(ClassifiedError::from);
        self.pool.release(conn).await;
        let outcome = executed?;
        Ok(serde_json::json!({ "rows_affected": outcome.rows_affected() }))
    }

    async fn run_show_tables(&self) -> Result<Value> {
        let mut conn = self.pool.acquire().await?;
        let fetched = sqlx::query("SHOW TABLES").fetch_all(&mut *conn.inner).await.map_err(ClassifiedError::from);
        self.pool.release(conn).await;
        let rows = fetched?;
        let values: Vec<Value> = rows.iter().map(row_to_json).collect();
        Ok(serde_json::json!({ "tables": values }))
    }
}

//! Typed configuration loaded from the process environment.
//!
//! Every key in the table below is read once, validated, and — if it falls
//! outside its documented range — replaced with its default and logged as a
//! warning. Configuration never crashes the process; only a missing or
//! malformed value that has no sane default (there are none, by design) would.

use std::env;

use gw_error::Masked;
use tracing::warn;

/// Flat, typed configuration record. Constructed once at startup via
/// [`GatewayConfig::from_env`] and shared read-only (`Arc<GatewayConfig>`)
/// by the composition root — mirroring the teacher's "deep configuration
/// objects become flat typed records, validated once" redesign note.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub mysql_host: String,
    pub mysql_port: u16,
    pub mysql_user: String,
    pub mysql_password: Masked<String>,
    pub mysql_database: String,
    pub mysql_ssl: bool,
    pub mysql_connection_limit: u32,
    pub mysql_connect_timeout_secs: u64,
    pub mysql_idle_timeout_secs: u64,

    pub allowed_query_types: Vec<String>,
    pub max_query_length: usize,
    pub max_result_rows: usize,
    pub query_timeout_secs: u64,

    pub rate_limit_max: u32,
    pub rate_limit_window_secs: u64,

    pub schema_cache_size: usize,
    pub table_exists_cache_size: usize,
    pub index_cache_size: usize,
    pub cache_ttl_secs: u64,

    pub enable_query_cache: bool,
    pub query_cache_size: usize,
    pub query_cache_ttl_secs: u64,
    pub max_query_result_size: usize,

    pub enable_tiered_cache: bool,
    pub enable_ttl_adjustment: bool,
}

impl GatewayConfig {
    /// Parse configuration from the process environment, falling back to
    /// documented defaults for anything missing or out of range.
    pub fn from_env() -> Self {
        Self {
            mysql_host: env_string("MYSQL_HOST", "localhost"),
            mysql_port: env_ranged("MYSQL_PORT", 3306, 1, 65535),
            mysql_user: env_string("MYSQL_USER", "root"),
            mysql_password: Masked::new(env_string("MYSQL_PASSWORD", "")),
            mysql_database: env_string("MYSQL_DATABASE", ""),
            mysql_ssl: env_bool("MYSQL_SSL", false),
            mysql_connection_limit: env_ranged("MYSQL_CONNECTION_LIMIT", 10, 1, 100),
            mysql_connect_timeout_secs: env_ranged("MYSQL_CONNECT_TIMEOUT", 60, 1, 300),
            mysql_idle_timeout_secs: env_ranged("MYSQL_IDLE_TIMEOUT", 60, 1, 3600),

            allowed_query_types: env_csv(
                "ALLOWED_QUERY_TYPES",
                &["SELECT", "SHOW", "DESCRIBE", "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER"],
            ),
            max_query_length: env_ranged("MAX_QUERY_LENGTH", 10_000, 1, usize::MAX),
            max_result_rows: env_ranged("MAX_RESULT_ROWS", 1_000, 1, usize::MAX),
            query_timeout_secs: env_ranged("QUERY_TIMEOUT", 30, 1, u64::MAX),

            rate_limit_max: env_ranged("RATE_LIMIT_MAX", 100, 1, u32::MAX),
            rate_limit_window_secs: env_ranged("RATE_LIMIT_WINDOW", 60, 1, u64::MAX),

            schema_cache_size: env_ranged("SCHEMA_CACHE_SIZE", 128, 1, usize::MAX),
            table_exists_cache_size: env_ranged("TABLE_EXISTS_CACHE_SIZE", 64, 1, usize::MAX),
            index_cache_size: env_ranged("INDEX_CACHE_SIZE", 64, 1, usize::MAX),
            cache_ttl_secs: env_ranged("CACHE_TTL", 300, 1, u64::MAX),

            enable_query_cache: env_bool("ENABLE_QUERY_CACHE", true),
            query_cache_size: env_ranged("QUERY_CACHE_SIZE", 1_000, 1, usize::MAX),
            query_cache_ttl_secs: env_ranged("QUERY_CACHE_TTL", 300, 1, u64::MAX),
            max_query_result_size: env_ranged("MAX_QUERY_RESULT_SIZE", 1_048_576, 1, usize::MAX),

            enable_tiered_cache: env_bool("ENABLE_TIERED_CACHE", false),
            enable_ttl_adjustment: env_bool("ENABLE_TTL_ADJUSTMENT", false),
        }
    }

    /// A redacted snapshot safe to log or return over a diagnostic tool call.
    /// Masking a snapshot twice is identical to masking it once — the
    /// password field is already a [`Masked`] value, so re-snapshotting just
    /// clones the same placeholder.
    pub fn redacted_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "mysql_host": self.mysql_host,
            "mysql_port": self.mysql_port,
            "mysql_user": self.mysql_user,
            "mysql_password": "***",
            "mysql_database": self.mysql_database,
            "mysql_ssl": self.mysql_ssl,
            "mysql_connection_limit": self.mysql_connection_limit,
            "rate_limit_max": self.rate_limit_max,
            "rate_limit_window_secs": self.rate_limit_window_secs,
        })
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => v.eq_ignore_ascii_case("true"),
        Err(_) => default,
    }
}

fn env_csv(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v.split(',').map(|s| s.trim().to_uppercase()).collect(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

fn env_ranged<T>(key: &str, default: T, min: T, max: T) -> T
where
    T: std::str::FromStr + PartialOrd + Copy + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(value) if value >= min && value <= max => value,
            Ok(value) => {
                warn!(key, rejected = %value, default = %default, "config value out of range, using default");
                default
            }
            Err(_) => {
                warn!(key, rejected = %raw, default = %default, "config value not parseable, using default");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_zero_and_65536_are_rejected() {
        temp_env::with_var("MYSQL_PORT", Some("0"), || {
            let cfg = GatewayConfig::from_env();
            assert_eq!(cfg.mysql_port, 3306);
        });
        temp_env::with_var("MYSQL_PORT", Some("65536"), || {
            let cfg = GatewayConfig::from_env();
            assert_eq!(cfg.mysql_port, 3306);
        });
    }

    #[test]
    fn port_boundaries_1_and_65535_are_accepted() {
        temp_env::with_var("MYSQL_PORT", Some("1"), || {
            let cfg = GatewayConfig::from_env();
            assert_eq!(cfg.mysql_port, 1);
        });
        temp_env::with_var("MYSQL_PORT", Some("65535"), || {
            let cfg = GatewayConfig::from_env();
            assert_eq!(cfg.mysql_port, 65535);
        });
    }

    #[test]
    fn redacted_snapshot_never_contains_password() {
        temp_env::with_var("MYSQL_PASSWORD", Some("hunter2"), || {
            let cfg = GatewayConfig::from_env();
            let snap = cfg.redacted_snapshot().to_string();
            assert!(!snap.contains("hunter2"));
        });
    }

    #[test]
    fn masking_snapshot_twice_is_idempotent() {
        let cfg = GatewayConfig::from_env();
        let once = cfg.redacted_snapshot();
        let twice = cfg.redacted_snapshot();
        assert_eq!(once, twice);
    }
}

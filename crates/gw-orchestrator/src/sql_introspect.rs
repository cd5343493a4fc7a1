//! Keyword-based SQL introspection: best-effort table-name extraction for
//! cache invalidation, and row-to-JSON decoding for query results.
//!
//! No SQL-to-AST parser is used here, by design — table extraction is a
//! regex over the handful of DML/DDL forms the gateway allows, matching
//! the pattern/keyword philosophy the validator (C5) already uses.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use sqlx::mysql::MySqlRow;
use sqlx::{Column, Row};

fn table_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:from|into|update|table)\s+`?([A-Za-z_][A-Za-z0-9_]*)`?").expect("table regex compiles")
    })
}

/// Best-effort extraction of the table a DML/DDL statement targets.
/// Returns `None` when no recognizable keyword/identifier pair is found —
/// cache invalidation then has nothing to narrow and the caller falls
/// back to leaving unrelated entries alone.
#[must_use]
pub fn extract_target_table(sql: &str) -> Option<String> {
    table_regex().captures(sql).map(|c| c[1].to_string())
}

/// Decode a MySQL row into a JSON object, trying progressively looser
/// column types until one succeeds, the same cascade the pool adapter
/// this gateway is built on uses for dynamically-shaped result sets.
#[must_use]
pub fn row_to_json(row: &MySqlRow) -> Value {
    let mut map = serde_json::Map::new();
    for column in row.columns() {
        let name = column.name().to_string();
        let value = if let Ok(v) = row.try_get::<i64, _>(name.as_str()) {
            serde_json::json!(v)
        } else if let Ok(v) = row.try_get::<f64, _>(name.as_str()) {
            serde_json::json!(v)
        } else if let Ok(v) = row.try_get::<bool, _>(name.as_str()) {
            serde_json::json!(v)
        } else if let Ok(v) = row.try_get::<String, _>(name.as_str()) {
            serde_json::json!(v)
        } else if let Ok(v) = row.try_get::<chrono::NaiveDateTime, _>(name.as_str()) {
            serde_json::json!(v.to_string())
        } else if let Ok(v) = row.try_get::<serde_json::Value, _>(name.as_str()) {
            v
        } else {
            Value::Null
        };
        map.insert(name, value);
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_table_from_select() {
        assert_eq!(extract_target_table("SELECT * FROM orders WHERE id=1"), Some("orders".to_string()));
    }

    #[test]
    fn extracts_table_from_insert() {
        assert_eq!(extract_target_table("INSERT INTO users (name) VALUES ('a')"), Some("users".to_string()));
    }

    #[test]
    fn extracts_table_from_update() {
        assert_eq!(extract_target_table("UPDATE accounts SET balance=0"), Some("accounts".to_string()));
    }

    #[test]
    fn extracts_table_from_create_table() {
        assert_eq!(extract_target_table("CREATE TABLE widgets (id INT)"), Some("widgets".to_string()));
    }

    #[test]
    fn backtick_quoted_identifiers_are_unquoted() {
        assert_eq!(extract_target_table("DELETE FROM `orders`"), Some("orders".to_string()));
    }

    #[test]
    fn unrecognized_statement_yields_none() {
        assert_eq!(extract_target_table("SHOW TABLES"), None);
    }
}

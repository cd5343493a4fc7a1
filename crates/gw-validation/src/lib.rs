//! C5 — input validation: type, control-character, length, dangerous-pattern,
//! table-name, and query-verb checks run in a fixed order on every inbound
//! value before it reaches the access-control or pool layers.

pub mod patterns;

use gw_error::{ClassifiedError, Result};
use patterns::{build_rules, PatternCategory, PatternRule, MODERATE_RISK_THRESHOLD};
use serde_json::Value;

/// Validation strictness. Ordered loosest to tightest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Basic,
    Moderate,
    Strict,
}

const DEFAULT_MAX_LENGTH: usize = 1000;
const TABLE_NAME_MAX_LENGTH: usize = 64;
const BASIC_ECHO_TRUNCATE_BYTES: usize = 100;

/// A validator carries its own compiled pattern table so each instance can
/// be constructed once (per component, or per test) and reused across calls.
pub struct Validator {
    rules: Vec<PatternRule>,
    table_name_regex: regex::Regex,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    pub fn new() -> Self {
        Self {
            rules: build_rules(),
            table_name_regex: regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$")
                .expect("table name regex must compile"),
        }
    }

    /// Run the full ordered pipeline against a single field's value.
    pub fn validate(&self, value: &Value, field_name: &str, level: Level) -> Result<()> {
        let text = self.check_type(value, field_name, level)?;
        if let Some(text) = text {
            self.check_control_characters(&text, field_name, level)?;
            self.check_length(&text, field_name, level, DEFAULT_MAX_LENGTH)?;
            self.check_patterns(&text, field_name, level)?;
        }
        Ok(())
    }

    /// Validate a value that is specifically a table/column identifier: the
    /// same pipeline plus the stricter 64-byte bound and the identifier
    /// regex (step 5).
    pub fn validate_table_name(&self, value: &Value, field_name: &str, level: Level) -> Result<()> {
        let text = self
            .check_type(value, field_name, level)?
            .ok_or_else(|| self.reject("table name must be text", field_name, level, value))?;
        self.check_control_characters(&text, field_name, level)?;
        self.check_length(&text, field_name, level, TABLE_NAME_MAX_LENGTH)?;
        self.check_patterns(&text, field_name, level)?;
        if !self.table_name_regex.is_match(&text) {
            return Err(self.reject("table name does not match the allowed identifier pattern", field_name, level, value));
        }
        Ok(())
    }

    /// Validate that a SQL statement's leading verb is on the caller-supplied
    /// allow-list (deployment-configured, see `GatewayConfig::allowed_query_types`).
    /// Leading whitespace (including newlines) before the verb is tolerated.
    pub fn validate_query_type(
        &self,
        query: &str,
        field_name: &str,
        level: Level,
        allowed_verbs: &[String],
    ) -> Result<()> {
        let trimmed = query.trim_start();
        let verb_end = trimmed.find(|c: char| !c.is_ascii_alphabetic()).unwrap_or(trimmed.len());
        let verb = trimmed[..verb_end].to_ascii_uppercase();
        if allowed_verbs.iter().any(|allowed| allowed == &verb) {
            Ok(())
        } else {
            Err(self.reject_text("query type is not on the allow-list", field_name, level, query))
        }
    }

    /// Step 1: only text/integer/floating/boolean/null-absent scalars are
    /// accepted. Returns the value's text form when it is text, so later
    /// string-shaped checks can run on it; non-text scalars skip those.
    fn check_type(&self, value: &Value, field_name: &str, level: Level) -> Result<Option<String>> {
        match value {
            Value::String(s) => Ok(Some(s.clone())),
            Value::Number(_) | Value::Bool(_) | Value::Null => Ok(None),
            Value::Array(_) | Value::Object(_) => {
                Err(self.reject("value type is not permitted (expected text, integer, floating, boolean, or null)", field_name, level, value))
            }
        }
    }

    /// Step 2: reject control characters other than tab, newline, and CR;
    /// NUL is always rejected even though it is technically in that set.
    fn check_control_characters(&self, text: &str, field_name: &str, level: Level) -> Result<()> {
        for ch in text.chars() {
            let is_allowed_whitespace = matches!(ch, '\t' | '\n' | '\r');
            if ch.is_control() && !is_allowed_whitespace {
                return Err(self.reject_text("value contains a disallowed control character", field_name, level, text));
            }
            if ch == '\0' {
                return Err(self.reject_text("value contains a NUL byte", field_name, level, text));
            }
        }
        Ok(())
    }

    /// Step 3: enforce a maximum byte length.
    fn check_length(&self, text: &str, field_name: &str, level: Level, max_length: usize) -> Result<()> {
        if text.len() > max_length {
            return Err(self.reject_text(
                &format!("value exceeds the maximum length of {max_length} bytes"),
                field_name,
                level,
                text,
            ));
        }
        Ok(())
    }

    /// Step 4: pattern checks. BASIC skips them entirely; MODERATE only
    /// fires on patterns at or above [`MODERATE_RISK_THRESHOLD`]; STRICT
    /// runs the full table.
    fn check_patterns(&self, text: &str, field_name: &str, level: Level) -> Result<()> {
        if level == Level::Basic {
            return Ok(());
        }
        for rule in &self.rules {
            if level == Level::Moderate && rule.risk < MODERATE_RISK_THRESHOLD {
                continue;
            }
            if rule.regex.is_match(text) {
                return Err(self.reject_pattern(rule.category, field_name, level, text));
            }
        }
        Ok(())
    }

    fn reject(&self, message: &str, field_name: &str, level: Level, value: &Value) -> ClassifiedError {
        let display = value.to_string();
        self.reject_text(message, field_name, level, &display)
    }

    fn reject_text(&self, message: &str, field_name: &str, level: Level, offending: &str) -> ClassifiedError {
        let err = ClassifiedError::validation(message, field_name);
        self.attach_echo(err, level, offending)
    }

    fn reject_pattern(&self, category: PatternCategory, field_name: &str, level: Level, offending: &str) -> ClassifiedError {
        let err = ClassifiedError::security_violation(
            format!("value matches a disallowed pattern ({})", category.label()),
            field_name,
        );
        self.attach_echo(err, level, offending)
    }

    /// STRICT never echoes the offending value in the error context; BASIC
    /// (which in practice never reaches here since it skips the checks that
    /// would reject) and MODERATE echo it truncated to 100 bytes.
    fn attach_echo(&self, err: ClassifiedError, level: Level, offending: &str) -> ClassifiedError {
        if level == Level::Strict {
            return err;
        }
        let truncated: String = offending.chars().take(BASIC_ECHO_TRUNCATE_BYTES).collect();
        let truncated = if truncated.len() > BASIC_ECHO_TRUNCATE_BYTES {
            truncated.chars().take(BASIC_ECHO_TRUNCATE_BYTES).collect()
        } else {
            truncated
        };
        err.with_context("offending_value", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_error::ErrorCategory;
    use serde_json::json;

    #[test]
    fn accepts_plain_text_at_strict() {
        let v = Validator::new();
        assert!(v.validate(&json!("hello world"), "name", Level::Strict).is_ok());
    }

    #[test]
    fn rejects_array_and_object_values() {
        let v = Validator::new();
        assert!(v.validate(&json!([1, 2]), "name", Level::Basic).is_err());
        assert!(v.validate(&json!({"a": 1}), "name", Level::Basic).is_err());
    }

    #[test]
    fn rejects_nul_byte_even_though_it_is_a_control_character() {
        let v = Validator::new();
        let err = v.validate(&json!("foo\0bar"), "name", Level::Basic).unwrap_err();
        assert_eq!(err.category, ErrorCategory::ValidationError);
    }

    #[test]
    fn allows_tab_newline_and_cr() {
        let v = Validator::new();
        assert!(v.validate(&json!("line1\nline2\ttabbed\r"), "name", Level::Strict).is_ok());
    }

    #[test]
    fn rejects_values_over_default_length() {
        let v = Validator::new();
        let long = "a".repeat(1001);
        assert!(v.validate(&json!(long), "name", Level::Basic).is_err());
        let ok = "a".repeat(1000);
        assert!(v.validate(&json!(ok), "name", Level::Basic).is_ok());
    }

    #[test]
    fn basic_level_skips_pattern_checks() {
        let v = Validator::new();
        assert!(v.validate(&json!("' OR '1'='1"), "name", Level::Basic).is_ok());
    }

    #[test]
    fn moderate_level_only_fires_on_high_risk_patterns() {
        let v = Validator::new();
        // A lone "--" is risk 20, below the moderate threshold: passes.
        assert!(v.validate(&json!("value -- trailing"), "name", Level::Moderate).is_ok());
        // A tautology is risk 95: rejected even at moderate.
        assert!(v.validate(&json!("' OR '1'='1"), "name", Level::Moderate).is_err());
    }

    #[test]
    fn strict_level_fires_on_every_pattern_including_comment_markers() {
        let v = Validator::new();
        assert!(v.validate(&json!("value -- trailing"), "name", Level::Strict).is_err());
    }

    #[test]
    fn strict_rejection_never_echoes_the_offending_value() {
        let v = Validator::new();
        let err = v.validate(&json!("' OR '1'='1"), "name", Level::Strict).unwrap_err();
        assert!(!err.context.contains_key("offending_value"));
    }

    #[test]
    fn moderate_rejection_echoes_truncated_to_100_bytes() {
        let v = Validator::new();
        let payload = format!("{}' OR '1'='1", "x".repeat(200));
        let err = v.validate(&json!(payload), "name", Level::Moderate).unwrap_err();
        let echoed = err.context.get("offending_value").unwrap();
        assert!(echoed.len() <= BASIC_ECHO_TRUNCATE_BYTES);
    }

    #[test]
    fn detects_file_io_command_execution_timing_and_introspection_families() {
        let v = Validator::new();
        for payload in [
            "SELECT LOAD_FILE('/etc/passwd')",
            "SELECT * INTO OUTFILE '/tmp/x'",
            "xp_cmdshell('dir')",
            "SELECT BENCHMARK(1000000, MD5('x'))",
            "SELECT SLEEP(5)",
            "SELECT @@version",
        ] {
            assert!(
                v.validate(&json!(payload), "q", Level::Strict).is_err(),
                "expected rejection for {payload}"
            );
        }
    }

    #[test]
    fn detects_union_injection() {
        let v = Validator::new();
        assert!(v
            .validate(&json!("1 UNION SELECT username, password FROM users"), "q", Level::Strict)
            .is_err());
    }

    #[test]
    fn table_name_accepts_valid_identifiers() {
        let v = Validator::new();
        assert!(v.validate_table_name(&json!("orders_2024"), "table", Level::Strict).is_ok());
        assert!(v.validate_table_name(&json!("_private"), "table", Level::Strict).is_ok());
    }

    #[test]
    fn table_name_rejects_names_starting_with_a_digit_or_containing_a_dot() {
        let v = Validator::new();
        assert!(v.validate_table_name(&json!("1orders"), "table", Level::Strict).is_err());
        assert!(v.validate_table_name(&json!("orders.secret"), "table", Level::Strict).is_err());
    }

    #[test]
    fn table_name_rejects_over_64_bytes() {
        let v = Validator::new();
        let long = "a".repeat(65);
        assert!(v.validate_table_name(&json!(long), "table", Level::Basic).is_err());
    }

    fn default_allowed_verbs() -> Vec<String> {
        ["SELECT", "SHOW", "DESCRIBE", "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn query_type_allows_known_verbs_with_leading_whitespace() {
        let v = Validator::new();
        let allowed = default_allowed_verbs();
        assert!(v.validate_query_type("  \n SELECT 1", "query", Level::Strict, &allowed).is_ok());
        assert!(v.validate_query_type("DELETE FROM t", "query", Level::Strict, &allowed).is_ok());
    }

    #[test]
    fn query_type_allows_ddl_verbs_when_configured() {
        let v = Validator::new();
        let allowed = default_allowed_verbs();
        assert!(v.validate_query_type("CREATE TABLE t (id INT)", "query", Level::Strict, &allowed).is_ok());
        assert!(v.validate_query_type("DROP TABLE t", "query", Level::Strict, &allowed).is_ok());
        assert!(v.validate_query_type("ALTER TABLE t ADD COLUMN x INT", "query", Level::Strict, &allowed).is_ok());
    }

    #[test]
    fn query_type_rejects_unlisted_verbs() {
        let v = Validator::new();
        let allowed = default_allowed_verbs();
        assert!(v.validate_query_type("GRANT ALL ON *.* TO x", "query", Level::Strict, &allowed).is_err());
        let narrow = vec!["SELECT".to_string()];
        assert!(v.validate_query_type("DROP TABLE t", "query", Level::Strict, &narrow).is_err());
    }
}

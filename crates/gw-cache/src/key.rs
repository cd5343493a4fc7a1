//! Cache key (fingerprint) generation.
//!
//! A fingerprint must be stable across semantically identical invocations
//! and must change whenever the arguments change — two different users
//! querying different rows must never collide on the same entry.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// SQL keywords folded to uppercase during canonicalization. Not
/// exhaustive — covers the verbs and clauses this gateway's own validator
/// and strategy selection already recognize.
const KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "AND", "OR", "NOT", "IN", "IS", "NULL", "AS", "JOIN", "INNER",
    "LEFT", "RIGHT", "OUTER", "ON", "GROUP", "BY", "ORDER", "HAVING", "LIMIT", "OFFSET",
    "DISTINCT", "UNION", "ALL", "INSERT", "INTO", "VALUES", "UPDATE", "SET", "DELETE", "CREATE",
    "TABLE", "DROP", "ALTER", "SHOW", "DESCRIBE", "EXPLAIN", "LIKE", "BETWEEN", "EXISTS",
];

fn whitespace_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex is valid"))
}

fn string_literal_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r#"'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*""#).expect("string literal regex is valid"))
}

fn numeric_literal_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\b\d+(?:\.\d+)?\b").expect("numeric literal regex is valid"))
}

fn word_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("word regex is valid"))
}

/// Canonicalizes SQL text so that reads differing only in whitespace,
/// keyword case, or literal values share a fingerprint: collapses runs of
/// whitespace to a single space, upper-cases recognized keywords, and
/// replaces string/numeric literals with a `?` placeholder.
#[must_use]
pub fn canonicalize_sql(sql: &str) -> String {
    let placeholdered = string_literal_regex().replace_all(sql, "?");
    let placeholdered = numeric_literal_regex().replace_all(&placeholdered, "?");
    let folded = word_regex().replace_all(&placeholdered, |caps: &regex::Captures| {
        let word = &caps[0];
        let upper = word.to_ascii_uppercase();
        if KEYWORDS.contains(&upper.as_str()) {
            upper
        } else {
            word.to_string()
        }
    });
    whitespace_regex().replace_all(folded.trim(), " ").into_owned()
}

/// Canonical fingerprint of a tool name plus its arguments.
///
/// When `args` carries a `sql` string field, that field is canonicalized
/// before hashing (see [`canonicalize_sql`]) so semantically identical
/// queries share a cache entry regardless of formatting. Every other
/// argument is hashed verbatim: `serde_json::Value` objects serialize
/// their keys in sorted order (the crate's default map representation is
/// a `BTreeMap` unless the `preserve_order` feature is enabled, which this
/// workspace does not use), so argument key ordering does not affect the
/// hash.
#[must_use]
pub fn fingerprint(tool: &str, args: &Value) -> String {
    let mut normalized = args.clone();
    if let Some(sql) = normalized.get("sql").and_then(Value::as_str).map(canonicalize_sql) {
        normalized["sql"] = Value::String(sql);
    }
    let canonical = serde_json::to_string(&normalized).unwrap_or_default();
    let combined = format!("{tool}:{canonical}");
    let mut hasher = Sha256::new();
    hasher.update(combined.as_bytes());
    hex::encode(hasher.finalize())
}

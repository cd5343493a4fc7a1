//! Classified error taxonomy for the MySQL tool gateway.
//!
//! Every error that crosses a component boundary in this workspace is a
//! [`ClassifiedError`]: a category drawn from a closed enumeration, a
//! severity used for retry gating and alerting, a human message, and an
//! optional context bag. Nothing downstream ever matches on a raw driver
//! error or a bare string.

mod mask;

use std::collections::HashMap;
use std::fmt;

pub use mask::Masked;
use thiserror::Error;

/// Result type alias used throughout the gateway crates.
pub type Result<T> = std::result::Result<T, ClassifiedError>;

/// Closed set of error categories. New variants should be added here, not
/// invented ad hoc at call sites — the retry engine and alerting both match
/// exhaustively against this enum's semantics (via `category`/`severity`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    AccessDenied,
    ObjectNotFound,
    ConstraintViolation,
    SyntaxError,
    ConnectionError,
    TimeoutError,
    NetworkError,
    Deadlock,
    LockWaitTimeout,
    RateLimit,
    SecurityViolation,
    ValidationError,
    ResourceExhausted,
    QueryInterrupted,
    ServerGone,
    SslError,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Severity used for retry gating (a `Fatal` error is never retried) and for
/// deciding whether an error should raise an `error_occurred` alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
    Fatal,
}

/// A classified, structured error.
///
/// `context` never carries secret values — callers are responsible for
/// wrapping anything sensitive in [`Masked`] before inserting it, but as a
/// last line of defense nothing in this crate ever formats a raw password.
#[derive(Debug, Error, Clone)]
#[error("{category}: {message}")]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    pub driver_code: Option<u16>,
    pub context: HashMap<String, String>,
}

impl ClassifiedError {
    /// Build a new classified error with an empty context bag.
    pub fn new(category: ErrorCategory, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            message: message.into(),
            driver_code: None,
            context: HashMap::new(),
        }
    }

    /// Attach a context key/value, returning `self` for chaining.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Attach the originating driver error code.
    #[must_use]
    pub fn with_driver_code(mut self, code: u16) -> Self {
        self.driver_code = Some(code);
        self
    }

    pub fn validation(message: impl Into<String>, field: &str) -> Self {
        Self::new(ErrorCategory::ValidationError, Severity::Low, message).with_context("field", field)
    }

    pub fn security_violation(message: impl Into<String>, field: &str) -> Self {
        Self::new(ErrorCategory::SecurityViolation, Severity::High, message).with_context("field", field)
    }

    pub fn rate_limited(identifier: &str) -> Self {
        Self::new(
            ErrorCategory::RateLimit,
            Severity::Low,
            "rate limit exceeded",
        )
        .with_context("identifier", identifier)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::ResourceExhausted, Severity::High, message)
    }

    /// `true` when the retry engine must stop after exactly one attempt
    /// regardless of strategy (§8 invariant: FATAL severity ⇒ one attempt).
    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

/// Maps a MySQL driver error code onto a [`ErrorCategory`] per the table in
/// the specification's error-handling section.
pub fn category_from_driver_code(code: u16) -> ErrorCategory {
    match code {
        1045 => ErrorCategory::AccessDenied,
        1213 => ErrorCategory::Deadlock,
        2006 => ErrorCategory::ServerGone,
        2013 => ErrorCategory::ConnectionError,
        1205 => ErrorCategory::LockWaitTimeout,
        1317 => ErrorCategory::QueryInterrupted,
        2026 => ErrorCategory::SslError,
        1049 | 1146 | 1054 => ErrorCategory::ObjectNotFound,
        1062 => ErrorCategory::ConstraintViolation,
        1064 => ErrorCategory::SyntaxError,
        _ => ErrorCategory::Unknown,
    }
}

fn severity_for_category(category: ErrorCategory) -> Severity {
    match category {
        ErrorCategory::AccessDenied | ErrorCategory::SecurityViolation => Severity::High,
        ErrorCategory::ServerGone | ErrorCategory::ResourceExhausted => Severity::Critical,
        ErrorCategory::ValidationError | ErrorCategory::RateLimit => Severity::Low,
        ErrorCategory::Deadlock
        | ErrorCategory::LockWaitTimeout
        | ErrorCategory::ConnectionError
        | ErrorCategory::TimeoutError
        | ErrorCategory::NetworkError
        | ErrorCategory::SslError => Severity::Medium,
        _ => Severity::Medium,
    }
}

impl From<sqlx::Error> for ClassifiedError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            let code: Option<u16> = db_err.code().and_then(|c| c.parse().ok());
            if let Some(code) = code {
                let category = category_from_driver_code(code);
                return ClassifiedError::new(category, severity_for_category(category), db_err.message().to_string())
                    .with_driver_code(code);
            }
        }
        match &err {
            sqlx::Error::PoolTimedOut => ClassifiedError::new(
                ErrorCategory::ResourceExhausted,
                Severity::High,
                "connection pool acquire timed out",
            ),
            sqlx::Error::PoolClosed => ClassifiedError::new(
                ErrorCategory::ConnectionError,
                Severity::Critical,
                "connection pool is closed",
            ),
            sqlx::Error::Io(e) => {
                ClassifiedError::new(ErrorCategory::NetworkError, Severity::Medium, e.to_string())
            }
            other => ClassifiedError::new(ErrorCategory::Unknown, Severity::Medium, other.to_string()),
        }
    }
}

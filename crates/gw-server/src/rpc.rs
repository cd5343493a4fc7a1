//! JSON-RPC 2.0 message shapes for the stdio transport, plus the
//! category-to-code mapping used when a [`ClassifiedError`] crosses the
//! wire.

use gw_error::{ClassifiedError, ErrorCategory};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    #[must_use]
    pub fn ok(id: Value, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    #[must_use]
    pub fn err(id: Value, error: RpcError) -> Self {
        Self { jsonrpc: "2.0", id, result: None, error: Some(error) }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Server-initiated message with no `id` — a JSON-RPC 2.0 notification.
#[derive(Debug, Clone, Serialize)]
pub struct RpcNotification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: Value,
}

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;

/// Implementation-defined server-error range (`-32000`..`-32099`), one code
/// per [`ErrorCategory`] so a client can branch on `code` without parsing
/// `message`.
#[must_use]
pub fn code_for_category(category: ErrorCategory) -> i32 {
    match category {
        ErrorCategory::Unknown => -32000,
        ErrorCategory::ValidationError => -32001,
        ErrorCategory::AccessDenied => -32002,
        ErrorCategory::RateLimit => -32003,
        ErrorCategory::ResourceExhausted => -32004,
        ErrorCategory::SecurityViolation => -32005,
        ErrorCategory::ConnectionError => -32006,
        ErrorCategory::TimeoutError => -32007,
        ErrorCategory::NetworkError => -32008,
        ErrorCategory::Deadlock => -32009,
        ErrorCategory::LockWaitTimeout => -32010,
        ErrorCategory::QueryInterrupted => -32011,
        ErrorCategory::ServerGone => -32012,
        ErrorCategory::SslError => -32013,
        ErrorCategory::ObjectNotFound => -32014,
        ErrorCategory::ConstraintViolation => -32015,
        ErrorCategory::SyntaxError => -32016,
    }
}

impl From<&ClassifiedError> for RpcError {
    fn from(e: &ClassifiedError) -> Self {
        let data = (!e.context.is_empty())
            .then(|| serde_json::to_value(&e.context).unwrap_or(Value::Null));
        Self { code: code_for_category(e.category), message: e.message.clone(), data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_category_gets_a_distinct_server_error_code() {
        let categories = [
            ErrorCategory::Unknown,
            ErrorCategory::ValidationError,
            ErrorCategory::AccessDenied,
            ErrorCategory::RateLimit,
            ErrorCategory::ResourceExhausted,
            ErrorCategory::SecurityViolation,
            ErrorCategory::ConnectionError,
            ErrorCategory::TimeoutError,
            ErrorCategory::NetworkError,
            ErrorCategory::Deadlock,
            ErrorCategory::LockWaitTimeout,
            ErrorCategory::QueryInterrupted,
            ErrorCategory::ServerGone,
            ErrorCategory::SslError,
            ErrorCategory::ObjectNotFound,
            ErrorCategory::ConstraintViolation,
            ErrorCategory::SyntaxError,
        ];
        let mut codes: Vec<i32> = categories.iter().copied().map(code_for_category).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), categories.len());
        assert!(codes.iter().all(|c| (-32099..=-32000).contains(c)));
    }

    #[test]
    fn classified_error_with_context_carries_data() {
        let e = ClassifiedError::validation("bad field", "sql");
        let rpc: RpcError = (&e).into();
        assert!(rpc.data.is_some());
    }
}

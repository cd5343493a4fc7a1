//! Maps a JSON-RPC method call onto a `Gateway` operation.

use gw_orchestrator::{Gateway, ToolKind};
use gw_scheduler::TaskStatus;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::rpc::{self, RpcError};

const DEFAULT_PRINCIPAL: &str = "anonymous";

pub async fn dispatch(
    gateway: &Gateway,
    method: &str,
    params: Value,
    cancel: &CancellationToken,
) -> Result<Value, RpcError> {
    match method {
        "tools/call" => tools_call(gateway, params, cancel).await,
        "tasks/status" => tasks_status(gateway, params).await,
        "tasks/cancel" => tasks_cancel(gateway, params).await,
        "diagnostics" => Ok(gateway.diagnostics().await),
        other => Err(RpcError {
            code: rpc::METHOD_NOT_FOUND,
            message: format!("unknown method '{other}'"),
            data: None,
        }),
    }
}

async fn tools_call(gateway: &Gateway, params: Value, cancel: &CancellationToken) -> Result<Value, RpcError> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid_params("params.name must be a string"))?;
    let tool = ToolKind::from_name(name).ok_or_else(|| invalid_params(&format!("unknown tool '{name}'")))?;
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| serde_json::json!({}));
    let principal = params.get("principal").and_then(Value::as_str).unwrap_or(DEFAULT_PRINCIPAL);

    if tool.is_long_running() {
        let task_id = gateway
            .submit_task(tool, arguments, principal)
            .await
            .map_err(|e| RpcError::from(&e))?;
        return Ok(serde_json::json!({ "taskId": task_id }));
    }

    gateway
        .execute_cancellable(tool, arguments, principal, cancel)
        .await
        .map_err(|e| RpcError::from(&e))
}

async fn tasks_status(gateway: &Gateway, params: Value) -> Result<Value, RpcError> {
    let task_id = params
        .get("taskId")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid_params("params.taskId must be a string"))?;
    match gateway.scheduler().status(task_id).await {
        Some(status) => Ok(serde_json::json!({ "taskId": task_id, "status": status_label(status) })),
        None => Err(RpcError { code: rpc::INVALID_PARAMS, message: format!("unknown task '{task_id}'"), data: None }),
    }
}

async fn tasks_cancel(gateway: &Gateway, params: Value) -> Result<Value, RpcError> {
    let task_id = params
        .get("taskId")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid_params("params.taskId must be a string"))?;
    let cancelled = gateway.scheduler().cancel(task_id).await;
    Ok(serde_json::json!({ "taskId": task_id, "cancelled": cancelled }))
}

fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Queued => "queued",
        TaskStatus::Running => "running",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Cancelled => "cancelled",
    }
}

fn invalid_params(message: &str) -> RpcError {
    RpcError { code: rpc::INVALID_PARAMS, message: message.to_string(), data: None }
}

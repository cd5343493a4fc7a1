//! Relays C10 progress events onto the stdio transport as server-initiated
//! JSON-RPC notifications.

use std::sync::Arc;

use gw_scheduler::{ProgressEvent, Stage, TaskScheduler};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::rpc::RpcNotification;

pub async fn relay(scheduler: Arc<TaskScheduler>, outgoing: mpsc::UnboundedSender<String>) {
    let mut rx = scheduler.subscribe_progress();
    loop {
        match rx.recv().await {
            Ok(event) => {
                let notification = to_notification(&event);
                match serde_json::to_string(&notification) {
                    Ok(line) => {
                        // The writer task may have already shut down; a
                        // send failure here just means nobody is listening.
                        let _ = outgoing.send(line);
                    }
                    Err(e) => warn!(error = %e, "failed to serialize progress notification"),
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "progress relay lagged; some updates were dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn to_notification(event: &ProgressEvent) -> RpcNotification {
    let progress = event.total_rows.filter(|&t| t > 0).map(|t| event.processed_rows as f64 / t as f64);
    RpcNotification {
        jsonrpc: "2.0",
        method: "tasks/progress",
        params: serde_json::json!({
            "taskId": event.task_id,
            "stage": stage_label(event.stage),
            "progress": progress,
            "processedRows": event.processed_rows,
            "totalRows": event.total_rows,
            "etaMs": event.eta_ms,
            "currentSpeed": event.speed,
        }),
    }
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Preparing => "preparing",
        Stage::Dumping => "dumping",
        Stage::Writing => "writing",
        Stage::Verifying => "verifying",
        Stage::Completed => "completed",
        Stage::Error => "error",
    }
}

//! Task records, ordering, and progress events.

use std::cmp::Ordering;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{SystemTime, UNIX_EPOCH};

use gw_error::ClassifiedError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Backup,
    Import,
    Export,
    Report,
}

impl TaskType {
    pub fn label(self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Import => "import",
            Self::Export => "export",
            Self::Report => "report",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Preparing,
    Dumping,
    Writing,
    Verifying,
    Completed,
    Error,
}

/// A server-initiated progress notification, shaped per the transport's
/// streaming-progress contract.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub task_id: String,
    pub stage: Stage,
    pub processed_rows: u64,
    pub total_rows: Option<u64>,
    pub speed: f64,
    pub eta_ms: Option<u64>,
}

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn next_task_id(task_type: TaskType) -> String {
    let seq = SEQUENCE.fetch_add(1, AtomicOrdering::Relaxed);
    let epoch_ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
    format!("{}_{}_{}", task_type.label(), seq, epoch_ms)
}

/// Outcome a completed/failed/cancelled task leaves behind.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Result(Value),
    Error(ClassifiedError),
    Cancelled,
}

pub type TaskThunk = Box<
    dyn FnOnce(String, CancellationToken, broadcast::Sender<ProgressEvent>) -> Pin<Box<dyn Future<Output = gw_error::Result<Value>> + Send>>
        + Send,
>;

pub struct TaskRecord {
    pub id: String,
    pub task_type: TaskType,
    pub priority: i64,
    pub status: TaskStatus,
    pub submitted_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
    pub outcome: Option<TaskOutcome>,
    pub cancel: CancellationToken,
    pub sequence: u64,
    pub(crate) thunk: Option<TaskThunk>,
}

impl TaskRecord {
    pub fn new(task_type: TaskType, priority: i64, thunk: TaskThunk) -> Self {
        let id = next_task_id(task_type);
        let sequence = SEQUENCE.load(AtomicOrdering::Relaxed);
        Self {
            id,
            task_type,
            priority,
            status: TaskStatus::Queued,
            submitted_at: SystemTime::now(),
            started_at: None,
            finished_at: None,
            outcome: None,
            cancel: CancellationToken::new(),
            sequence,
            thunk: Some(thunk),
        }
    }
}

/// Orders queued tasks strictly by `(priority desc, submitted_at asc)`,
/// with `sequence` as a tie-breaker so equal-priority, equal-instant
/// submissions preserve FIFO order.
#[derive(Clone)]
pub struct QueueKey {
    pub id: String,
    pub priority: i64,
    pub submitted_at: SystemTime,
    pub sequence: u64,
}

impl PartialEq for QueueKey {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for QueueKey {}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; higher priority must compare greater,
        // and for equal priority, the earlier submission must compare
        // greater (so it is popped first).
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.submitted_at.cmp(&self.submitted_at))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_sorts_first() {
        let now = SystemTime::now();
        let low = QueueKey { id: "a".into(), priority: 1, submitted_at: now, sequence: 0 };
        let high = QueueKey { id: "b".into(), priority: 5, submitted_at: now, sequence: 1 };
        assert!(high > low);
    }

    #[test]
    fn equal_priority_earlier_submission_sorts_first() {
        let earlier = SystemTime::now();
        let later = earlier + std::time::Duration::from_secs(1);
        let first = QueueKey { id: "a".into(), priority: 1, submitted_at: earlier, sequence: 0 };
        let second = QueueKey { id: "b".into(), priority: 1, submitted_at: later, sequence: 1 };
        assert!(first > second);
    }

    #[test]
    fn task_id_format_has_three_underscore_separated_parts() {
        let id = next_task_id(TaskType::Backup);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "backup");
    }
}

//! C10 — priority task scheduler for long-running backup/import/export/
//! report jobs, so the synchronous tool channel stays responsive.

pub mod task;

pub use task::{ProgressEvent, Stage, TaskOutcome, TaskRecord, TaskStatus, TaskThunk, TaskType};

use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use task::QueueKey;
use tokio::sync::{broadcast, Mutex, Notify};

const PROGRESS_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SchedulerStats {
    pub total: u64,
    pub queued: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub max_concurrent: usize,
    /// Total task count broken down by [`TaskType`] label (`"backup"`, …).
    pub by_type: HashMap<String, u64>,
}

struct Inner {
    heap: BinaryHeap<QueueKey>,
    records: HashMap<String, TaskRecord>,
    running: usize,
    paused: bool,
}

pub struct TaskScheduler {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
    progress_tx: broadcast::Sender<ProgressEvent>,
    base_max_concurrent: usize,
    /// Fixed-point pressure scalar (`pressure * 1000`), read on the hot
    /// dispatch path without locking.
    pressure_milli: Arc<AtomicU64>,
}

impl TaskScheduler {
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        let (progress_tx, _rx) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        let scheduler = Self {
            inner: Arc::new(Mutex::new(Inner {
                heap: BinaryHeap::new(),
                records: HashMap::new(),
                running: 0,
                paused: false,
            })),
            notify: Arc::new(Notify::new()),
            progress_tx,
            base_max_concurrent: max_concurrent.max(1),
            pressure_milli: Arc::new(AtomicU64::new(0)),
        };
        scheduler.spawn_dispatch_loop();
        scheduler
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress_tx.subscribe()
    }

    /// Update the memory-pressure scalar driving `effective_max_concurrent`.
    pub fn update_pressure(&self, pressure: f64) {
        let clamped = pressure.clamp(0.0, 1.0);
        self.pressure_milli.store((clamped * 1000.0) as u64, Ordering::Relaxed);
    }

    fn effective_max_concurrent(&self) -> usize {
        let pressure = self.pressure_milli.load(Ordering::Relaxed) as f64 / 1000.0;
        let scaled = self.base_max_concurrent as f64 * (1.0 - pressure * 0.5);
        (scaled.floor() as usize).max(1)
    }

    /// Enqueue a task, returning its assigned id.
    pub async fn submit(&self, task_type: TaskType, priority: i64, thunk: TaskThunk) -> String {
        let record = TaskRecord::new(task_type, priority, thunk);
        let id = record.id.clone();
        let key = QueueKey {
            id: id.clone(),
            priority: record.priority,
            submitted_at: record.submitted_at,
            sequence: record.sequence,
        };
        let mut inner = self.inner.lock().await;
        inner.records.insert(id.clone(), record);
        inner.heap.push(key);
        drop(inner);
        self.notify.notify_one();
        id
    }

    /// Cancel a task. Queued tasks are marked cancelled without running;
    /// running tasks have their cancellation signal raised (the
    /// transition to `Cancelled` happens once the thunk observes it).
    /// Returns `false` for an unknown id.
    pub async fn cancel(&self, task_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.records.get_mut(task_id) else {
            return false;
        };
        match record.status {
            TaskStatus::Queued => {
                record.status = TaskStatus::Cancelled;
                record.finished_at = Some(SystemTime::now());
                record.outcome = Some(TaskOutcome::Cancelled);
                true
            }
            TaskStatus::Running => {
                record.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Cancel every queued (not yet running) task without touching tasks
    /// already running. Returns the number cancelled. Used on shutdown to
    /// stop admitting new work before draining what's already in flight.
    pub async fn cancel_all_queued(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let mut cancelled = 0;
        for record in inner.records.values_mut() {
            if record.status == TaskStatus::Queued {
                record.status = TaskStatus::Cancelled;
                record.finished_at = Some(SystemTime::now());
                record.outcome = Some(TaskOutcome::Cancelled);
                cancelled += 1;
            }
        }
        cancelled
    }

    pub async fn pause(&self) {
        self.inner.lock().await.paused = true;
    }

    pub async fn resume(&self) {
        self.inner.lock().await.paused = false;
        self.notify.notify_one();
    }

    pub async fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.inner.lock().await.records.get(task_id).map(|r| r.status)
    }

    pub async fn stats(&self) -> SchedulerStats {
        let inner = self.inner.lock().await;
        let mut stats = SchedulerStats { max_concurrent: self.effective_max_concurrent(), ..SchedulerStats::default() };
        for record in inner.records.values() {
            stats.total += 1;
            match record.status {
                TaskStatus::Queued => stats.queued += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
            *stats.by_type.entry(record.task_type.label().to_string()).or_insert(0) += 1;
        }
        stats
    }

    fn spawn_dispatch_loop(&self) {
        let inner = Arc::clone(&self.inner);
        let notify = Arc::clone(&self.notify);
        let progress_tx = self.progress_tx.clone();
        let pressure_milli = Arc::clone(&self.pressure_milli);
        let base_max_concurrent = self.base_max_concurrent;

        tokio::spawn(async move {
            loop {
                notify.notified().await;
                loop {
                    let next = {
                        let mut guard = inner.lock().await;
                        if guard.paused {
                            break;
                        }
                        let pressure = pressure_milli.load(Ordering::Relaxed) as f64 / 1000.0;
                        let effective = ((base_max_concurrent as f64) * (1.0 - pressure * 0.5)).floor().max(1.0) as usize;
                        if guard.running >= effective {
                            break;
                        }
                        let mut popped = None;
                        while let Some(key) = guard.heap.pop() {
                            let still_queued =
                                guard.records.get(&key.id).map(|r| r.status == TaskStatus::Queued).unwrap_or(false);
                            if still_queued {
                                popped = Some(key.id);
                                break;
                            }
                        }
                        popped
                    };

                    let Some(task_id) = next else {
                        break;
                    };

                    let (thunk, cancel) = {
                        let mut guard = inner.lock().await;
                        guard.running += 1;
                        let record = guard.records.get_mut(&task_id).expect("record exists for popped id");
                        record.status = TaskStatus::Running;
                        record.started_at = Some(SystemTime::now());
                        (record.thunk.take(), record.cancel.clone())
                    };

                    let Some(thunk) = thunk else { continue };
                    let inner_for_task = Arc::clone(&inner);
                    let notify_for_task = Arc::clone(&notify);
                    let progress_tx_for_task = progress_tx.clone();

                    tokio::spawn(async move {
                        let result = thunk(task_id.clone(), cancel.clone(), progress_tx_for_task).await;
                        let mut guard = inner_for_task.lock().await;
                        guard.running = guard.running.saturating_sub(1);
                        if let Some(record) = guard.records.get_mut(&task_id) {
                            record.finished_at = Some(SystemTime::now());
                            if cancel.is_cancelled() {
                                record.status = TaskStatus::Cancelled;
                                record.outcome = Some(TaskOutcome::Cancelled);
                            } else {
                                match result {
                                    Ok(value) => {
                                        record.status = TaskStatus::Completed;
                                        record.outcome = Some(TaskOutcome::Result(value));
                                    }
                                    Err(e) => {
                                        record.status = TaskStatus::Failed;
                                        record.outcome = Some(TaskOutcome::Error(e));
                                    }
                                }
                            }
                        }
                        drop(guard);
                        notify_for_task.notify_one();
                    });
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn immediate_thunk(value: serde_json::Value) -> TaskThunk {
        Box::new(move |_id, _cancel, _tx| Box::pin(async move { Ok(value) }))
    }

    #[tokio::test]
    async fn submitted_task_eventually_completes() {
        let scheduler = TaskScheduler::new(2);
        let id = scheduler.submit(TaskType::Export, 1, immediate_thunk(json!({"ok": true}))).await;
        for _ in 0..50 {
            if scheduler.status(&id).await == Some(TaskStatus::Completed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(scheduler.status(&id).await, Some(TaskStatus::Completed));
    }

    #[tokio::test]
    async fn cancel_queued_task_marks_it_cancelled_without_running() {
        let scheduler = TaskScheduler::new(0); // effective_max_concurrent floors to 1, but pause keeps it queued
        scheduler.pause().await;
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        let thunk: TaskThunk = Box::new(move |_id, _cancel, _tx| {
            ran_clone.store(true, Ordering::SeqCst);
            Box::pin(async move { Ok(json!(null)) })
        });
        let id = scheduler.submit(TaskType::Backup, 1, thunk).await;
        assert!(scheduler.cancel(&id).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(scheduler.status(&id).await, Some(TaskStatus::Cancelled));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_unknown_task_returns_false() {
        let scheduler = TaskScheduler::new(1);
        assert!(!scheduler.cancel("nope").await);
    }

    #[tokio::test]
    async fn cancel_all_queued_leaves_running_tasks_alone() {
        let scheduler = TaskScheduler::new(1);
        scheduler.pause().await;
        let id1 = scheduler.submit(TaskType::Backup, 1, immediate_thunk(json!(1))).await;
        let id2 = scheduler.submit(TaskType::Export, 1, immediate_thunk(json!(2))).await;
        let cancelled = scheduler.cancel_all_queued().await;
        assert_eq!(cancelled, 2);
        assert_eq!(scheduler.status(&id1).await, Some(TaskStatus::Cancelled));
        assert_eq!(scheduler.status(&id2).await, Some(TaskStatus::Cancelled));
    }

    #[tokio::test]
    async fn stats_counts_by_status() {
        let scheduler = TaskScheduler::new(2);
        let id1 = scheduler.submit(TaskType::Export, 1, immediate_thunk(json!(1))).await;
        let _id2 = scheduler.submit(TaskType::Report, 1, immediate_thunk(json!(2))).await;
        for _ in 0..50 {
            if scheduler.status(&id1).await == Some(TaskStatus::Completed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let stats = scheduler.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_type.get("export"), Some(&1));
        assert_eq!(stats.by_type.get("report"), Some(&1));
    }

    #[tokio::test]
    async fn pressure_reduces_effective_max_concurrent() {
        let scheduler = TaskScheduler::new(10);
        scheduler.update_pressure(1.0);
        assert_eq!(scheduler.effective_max_concurrent(), 5);
        scheduler.update_pressure(0.0);
        assert_eq!(scheduler.effective_max_concurrent(), 10);
    }
}

//! Recovery / audit event log — append-only, one JSON object per line.
//!
//! Shared by `gw-pool` (recovery transitions) and `gw-scheduler` (task
//! lifecycle, if a caller wants it audited), so it lives alongside the
//! metrics store rather than inside either component.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use gw_error::Severity;
use serde::Serialize;

/// One append-only event record.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryEvent {
    pub timestamp: String,
    pub kind: String,
    pub severity: Severity,
    pub context: HashMap<String, String>,
}

impl RecoveryEvent {
    pub fn new(kind: impl Into<String>, severity: Severity) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            kind: kind.into(),
            severity,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Append-only event log sink. Implementations must never block the
/// caller for long — pool recovery and task lifecycle transitions happen
/// on latency-sensitive paths.
pub trait EventLog: Send + Sync {
    fn append(&self, event: RecoveryEvent);

    /// Snapshot of all events appended so far, most recent last. Intended
    /// for tests and diagnostics, not production hot paths.
    fn events(&self) -> Vec<RecoveryEvent>;
}

/// File-backed event log: one JSON object per line, matching §6's
/// "Persisted state" format.
pub struct FileEventLog {
    file: Mutex<std::fs::File>,
    mirror: Mutex<Vec<RecoveryEvent>>,
}

impl FileEventLog {
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path.into())?;
        Ok(Self {
            file: Mutex::new(file),
            mirror: Mutex::new(Vec::new()),
        })
    }
}

impl EventLog for FileEventLog {
    fn append(&self, event: RecoveryEvent) {
        if let Ok(line) = serde_json::to_string(&event) {
            let mut file = self.file.lock().unwrap();
            let _ = writeln!(file, "{line}");
            let _ = file.flush();
        }
        self.mirror.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<RecoveryEvent> {
        self.mirror.lock().unwrap().clone()
    }
}

/// In-memory event log for tests and for callers that don't need
/// durability (e.g. an embedded gateway with no writable filesystem).
#[derive(Default)]
pub struct InMemoryEventLog {
    events: Mutex<Vec<RecoveryEvent>>,
}

impl EventLog for InMemoryEventLog {
    fn append(&self, event: RecoveryEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<RecoveryEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_log_preserves_append_order() {
        let log = InMemoryEventLog::default();
        log.append(RecoveryEvent::new("PRIMARY_RECOVERY", Severity::Medium));
        log.append(RecoveryEvent::new("CRITICAL_ALERT", Severity::Critical));
        let events = log.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, "PRIMARY_RECOVERY");
        assert_eq!(events[1].kind, "CRITICAL_ALERT");
    }

    #[test]
    fn file_log_writes_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        let log = FileEventLog::open(&path).unwrap();
        log.append(RecoveryEvent::new("VALIDATION", Severity::Low).with_context("strategy", "validation_query"));
        drop(log);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["kind"], "VALIDATION");
    }
}

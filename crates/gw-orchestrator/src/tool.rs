//! Tool catalog: the representative handlers this repository ships
//! (`query`, `execute`, `show_tables`, `backup`, `export`, `import`) and
//! the per-tool policy — permission, cacheability, retry strategy — that
//! drives the orchestrator's `execute()` pipeline. A production deployment
//! adds more handlers without touching the pipeline itself.

use gw_retry::Strategy;
use gw_scheduler::TaskType;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Query,
    Execute,
    ShowTables,
    Backup,
    Export,
    Import,
}

impl ToolKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Execute => "execute",
            Self::ShowTables => "show_tables",
            Self::Backup => "backup",
            Self::Export => "export",
            Self::Import => "import",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "query" => Some(Self::Query),
            "execute" => Some(Self::Execute),
            "show_tables" => Some(Self::ShowTables),
            "backup" => Some(Self::Backup),
            "export" => Some(Self::Export),
            "import" => Some(Self::Import),
            _ => None,
        }
    }

    /// Read-shaped tools are the only ones eligible for the result cache.
    #[must_use]
    pub fn is_read_shaped(self) -> bool {
        matches!(self, Self::Query | Self::ShowTables | Self::Backup | Self::Export)
    }

    /// Long-running tools are routed through the scheduler (C10) and
    /// answered with a task id rather than a result.
    #[must_use]
    pub fn is_long_running(self) -> bool {
        matches!(self, Self::Backup | Self::Export | Self::Import)
    }

    /// Permission id checked against RBAC (C6) before anything else runs.
    #[must_use]
    pub fn permission(self) -> &'static str {
        match self {
            Self::Query | Self::ShowTables => "query:select",
            Self::Execute => "query:execute",
            Self::Backup => "task:backup",
            Self::Export => "task:export",
            Self::Import => "task:import",
        }
    }

    #[must_use]
    pub fn task_type(self) -> Option<TaskType> {
        match self {
            Self::Backup => Some(TaskType::Backup),
            Self::Export => Some(TaskType::Export),
            Self::Import => Some(TaskType::Import),
            Self::Query | Self::Execute | Self::ShowTables => None,
        }
    }
}

/// Choose a retry strategy by tool type and, for `execute`, the leading
/// SQL verb — DDL gets fewer attempts than a transactional write.
#[must_use]
pub fn strategy_for(tool: ToolKind, args: &Value) -> Strategy {
    match tool {
        ToolKind::Query | ToolKind::ShowTables | ToolKind::Backup | ToolKind::Export => Strategy::read(),
        ToolKind::Execute => {
            let sql = args.get("sql").and_then(Value::as_str).unwrap_or_default();
            if is_ddl(sql) {
                Strategy::ddl()
            } else {
                Strategy::transactional_write()
            }
        }
        ToolKind::Import => Strategy::transactional_write(),
    }
}

#[must_use]
pub fn is_ddl(sql: &str) -> bool {
    let verb = sql.trim_start().split_whitespace().next().unwrap_or_default().to_ascii_uppercase();
    matches!(verb.as_str(), "CREATE" | "DROP" | "ALTER" | "TRUNCATE")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn execute_ddl_uses_the_ddl_strategy() {
        let strategy = strategy_for(ToolKind::Execute, &json!({"sql": "CREATE TABLE t (id INT)"}));
        assert_eq!(strategy.max_attempts, 1);
    }

    #[test]
    fn execute_dml_uses_transactional_write_strategy() {
        let strategy = strategy_for(ToolKind::Execute, &json!({"sql": "UPDATE t SET x=1"}));
        assert_eq!(strategy.max_attempts, 4);
    }

    #[test]
    fn long_running_tools_are_not_cacheable_inline() {
        assert!(ToolKind::Backup.is_long_running());
        assert!(!(ToolKind::Backup.is_read_shaped() && !ToolKind::Backup.is_long_running()));
    }

    #[test]
    fn tool_name_round_trips_through_from_name() {
        for tool in [ToolKind::Query, ToolKind::Execute, ToolKind::ShowTables, ToolKind::Backup, ToolKind::Export, ToolKind::Import] {
            assert_eq!(ToolKind::from_name(tool.name()), Some(tool));
        }
    }
}

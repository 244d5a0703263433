use serde::{Deserialize, Serialize};

use crate::record::ScanTaskRecord;

/// Row operation for the live "currently running tasks" table.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableOp {
    Create,
    Remove,
}

/// One create/remove delta for the client's active-task table, keyed by the
/// dispatch-order task index.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskTableDelta {
    pub op: TableOp,
    pub index: u64,
    pub url: String,
    pub is_https: bool,
    pub request: Vec<u8>,
    pub plugin: String,
}

/// Raw execution-engine output attributed to the plugin that produced it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineEvent {
    pub plugin: String,
    pub payload: serde_json::Value,
}

impl EngineEvent {
    pub fn new(plugin: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            plugin: plugin.into(),
            payload,
        }
    }
}

/// Point-in-time progress readout pushed over the control channel.
///
/// At most one of `active_task_update` / `scan_result` is set per message:
/// a plain snapshot carries neither, a table delta the former, an embedded
/// engine result the latter.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusUpdate {
    pub hybrid_scan_task_id: String,
    pub total_targets: u64,
    pub total_plugins: u64,
    pub total_tasks: u64,
    pub finished_targets: u64,
    pub finished_tasks: u64,
    pub active_targets: u64,
    pub active_tasks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_task_update: Option<TaskTableDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_result: Option<EngineEvent>,
}

impl StatusUpdate {
    /// Snapshot built straight from a durable record, used when reporting
    /// on a task that is not live in this process.
    pub fn from_record(record: &ScanTaskRecord) -> Self {
        Self {
            hybrid_scan_task_id: record.task_id.to_string(),
            total_targets: record.total_targets,
            total_plugins: record.total_plugins,
            total_tasks: record.total_tasks,
            finished_targets: record.finished_targets,
            finished_tasks: record.finished_tasks,
            active_targets: 0,
            active_tasks: 0,
            active_task_update: None,
            scan_result: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ScanTaskId;

    #[test]
    fn status_fields_use_wire_names() {
        let record = ScanTaskRecord::new(ScanTaskId::new("t-1"));
        let update = StatusUpdate::from_record(&record);
        let json = serde_json::to_value(&update).unwrap();
        for key in [
            "HybridScanTaskId",
            "TotalTargets",
            "TotalPlugins",
            "TotalTasks",
            "FinishedTargets",
            "FinishedTasks",
            "ActiveTargets",
            "ActiveTasks",
        ] {
            assert!(json.get(key).is_some(), "missing wire field {key}");
        }
        assert!(json.get("ActiveTaskUpdate").is_none());
        assert!(json.get("ScanResult").is_none());
    }
}

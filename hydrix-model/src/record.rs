use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::ids::ScanTaskId;
use crate::target::ScanTarget;

/// Task lifecycle states. Done and Error are terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanTaskStatus {
    Executing,
    Paused,
    Done,
    Error,
}

impl ScanTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanTaskStatus::Executing => "executing",
            ScanTaskStatus::Paused => "paused",
            ScanTaskStatus::Done => "done",
            ScanTaskStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanTaskStatus::Done | ScanTaskStatus::Error)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    /// Paused may re-enter Executing when a resume restarts dispatch.
    pub fn accepts(&self, next: ScanTaskStatus) -> bool {
        match (self, next) {
            (ScanTaskStatus::Executing, ScanTaskStatus::Paused)
            | (ScanTaskStatus::Executing, ScanTaskStatus::Done)
            | (ScanTaskStatus::Executing, ScanTaskStatus::Error)
            | (ScanTaskStatus::Paused, ScanTaskStatus::Executing) => true,
            (current, requested) => *current == requested,
        }
    }
}

impl fmt::Display for ScanTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ScanTaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "executing" => Ok(ScanTaskStatus::Executing),
            "paused" => Ok(ScanTaskStatus::Paused),
            "done" => Ok(ScanTaskStatus::Done),
            "error" => Ok(ScanTaskStatus::Error),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Durable representation of one hybrid scan task.
///
/// `plugins` and `targets` are frozen after first population so a resumed
/// run replays exactly the original matrix instead of re-expanding input.
/// `survival_indexes` holds the indices dispatched but unfinished at the
/// last checkpoint; `dispatched_tasks` is the issue high-water mark, which
/// together make the set of already-finished indices well defined.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanTaskRecord {
    pub task_id: ScanTaskId,
    pub status: ScanTaskStatus,
    pub reason: Option<String>,
    pub plugins: Vec<String>,
    pub targets: Vec<ScanTarget>,
    pub survival_indexes: Vec<u64>,
    pub dispatched_tasks: u64,
    pub total_targets: u64,
    pub total_plugins: u64,
    pub total_tasks: u64,
    pub finished_targets: u64,
    pub finished_tasks: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScanTaskRecord {
    pub fn new(task_id: ScanTaskId) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            status: ScanTaskStatus::Executing,
            reason: None,
            plugins: Vec::new(),
            targets: Vec::new(),
            survival_indexes: Vec::new(),
            dispatched_tasks: 0,
            total_targets: 0,
            total_plugins: 0,
            total_tasks: 0,
            finished_targets: 0,
            finished_tasks: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Guarded status transition; terminal states never move again.
    pub fn advance(&mut self, next: ScanTaskStatus) -> Result<()> {
        if !self.status.accepts(next) {
            return Err(ModelError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    pub fn mark_error(&mut self, reason: impl Into<String>) -> Result<()> {
        self.reason = Some(reason.into());
        self.advance(ScanTaskStatus::Error)
    }

    /// Whether the target/plugin matrix has been recorded yet.
    pub fn is_frozen(&self) -> bool {
        !self.targets.is_empty() || !self.plugins.is_empty()
    }

    /// Records the materialized matrix. A no-op once frozen: resume must
    /// keep the original sets verbatim.
    pub fn freeze_inputs(&mut self, targets: &[ScanTarget], plugin_names: &[String]) {
        if self.is_frozen() {
            return;
        }
        self.targets = targets.to_vec();
        self.plugins = plugin_names.to_vec();
        self.total_targets = targets.len() as u64;
        self.total_plugins = plugin_names.len() as u64;
        self.total_tasks = self.total_targets * self.total_plugins;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

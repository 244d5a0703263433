use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable external identifier for one hybrid scan task.
///
/// Assigned once when the task is opened and reused verbatim on resume, so
/// it is string-typed rather than forcing callers onto our UUID scheme.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanTaskId(String);

impl Default for ScanTaskId {
    fn default() -> Self {
        Self::generate()
    }
}

impl ScanTaskId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ScanTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ScanTaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ScanTaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl AsRef<str> for ScanTaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

//! Core data model definitions shared across Hydrix crates.
#![allow(missing_docs)]

pub mod control;
pub mod error;
pub mod ids;
pub mod plugin;
pub mod record;
pub mod status;
pub mod target;

// Intentionally curated re-exports for downstream consumers.
pub use control::{ControlMessage, PluginConfig, PluginFilter, TargetConfig};
pub use error::{ModelError, Result as ModelResult};
pub use ids::ScanTaskId;
pub use plugin::{PluginDescriptor, PluginKind};
pub use record::{ScanTaskRecord, ScanTaskStatus};
pub use status::{EngineEvent, StatusUpdate, TableOp, TaskTableDelta};
pub use target::ScanTarget;

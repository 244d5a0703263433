use std::sync::Arc;

use async_trait::async_trait;
use hydrix_model::{EngineEvent, PluginDescriptor, ScanTarget, ScanTaskId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// One (target, plugin) pair handed to the engine, tagged with its
/// dispatch-order index.
#[derive(Clone, Debug)]
pub struct ExecTask {
    pub task_id: ScanTaskId,
    pub index: u64,
    pub target: Arc<ScanTarget>,
    pub plugin: Arc<PluginDescriptor>,
}

/// Executes a single (target, plugin) pair.
///
/// Implementations stream findings through `results` and should return
/// early when `cancel` fires. Errors are reported per pair; the
/// orchestrator logs them and keeps the rest of the matrix running.
#[async_trait]
pub trait ScanEngine: Send + Sync {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        task: &ExecTask,
        results: &mpsc::Sender<EngineEvent>,
    ) -> Result<()>;
}

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use hydrix_core::{Orchestrator, PluginCatalog, TaskManager, TaskStore};
use tokio_util::sync::CancellationToken;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TaskStore>,
    pub catalog: Arc<dyn PluginCatalog>,
    pub orchestrator: Arc<Orchestrator>,
    /// Live task managers keyed by task id. An entry exists while a
    /// scan task is executing or paused in this process.
    pub sessions: Arc<DashMap<String, Arc<TaskManager>>>,
    /// Root token cancelled on server shutdown.
    pub shutdown: CancellationToken,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

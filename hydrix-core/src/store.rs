use async_trait::async_trait;
use dashmap::DashMap;
use hydrix_model::{ScanTaskId, ScanTaskRecord};

use crate::error::Result;

/// Durable home of task records. Implementations must make `upsert`
/// atomic per record; the orchestrator serializes writes for one task but
/// different tasks write concurrently.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get(&self, task_id: &ScanTaskId) -> Result<Option<ScanTaskRecord>>;
    async fn upsert(&self, record: &ScanTaskRecord) -> Result<()>;
    async fn delete(&self, task_id: &ScanTaskId) -> Result<bool>;
}

/// In-memory store used in tests and when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    records: DashMap<String, ScanTaskRecord>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn get(&self, task_id: &ScanTaskId) -> Result<Option<ScanTaskRecord>> {
        Ok(self
            .records
            .get(task_id.as_str())
            .map(|entry| entry.value().clone()))
    }

    async fn upsert(&self, record: &ScanTaskRecord) -> Result<()> {
        self.records
            .insert(record.task_id.as_str().to_owned(), record.clone());
        Ok(())
    }

    async fn delete(&self, task_id: &ScanTaskId) -> Result<bool> {
        Ok(self.records.remove(task_id.as_str()).is_some())
    }
}

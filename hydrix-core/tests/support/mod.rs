//! Shared fakes for the orchestrator integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use hydrix_core::{
    ExecTask, JitterConfig, MemoryPluginCatalog, MemoryTaskStore, OrchestratorConfig,
    PluginCatalog, Result, ScanEngine, StatusSink, TaskStore,
};
use hydrix_model::{
    EngineEvent, PluginDescriptor, PluginKind, ScanTaskId, ScanTaskRecord, StatusUpdate, TableOp,
};
use tokio::sync::{Mutex as TokioMutex, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

/// Tight jitter so tests finish quickly while keeping the slot-hold path hot.
pub fn quick_config(concurrent: usize) -> OrchestratorConfig {
    OrchestratorConfig {
        concurrent,
        completion_jitter: JitterConfig {
            min_ms: 1,
            max_ms: 2,
        },
        result_buffer: 64,
    }
}

pub async fn seeded_catalog(names: &[&str]) -> Arc<MemoryPluginCatalog> {
    let catalog = Arc::new(MemoryPluginCatalog::new());
    for name in names {
        catalog
            .upsert(&PluginDescriptor::new(*name, PluginKind::HttpProbe, "{}"))
            .await
            .expect("seed plugin");
    }
    catalog
}

/// Polls `condition` every 10ms until it holds or `deadline` passes.
pub async fn wait_until<F>(deadline: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Status sink that records every update for later inspection.
#[derive(Clone, Default)]
pub struct CollectingSink {
    updates: Arc<TokioMutex<Vec<StatusUpdate>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn updates(&self) -> Vec<StatusUpdate> {
        self.updates.lock().await.clone()
    }

    pub async fn last(&self) -> Option<StatusUpdate> {
        self.updates.lock().await.last().cloned()
    }

    pub async fn table_rows(&self, op: TableOp) -> Vec<u64> {
        self.updates
            .lock()
            .await
            .iter()
            .filter_map(|update| update.active_task_update.as_ref())
            .filter(|delta| delta.op == op)
            .map(|delta| delta.index)
            .collect()
    }

    pub async fn result_count(&self) -> usize {
        self.updates
            .lock()
            .await
            .iter()
            .filter(|update| update.scan_result.is_some())
            .count()
    }
}

#[async_trait]
impl StatusSink for CollectingSink {
    async fn send(&self, update: StatusUpdate) -> Result<()> {
        self.updates.lock().await.push(update);
        Ok(())
    }
}

/// Engine that sleeps briefly per pair and tracks observed concurrency.
#[derive(Default)]
pub struct CountingEngine {
    delay_ms: u64,
    active: AtomicUsize,
    max_active: AtomicUsize,
    completions: AtomicUsize,
}

impl CountingEngine {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            ..Self::default()
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScanEngine for CountingEngine {
    async fn execute(
        &self,
        _cancel: &CancellationToken,
        task: &ExecTask,
        results: &mpsc::Sender<EngineEvent>,
    ) -> Result<()> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.completions.fetch_add(1, Ordering::SeqCst);
        let _ = results
            .send(EngineEvent::new(
                task.plugin.name.clone(),
                serde_json::json!({ "index": task.index, "url": task.target.url }),
            ))
            .await;
        Ok(())
    }
}

/// Engine whose pairs block on a gate until the test releases them (or the
/// task is cancelled). `release(n)` lets exactly n pairs finish.
pub struct GateEngine {
    started: AtomicUsize,
    gate: Semaphore,
}

impl GateEngine {
    pub fn new() -> Self {
        Self {
            started: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        }
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn release(&self, count: usize) {
        self.gate.add_permits(count);
    }
}

#[async_trait]
impl ScanEngine for GateEngine {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        _task: &ExecTask,
        _results: &mpsc::Sender<EngineEvent>,
    ) -> Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            permit = self.gate.acquire() => {
                if let Ok(permit) = permit {
                    permit.forget();
                }
            }
            _ = cancel.cancelled() => {}
        }
        Ok(())
    }
}

/// Engine that fails or panics on a fixed index pattern; everything else
/// succeeds. Exercises per-pair error containment.
pub struct FlakyEngine;

#[async_trait]
impl ScanEngine for FlakyEngine {
    async fn execute(
        &self,
        _cancel: &CancellationToken,
        task: &ExecTask,
        _results: &mpsc::Sender<EngineEvent>,
    ) -> Result<()> {
        match task.index % 3 {
            0 => Err(hydrix_core::ScanError::Internal(format!(
                "probe {} refused",
                task.index
            ))),
            1 => panic!("probe {} exploded", task.index),
            _ => Ok(()),
        }
    }
}

/// Store wrapper that panics on one configured upsert call, then behaves.
pub struct PanickingStore {
    inner: MemoryTaskStore,
    upserts: AtomicUsize,
    panic_at: usize,
    armed: AtomicBool,
}

impl PanickingStore {
    pub fn panicking_at(panic_at: usize) -> Self {
        Self {
            inner: MemoryTaskStore::new(),
            upserts: AtomicUsize::new(0),
            panic_at,
            armed: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl TaskStore for PanickingStore {
    async fn get(&self, task_id: &ScanTaskId) -> Result<Option<ScanTaskRecord>> {
        self.inner.get(task_id).await
    }

    async fn upsert(&self, record: &ScanTaskRecord) -> Result<()> {
        let call = self.upserts.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.panic_at && self.armed.swap(false, Ordering::SeqCst) {
            panic!("task store exploded");
        }
        self.inner.upsert(record).await
    }

    async fn delete(&self, task_id: &ScanTaskId) -> Result<bool> {
        self.inner.delete(task_id).await
    }
}

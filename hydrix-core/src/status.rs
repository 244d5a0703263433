use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use hydrix_model::{
    EngineEvent, PluginDescriptor, ScanTarget, ScanTaskId, StatusUpdate, TableOp,
    TaskTableDelta,
};
use tokio::sync::Mutex;

use crate::sink::StatusSink;

/// Point-in-time view of the live counters, clamped to any persisted floor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProgressCounts {
    pub total_targets: u64,
    pub total_plugins: u64,
    pub total_tasks: u64,
    pub finished_targets: u64,
    pub finished_tasks: u64,
    pub active_targets: u64,
    pub active_tasks: u64,
}

/// Seed installed before a resumed run so progress continues where the
/// previous run stopped instead of restarting from zero.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ProgressSeed {
    /// Pairs provably finished in earlier runs; primes the live counter.
    pub finished_tasks: u64,
    /// Targets whose whole fan-out finished in earlier runs.
    pub finished_targets: u64,
    /// Display floors taken from the durable record. Reported counts never
    /// drop below these even while the primed counters catch up.
    pub min_finished_tasks: u64,
    pub min_finished_targets: u64,
}

/// Thread-safe progress accounting for one hybrid scan task.
///
/// Holds no target/plugin business logic beyond counts; every worker shares
/// it through an `Arc` and mutates it lock-free. Totals are fixed at
/// construction and the dispatch counter is never reset. The in-flight set
/// tracks indices between `begin_task` and `finish_task`.
pub struct StatusManager {
    task_id: ScanTaskId,
    total_targets: u64,
    total_plugins: u64,
    active_targets: AtomicU64,
    finished_targets: AtomicU64,
    active_tasks: AtomicU64,
    finished_tasks: AtomicU64,
    issued: AtomicU64,
    min_finished_tasks: AtomicU64,
    min_finished_targets: AtomicU64,
    inflight: DashMap<u64, ()>,
    // Capture-and-send happens under this lock so the outbound stream is
    // totally ordered: a frame with a later finished count never overtakes
    // an earlier one.
    publish_lock: Mutex<()>,
    sink: Arc<dyn StatusSink>,
}

impl StatusManager {
    pub fn new(
        task_id: ScanTaskId,
        target_count: u64,
        plugin_count: u64,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            task_id,
            total_targets: target_count,
            total_plugins: plugin_count,
            active_targets: AtomicU64::new(0),
            finished_targets: AtomicU64::new(0),
            active_tasks: AtomicU64::new(0),
            finished_tasks: AtomicU64::new(0),
            issued: AtomicU64::new(0),
            min_finished_tasks: AtomicU64::new(0),
            min_finished_targets: AtomicU64::new(0),
            inflight: DashMap::new(),
            publish_lock: Mutex::new(()),
            sink,
        }
    }

    pub fn task_id(&self) -> &ScanTaskId {
        &self.task_id
    }

    /// Installs resumed-progress seeding. Called once, before dispatch.
    pub fn seed_progress(&self, seed: ProgressSeed) {
        self.finished_tasks.store(seed.finished_tasks, Ordering::SeqCst);
        self.finished_targets
            .store(seed.finished_targets, Ordering::SeqCst);
        self.min_finished_tasks
            .store(seed.min_finished_tasks, Ordering::SeqCst);
        self.min_finished_targets
            .store(seed.min_finished_targets, Ordering::SeqCst);
    }

    /// Marks one target's fan-out as begun.
    pub fn begin_target(&self) {
        self.active_targets.fetch_add(1, Ordering::SeqCst);
    }

    /// Marks one target's fan-out as drained.
    pub fn finish_target(&self) {
        self.active_targets.fetch_sub(1, Ordering::SeqCst);
        self.finished_targets.fetch_add(1, Ordering::SeqCst);
    }

    /// Allocates the next dispatch-order task index and records it
    /// in flight. The caller must eventually call `finish_task` with it.
    pub fn begin_task(&self) -> u64 {
        let index = self.issued.fetch_add(1, Ordering::SeqCst);
        self.active_tasks.fetch_add(1, Ordering::SeqCst);
        self.inflight.insert(index, ());
        index
    }

    /// Retires a task index allocated by `begin_task`.
    pub fn finish_task(&self, index: u64) {
        self.inflight.remove(&index);
        self.active_tasks.fetch_sub(1, Ordering::SeqCst);
        self.finished_tasks.fetch_add(1, Ordering::SeqCst);
    }

    /// Advances the dispatch counter past a pair finished in an earlier
    /// run, keeping indices enumeration-aligned across resumes.
    pub fn skip_task(&self) {
        self.issued.fetch_add(1, Ordering::SeqCst);
    }

    /// Value the next `begin_task` would return. Only the dispatch loop
    /// allocates, so peeking there is stable.
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    /// Sorted snapshot of the in-flight index set, used for checkpoints.
    pub fn active_indexes(&self) -> Vec<u64> {
        let mut indexes: Vec<u64> = self.inflight.iter().map(|entry| *entry.key()).collect();
        indexes.sort_unstable();
        indexes
    }

    pub fn counts(&self) -> ProgressCounts {
        let finished_tasks = self
            .finished_tasks
            .load(Ordering::SeqCst)
            .max(self.min_finished_tasks.load(Ordering::SeqCst));
        let finished_targets = self
            .finished_targets
            .load(Ordering::SeqCst)
            .max(self.min_finished_targets.load(Ordering::SeqCst));
        ProgressCounts {
            total_targets: self.total_targets,
            total_plugins: self.total_plugins,
            total_tasks: self.total_targets * self.total_plugins,
            finished_targets,
            finished_tasks,
            active_targets: self.active_targets.load(Ordering::SeqCst),
            active_tasks: self.active_tasks.load(Ordering::SeqCst),
        }
    }

    /// Builds a plain progress snapshot from the live counters.
    pub fn snapshot(&self) -> StatusUpdate {
        let counts = self.counts();
        StatusUpdate {
            hybrid_scan_task_id: self.task_id.to_string(),
            total_targets: counts.total_targets,
            total_plugins: counts.total_plugins,
            total_tasks: counts.total_tasks,
            finished_targets: counts.finished_targets,
            finished_tasks: counts.finished_tasks,
            active_targets: counts.active_targets,
            active_tasks: counts.active_tasks,
            active_task_update: None,
            scan_result: None,
        }
    }

    /// Sends a plain snapshot over the transport.
    pub async fn push_snapshot(&self) {
        self.publish(None, None).await;
    }

    /// Sends a snapshot annotated with a "task started" table row.
    pub async fn push_task_started(
        &self,
        index: u64,
        target: &ScanTarget,
        plugin: &PluginDescriptor,
    ) {
        let delta = table_delta(TableOp::Create, index, target, plugin);
        self.publish(Some(delta), None).await;
    }

    /// Sends a snapshot annotated with a "task removed" table row.
    pub async fn push_task_removed(
        &self,
        index: u64,
        target: &ScanTarget,
        plugin: &PluginDescriptor,
    ) {
        let delta = table_delta(TableOp::Remove, index, target, plugin);
        self.publish(Some(delta), None).await;
    }

    /// Merges one raw engine result into the status stream.
    pub async fn push_result(&self, event: EngineEvent) {
        self.publish(None, Some(event)).await;
    }

    async fn publish(&self, delta: Option<TaskTableDelta>, result: Option<EngineEvent>) {
        let _guard = self.publish_lock.lock().await;
        let mut update = self.snapshot();
        update.active_task_update = delta;
        update.scan_result = result;
        if let Err(err) = self.sink.send(update).await {
            tracing::debug!(
                target: "scan::status",
                task = %self.task_id,
                "status update dropped: {err}"
            );
        }
    }
}

impl fmt::Debug for StatusManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusManager")
            .field("task_id", &self.task_id)
            .field("total_targets", &self.total_targets)
            .field("total_plugins", &self.total_plugins)
            .field("issued", &self.issued.load(Ordering::SeqCst))
            .field("inflight", &self.inflight.len())
            .finish_non_exhaustive()
    }
}

fn table_delta(
    op: TableOp,
    index: u64,
    target: &ScanTarget,
    plugin: &PluginDescriptor,
) -> TaskTableDelta {
    TaskTableDelta {
        op,
        index,
        url: target.url.clone(),
        is_https: target.is_https,
        request: target.request.clone(),
        plugin: plugin.name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NullSink;
    use std::collections::HashSet;

    fn manager(targets: u64, plugins: u64) -> Arc<StatusManager> {
        Arc::new(StatusManager::new(
            ScanTaskId::new("status-test"),
            targets,
            plugins,
            Arc::new(NullSink),
        ))
    }

    #[test]
    fn totals_multiply_and_counters_start_at_zero() {
        let status = manager(3, 2);
        let counts = status.counts();
        assert_eq!(counts.total_tasks, 6);
        assert_eq!(counts.finished_tasks, 0);
        assert_eq!(counts.active_tasks, 0);
    }

    #[test]
    fn begin_and_finish_keep_the_books_balanced() {
        let status = manager(2, 2);
        status.begin_target();
        let a = status.begin_task();
        let b = status.begin_task();
        assert_eq!(status.counts().active_tasks, 2);
        assert_eq!(status.active_indexes(), vec![a, b]);

        status.finish_task(a);
        status.finish_target();
        let counts = status.counts();
        assert_eq!(counts.active_tasks, 1);
        assert_eq!(counts.finished_tasks, 1);
        assert_eq!(counts.finished_targets, 1);
        assert_eq!(status.active_indexes(), vec![b]);
    }

    #[tokio::test]
    async fn concurrent_allocation_yields_unique_indexes() {
        let status = manager(10, 10);
        let mut handles = Vec::new();
        for _ in 0..10 {
            let status = Arc::clone(&status);
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..10 {
                    seen.push(status.begin_task());
                }
                seen
            }));
        }

        let mut all = HashSet::new();
        for handle in handles {
            for index in handle.await.expect("allocator task") {
                assert!(all.insert(index), "index {index} allocated twice");
            }
        }
        assert_eq!(all.len(), 100);
        assert_eq!(status.issued(), 100);
    }

    #[test]
    fn seeded_floor_clamps_reported_progress() {
        let status = manager(3, 2);
        status.seed_progress(ProgressSeed {
            finished_tasks: 2,
            finished_targets: 1,
            min_finished_tasks: 3,
            min_finished_targets: 1,
        });

        // Live counter (2) is below the persisted floor (3): report 3.
        assert_eq!(status.counts().finished_tasks, 3);

        let idx = status.begin_task();
        status.finish_task(idx);
        assert_eq!(status.counts().finished_tasks, 3);

        let idx = status.begin_task();
        status.finish_task(idx);
        assert_eq!(status.counts().finished_tasks, 4);
    }

    #[test]
    fn skip_task_advances_indices_without_touching_activity() {
        let status = manager(2, 2);
        status.skip_task();
        status.skip_task();
        assert_eq!(status.issued(), 2);
        assert_eq!(status.counts().active_tasks, 0);
        assert_eq!(status.begin_task(), 2);
    }
}

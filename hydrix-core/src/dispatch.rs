use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use hydrix_model::{
    PluginConfig, ScanTarget, ScanTaskId, ScanTaskRecord, ScanTaskStatus, StatusUpdate,
    TargetConfig,
};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time;

use crate::config::OrchestratorConfig;
use crate::engine::{ExecTask, ScanEngine};
use crate::error::{Result, ScanError};
use crate::plugins::{PluginReplay, PluginSource};
use crate::sink::StatusSink;
use crate::status::{ProgressSeed, StatusManager};
use crate::store::TaskStore;
use crate::targets;
use crate::task::TaskManager;

/// How the dispatch loop ended.
enum MatrixExit {
    /// Every pair was dispatched and drained.
    Completed,
    /// A checkpoint accepted a pause; undispatched pairs remain.
    Paused,
    /// Cancellation stopped dispatch; in-flight pairs were drained.
    Cancelled,
}

/// Which already-dispatched pairs a resumed run may skip.
///
/// A pair index is finished iff it sits below the recorded dispatch
/// high-water mark and is not in the recorded survival set. Survival pairs
/// were in flight at the checkpoint and re-execute on resume.
struct SkipPlan {
    dispatched: u64,
    survival: HashSet<u64>,
}

impl SkipPlan {
    fn from_record(record: &ScanTaskRecord) -> Self {
        Self {
            dispatched: record.dispatched_tasks,
            survival: record.survival_indexes.iter().copied().collect(),
        }
    }

    fn already_finished(&self, index: u64) -> bool {
        index < self.dispatched && !self.survival.contains(&index)
    }

    /// Pairs provably finished before the checkpoint.
    fn finished_count(&self) -> u64 {
        self.dispatched.saturating_sub(self.survival.len() as u64)
    }
}

/// Drives the (target, plugin) matrix of hybrid scan tasks.
///
/// One orchestrator is shared by every session; per-task state lives in the
/// [`TaskManager`] / [`StatusManager`] pair created for each run. Dispatch
/// walks targets in input order and replays the frozen plugin sequence
/// against each, bounded by a single task-wide semaphore.
pub struct Orchestrator {
    store: Arc<dyn TaskStore>,
    plugins: PluginSource,
    engine: Arc<dyn ScanEngine>,
    config: OrchestratorConfig,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        plugins: PluginSource,
        engine: Arc<dyn ScanEngine>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            plugins,
            engine,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Runs a fresh task from raw target/plugin selections to a terminal or
    /// paused state. Panics anywhere in dispatch are caught and recorded as
    /// a task error instead of poisoning the session.
    pub async fn run(
        &self,
        manager: Arc<TaskManager>,
        target_config: &TargetConfig,
        plugin_config: &PluginConfig,
        sink: Arc<dyn StatusSink>,
    ) -> Result<ScanTaskStatus> {
        let task_id = manager.task_id().clone();
        let outcome =
            AssertUnwindSafe(self.execute_run(manager, target_config, plugin_config, sink))
                .catch_unwind()
                .await;
        self.settle_outcome(task_id, outcome).await
    }

    /// Continues a stored task from its last checkpoint, skipping pairs the
    /// record proves finished and re-executing its survival set.
    pub async fn resume(
        &self,
        manager: Arc<TaskManager>,
        sink: Arc<dyn StatusSink>,
    ) -> Result<ScanTaskStatus> {
        let task_id = manager.task_id().clone();
        let outcome = AssertUnwindSafe(self.execute_resume(manager, sink))
            .catch_unwind()
            .await;
        self.settle_outcome(task_id, outcome).await
    }

    async fn execute_run(
        &self,
        manager: Arc<TaskManager>,
        target_config: &TargetConfig,
        plugin_config: &PluginConfig,
        sink: Arc<dyn StatusSink>,
    ) -> Result<ScanTaskStatus> {
        let task_id = manager.task_id().clone();
        let mut record = match self.store.get(&task_id).await? {
            Some(existing) if existing.status.is_terminal() => {
                return Err(ScanError::Config(format!(
                    "task {task_id} already finished as {}",
                    existing.status
                )));
            }
            Some(existing) if existing.is_frozen() => {
                return Err(ScanError::Config(format!(
                    "task {task_id} already exists; resume it instead"
                )));
            }
            Some(mut existing) => {
                if existing.status == ScanTaskStatus::Paused {
                    existing.advance(ScanTaskStatus::Executing)?;
                }
                existing
            }
            None => ScanTaskRecord::new(task_id.clone()),
        };
        self.store.upsert(&record).await?;
        tracing::info!(target: "scan::dispatch", task = %task_id, "scan task opened");

        let expanded = match targets::generate(target_config).await {
            Ok(expanded) => expanded,
            Err(err) => return self.fail_record(record, &sink, err).await,
        };
        let resolved = match self.plugins.resolve(plugin_config).await {
            Ok(resolved) => resolved,
            Err(err) => return self.fail_record(record, &sink, err).await,
        };
        if resolved.is_empty() {
            let err = ScanError::Config("no plugin loaded".into());
            return self.fail_record(record, &sink, err).await;
        }

        let replay = PluginReplay::new(resolved);
        record.freeze_inputs(&expanded, &replay.names());
        self.store.upsert(&record).await?;

        let targets: Vec<Arc<ScanTarget>> = expanded.into_iter().map(Arc::new).collect();
        let status = Arc::new(StatusManager::new(
            task_id,
            record.total_targets,
            record.total_plugins,
            sink,
        ));
        status.push_snapshot().await;

        let exit = self
            .run_matrix(&manager, &mut record, &status, &replay, &targets, None)
            .await?;
        self.finalize(record, &status, exit).await
    }

    async fn execute_resume(
        &self,
        manager: Arc<TaskManager>,
        sink: Arc<dyn StatusSink>,
    ) -> Result<ScanTaskStatus> {
        let task_id = manager.task_id().clone();
        let mut record = self
            .store
            .get(&task_id)
            .await?
            .ok_or_else(|| ScanError::NotFound(format!("no stored task {task_id}")))?;

        if record.status.is_terminal() {
            return Err(ScanError::Config(format!(
                "task {task_id} already finished as {}",
                record.status
            )));
        }
        if record.status == ScanTaskStatus::Paused {
            record.advance(ScanTaskStatus::Executing)?;
        }
        if !record.is_frozen() {
            let err = ScanError::Config(format!("task {task_id} has no recorded scan matrix"));
            return self.fail_record(record, &sink, err).await;
        }

        // Resolve before persisting the transition: a missing plugin leaves
        // the stored record paused and resumable once the catalog is fixed.
        let resolved = self.plugins.resolve_exact(&record.plugins).await?;
        self.store.upsert(&record).await?;
        tracing::info!(
            target: "scan::dispatch",
            task = %task_id,
            dispatched = record.dispatched_tasks,
            survival = record.survival_indexes.len(),
            "scan task resumed"
        );

        let replay = PluginReplay::new(resolved);
        let targets: Vec<Arc<ScanTarget>> = record
            .targets
            .iter()
            .cloned()
            .map(Arc::new)
            .collect();

        let plan = SkipPlan::from_record(&record);
        let status = Arc::new(StatusManager::new(
            task_id,
            record.total_targets,
            record.total_plugins,
            sink,
        ));
        status.seed_progress(resume_seed(&record, &plan));
        status.push_snapshot().await;

        let exit = self
            .run_matrix(&manager, &mut record, &status, &replay, &targets, Some(&plan))
            .await?;
        self.finalize(record, &status, exit).await
    }

    /// Fans the (target, plugin) matrix out under the concurrency ceiling.
    ///
    /// Pair indices are allocated in dispatch order from a counter that is
    /// never reset, so the enumeration below must visit pairs identically
    /// on every run of the same record.
    async fn run_matrix(
        &self,
        manager: &Arc<TaskManager>,
        record: &mut ScanTaskRecord,
        status: &Arc<StatusManager>,
        replay: &PluginReplay,
        targets: &[Arc<ScanTarget>],
        skip: Option<&SkipPlan>,
    ) -> Result<MatrixExit> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrent.max(1)));
        let cancel = manager.cancel_token();
        let mut workers = JoinSet::new();
        let mut watchers = JoinSet::new();

        let (result_tx, mut result_rx) = mpsc::channel(self.config.result_buffer.max(1));
        let forwarder = {
            let status = Arc::clone(status);
            tokio::spawn(async move {
                while let Some(event) = result_rx.recv().await {
                    status.push_result(event).await;
                }
            })
        };

        let mut exit = MatrixExit::Completed;

        'targets: for target in targets {
            if let Some(plan) = skip {
                let base = status.issued();
                let span = replay.len() as u64;
                if (base..base + span).all(|index| plan.already_finished(index)) {
                    for _ in 0..span {
                        status.skip_task();
                    }
                    continue;
                }
            }

            status.begin_target();
            // Every worker of this target holds a sender clone; the watcher
            // sees the channel close when the fan-out has fully drained.
            let (drain_tx, mut drain_rx) = mpsc::channel::<()>(1);

            for plugin in replay.iter() {
                let pair_index = status.issued();
                if let Some(plan) = skip {
                    if plan.already_finished(pair_index) {
                        status.skip_task();
                        continue;
                    }
                }

                let permit = tokio::select! {
                    _ = cancel.cancelled() => {
                        exit = MatrixExit::Cancelled;
                        break 'targets;
                    }
                    permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => {
                            exit = MatrixExit::Cancelled;
                            break 'targets;
                        }
                    },
                };

                let paused = manager
                    .checkpoint(|| save_pause_checkpoint(&self.store, status, &mut *record))
                    .await?;
                if paused {
                    drop(permit);
                    exit = MatrixExit::Paused;
                    break 'targets;
                }

                let index = status.begin_task();
                let exec = ExecTask {
                    task_id: status.task_id().clone(),
                    index,
                    target: Arc::clone(target),
                    plugin,
                };
                status.push_task_started(index, &exec.target, &exec.plugin).await;

                let engine = Arc::clone(&self.engine);
                let worker_status = Arc::clone(status);
                let worker_cancel = cancel.clone();
                let results = result_tx.clone();
                let jitter = self.config.completion_jitter;
                let drain_guard = drain_tx.clone();
                workers.spawn(async move {
                    let _drain_guard = drain_guard;
                    let run = AssertUnwindSafe(engine.execute(&worker_cancel, &exec, &results))
                        .catch_unwind()
                        .await;
                    match run {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            tracing::warn!(
                                target: "scan::dispatch",
                                task = %exec.task_id,
                                index = exec.index,
                                plugin = %exec.plugin.name,
                                "scan unit failed: {err}"
                            );
                        }
                        Err(panic) => {
                            let reason = panic_reason(panic.as_ref());
                            tracing::warn!(
                                target: "scan::dispatch",
                                task = %exec.task_id,
                                index = exec.index,
                                plugin = %exec.plugin.name,
                                "scan unit panicked: {reason}"
                            );
                        }
                    }
                    worker_status.finish_task(exec.index);
                    worker_status
                        .push_task_removed(exec.index, &exec.target, &exec.plugin)
                        .await;
                    // Hold the slot a randomized beat before reuse.
                    time::sleep(jitter.sample()).await;
                    drop(permit);
                });
            }

            drop(drain_tx);
            let watcher_status = Arc::clone(status);
            watchers.spawn(async move {
                let _ = drain_rx.recv().await;
                watcher_status.finish_target();
                watcher_status.push_snapshot().await;
            });
        }

        drop(result_tx);
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                tracing::error!(target: "scan::dispatch", "scan worker join failed: {err}");
            }
        }
        while let Some(joined) = watchers.join_next().await {
            if let Err(err) = joined {
                tracing::error!(target: "scan::dispatch", "target watcher join failed: {err}");
            }
        }
        let _ = forwarder.await;

        Ok(exit)
    }

    /// Writes the post-drain record and emits the final status frame.
    async fn finalize(
        &self,
        mut record: ScanTaskRecord,
        status: &StatusManager,
        exit: MatrixExit,
    ) -> Result<ScanTaskStatus> {
        let counts = status.counts();
        record.finished_tasks = counts.finished_tasks;
        record.finished_targets = counts.finished_targets;

        match exit {
            MatrixExit::Completed => {
                record.survival_indexes.clear();
                record.dispatched_tasks = status.issued();
                record.advance(ScanTaskStatus::Done)?;
            }
            MatrixExit::Paused => {
                // Survival set and high-water mark keep their checkpoint
                // values; only the drained progress counters move.
                record.touch();
            }
            MatrixExit::Cancelled => {
                record.survival_indexes = status.active_indexes();
                record.dispatched_tasks = status.issued();
                record.touch();
            }
        }

        self.store.upsert(&record).await?;
        status.push_snapshot().await;
        tracing::info!(
            target: "scan::dispatch",
            task = %record.task_id,
            status = %record.status,
            finished = counts.finished_tasks,
            total = counts.total_tasks,
            "scan task settled"
        );
        Ok(record.status)
    }

    /// Marks the record failed and flushes a final status frame, then
    /// returns the originating error.
    async fn fail_record(
        &self,
        mut record: ScanTaskRecord,
        sink: &Arc<dyn StatusSink>,
        err: ScanError,
    ) -> Result<ScanTaskStatus> {
        let reason = match &err {
            ScanError::Config(message) => message.clone(),
            other => other.to_string(),
        };
        record.mark_error(reason)?;
        self.store.upsert(&record).await?;
        let _ = sink.send(StatusUpdate::from_record(&record)).await;
        tracing::warn!(
            target: "scan::dispatch",
            task = %record.task_id,
            "scan task failed: {err}"
        );
        Err(err)
    }

    async fn settle_outcome(
        &self,
        task_id: ScanTaskId,
        outcome: std::result::Result<Result<ScanTaskStatus>, Box<dyn Any + Send>>,
    ) -> Result<ScanTaskStatus> {
        match outcome {
            Ok(result) => result,
            Err(payload) => {
                let reason = panic_reason(payload.as_ref());
                tracing::error!(
                    target: "scan::dispatch",
                    task = %task_id,
                    "scan task panicked: {reason}"
                );
                if let Err(err) = self.record_panic(&task_id, &reason).await {
                    tracing::error!(
                        target: "scan::dispatch",
                        task = %task_id,
                        "failed to persist panic outcome: {err}"
                    );
                }
                Err(ScanError::Internal(format!("scan task panicked: {reason}")))
            }
        }
    }

    async fn record_panic(&self, task_id: &ScanTaskId, reason: &str) -> Result<()> {
        if let Some(mut record) = self.store.get(task_id).await? {
            if !record.status.is_terminal() {
                record.mark_error(format!("panic: {reason}"))?;
                self.store.upsert(&record).await?;
            }
        }
        Ok(())
    }
}

/// Captures checkpoint state and persists the paused record. Runs inside
/// [`TaskManager::checkpoint`], so it executes at most once per pause.
async fn save_pause_checkpoint(
    store: &Arc<dyn TaskStore>,
    status: &StatusManager,
    record: &mut ScanTaskRecord,
) -> Result<()> {
    record.survival_indexes = status.active_indexes();
    record.dispatched_tasks = status.issued();
    let counts = status.counts();
    record.finished_tasks = counts.finished_tasks;
    record.finished_targets = counts.finished_targets;
    record.advance(ScanTaskStatus::Paused)?;
    store.upsert(record).await?;
    tracing::info!(
        target: "scan::dispatch",
        task = %record.task_id,
        dispatched = record.dispatched_tasks,
        survival = record.survival_indexes.len(),
        "pause checkpoint saved"
    );
    Ok(())
}

/// Derives the progress seed for a resumed run: provable completions prime
/// the live counters, the recorded counters become display floors.
fn resume_seed(record: &ScanTaskRecord, plan: &SkipPlan) -> ProgressSeed {
    let mut finished_targets = 0;
    if record.total_plugins > 0 {
        for slot in 0..record.total_targets {
            let base = slot * record.total_plugins;
            let span = base..base + record.total_plugins;
            if span.clone().all(|index| plan.already_finished(index)) {
                finished_targets += 1;
            }
        }
    }
    ProgressSeed {
        finished_tasks: plan.finished_count(),
        finished_targets,
        min_finished_tasks: record.finished_tasks,
        min_finished_targets: record.finished_targets,
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(dispatched: u64, survival: &[u64]) -> ScanTaskRecord {
        let mut record = ScanTaskRecord::new(ScanTaskId::new("skip-test"));
        record.dispatched_tasks = dispatched;
        record.survival_indexes = survival.to_vec();
        record
    }

    #[test]
    fn skip_plan_separates_finished_from_survival() {
        let plan = SkipPlan::from_record(&record_with(4, &[1, 3]));
        assert!(plan.already_finished(0));
        assert!(!plan.already_finished(1));
        assert!(plan.already_finished(2));
        assert!(!plan.already_finished(3));
        assert!(!plan.already_finished(4));
        assert_eq!(plan.finished_count(), 2);
    }

    #[test]
    fn resume_seed_counts_fully_finished_targets() {
        // 3 targets x 2 plugins, paused after dispatching 4 pairs with
        // pair 3 still in flight: target 0 finished, target 1 did not.
        let mut record = record_with(4, &[3]);
        record.total_targets = 3;
        record.total_plugins = 2;
        record.finished_tasks = 3;
        record.finished_targets = 1;

        let plan = SkipPlan::from_record(&record);
        let seed = resume_seed(&record, &plan);
        assert_eq!(seed.finished_tasks, 3);
        assert_eq!(seed.finished_targets, 1);
        assert_eq!(seed.min_finished_tasks, 3);
        assert_eq!(seed.min_finished_targets, 1);
    }

    #[test]
    fn panic_reason_reads_both_payload_shapes() {
        let boxed: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_reason(boxed.as_ref()), "static message");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_reason(boxed.as_ref()), "owned message");
        let boxed: Box<dyn Any + Send> = Box::new(17_u32);
        assert_eq!(panic_reason(boxed.as_ref()), "unknown panic");
    }
}

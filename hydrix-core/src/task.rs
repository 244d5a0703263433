use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use hydrix_model::ScanTaskId;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Lifecycle controller for one hybrid scan task.
///
/// Owns the cancellation token handed to every worker, plus the pause
/// handshake: callers set `request_pause`, and the dispatch loop accepts it
/// at the next `checkpoint`. Pause only becomes effective once the durable
/// record has been saved by the checkpoint closure.
pub struct TaskManager {
    task_id: ScanTaskId,
    cancel: CancellationToken,
    pause_requested: AtomicBool,
    paused: AtomicBool,
}

impl TaskManager {
    /// Creates a controller chained under `parent`; cancelling the parent
    /// cancels this task without the reverse being true.
    pub fn new(task_id: ScanTaskId, parent: &CancellationToken) -> Self {
        Self {
            task_id,
            cancel: parent.child_token(),
            pause_requested: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        }
    }

    pub fn task_id(&self) -> &ScanTaskId {
        &self.task_id
    }

    /// Token observed by workers and the dispatch loop.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops new dispatch and interrupts in-flight work.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Asks the dispatch loop to pause at its next checkpoint.
    pub fn request_pause(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_pause_requested(&self) -> bool {
        self.pause_requested.load(Ordering::SeqCst)
    }

    /// True only after a checkpoint accepted the pause.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Clears the pause handshake before a continuation run.
    pub fn resume_from_pause(&self) {
        self.pause_requested.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Pause gate called once per pair before committing to dispatch.
    ///
    /// Without a pending request this is a cheap atomic load. With one, the
    /// `save` closure persists the task state; only when it succeeds does
    /// the pause take effect. Returns whether the caller should stop
    /// dispatching.
    pub async fn checkpoint<F, Fut>(&self, save: F) -> Result<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if !self.pause_requested.load(Ordering::SeqCst) {
            return Ok(false);
        }
        if self.paused.load(Ordering::SeqCst) {
            return Ok(true);
        }
        save().await?;
        self.paused.store(true, Ordering::SeqCst);
        Ok(true)
    }
}

impl fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskManager")
            .field("task_id", &self.task_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("pause_requested", &self.pause_requested.load(Ordering::SeqCst))
            .field("paused", &self.paused.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn mgr() -> TaskManager {
        TaskManager::new(ScanTaskId::new("task-test"), &CancellationToken::new())
    }

    #[tokio::test]
    async fn checkpoint_is_a_noop_without_a_pause_request() {
        let manager = mgr();
        let saves = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&saves);
        let paused = manager
            .checkpoint(|| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        assert!(!paused);
        assert_eq!(saves.load(Ordering::SeqCst), 0);
        assert!(!manager.is_paused());
    }

    #[tokio::test]
    async fn checkpoint_saves_once_then_reports_paused() {
        let manager = mgr();
        manager.request_pause();
        let saves = Arc::new(AtomicUsize::new(0));

        for round in 0..3 {
            let counter = Arc::clone(&saves);
            let paused = manager
                .checkpoint(|| async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .unwrap();
            assert!(paused, "round {round} should report paused");
        }
        assert_eq!(saves.load(Ordering::SeqCst), 1);
        assert!(manager.is_paused());
    }

    #[tokio::test]
    async fn failed_save_leaves_the_task_running() {
        let manager = mgr();
        manager.request_pause();
        let result = manager
            .checkpoint(|| async { Err(crate::error::ScanError::Internal("save failed".into())) })
            .await;
        assert!(result.is_err());
        assert!(!manager.is_paused());
        assert!(manager.is_pause_requested());
    }

    #[tokio::test]
    async fn resume_clears_the_handshake() {
        let manager = mgr();
        manager.request_pause();
        let _ = manager.checkpoint(|| async { Ok(()) }).await.unwrap();
        assert!(manager.is_paused());

        manager.resume_from_pause();
        assert!(!manager.is_paused());
        assert!(!manager.is_pause_requested());
    }

    #[test]
    fn child_token_follows_parent_cancellation() {
        let parent = CancellationToken::new();
        let manager = TaskManager::new(ScanTaskId::generate(), &parent);
        assert!(!manager.is_cancelled());
        parent.cancel();
        assert!(manager.is_cancelled());
    }
}

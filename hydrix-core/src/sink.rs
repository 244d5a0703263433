use async_trait::async_trait;
use hydrix_model::StatusUpdate;
use tokio::sync::mpsc;

use crate::error::{Result, ScanError};

/// Outbound half of the control channel. Implementations must serialize
/// concurrent sends; the orchestrator calls this from many workers at once.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn send(&self, update: StatusUpdate) -> Result<()>;
}

/// Sink backed by an mpsc channel, the usual bridge to a WebSocket writer
/// task or a test collector.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<StatusUpdate>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<StatusUpdate>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl StatusSink for ChannelSink {
    async fn send(&self, update: StatusUpdate) -> Result<()> {
        self.tx
            .send(update)
            .await
            .map_err(|_| ScanError::Transport("status channel closed".into()))
    }
}

/// Discards every update. Useful for headless runs and tests that only
/// care about the durable record.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

#[async_trait]
impl StatusSink for NullSink {
    async fn send(&self, _update: StatusUpdate) -> Result<()> {
        Ok(())
    }
}

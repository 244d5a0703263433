use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use dashmap::mapref::entry::Entry;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

use async_trait::async_trait;
use hydrix_core::{ScanError, StatusSink, TaskManager};
use hydrix_model::control::{ControlMessage, PluginConfig, TargetConfig};
use hydrix_model::ids::ScanTaskId;
use hydrix_model::status::StatusUpdate;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Frames queued for the socket sender. Status snapshots come from the
/// orchestrator through the sink; error frames come from the control loop.
enum OutboundFrame {
    Status(StatusUpdate),
    Error(String),
}

/// Sink adapter that feeds orchestrator status frames into the per-socket
/// outbound queue.
struct SocketSink {
    tx: mpsc::Sender<OutboundFrame>,
}

#[async_trait]
impl StatusSink for SocketSink {
    async fn send(&self, update: StatusUpdate) -> hydrix_core::Result<()> {
        self.tx
            .send(OutboundFrame::Status(update))
            .await
            .map_err(|_| ScanError::Transport("status channel closed".into()))
    }
}

/// Handle WebSocket upgrade request for the hybrid scan control channel.
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one scan control connection until the client goes away.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<OutboundFrame>(256);

    // Spawn task to handle outgoing frames
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match encode_frame(&frame) {
                Ok(text) => text,
                Err(err) => {
                    debug!(target: "server::ws", "frame encoding failed: {err}");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = ScanSession::new(state, tx);

    // Handle incoming control messages
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                match serde_json::from_str::<ControlMessage>(text.as_str()) {
                    Ok(control) => session.handle_control(control).await,
                    Err(err) => {
                        session
                            .send_error(format!("unrecognized control frame: {err}"))
                            .await;
                    }
                }
            }
            Ok(Message::Binary(bin)) => {
                match serde_json::from_slice::<ControlMessage>(bin.as_ref()) {
                    Ok(control) => session.handle_control(control).await,
                    Err(err) => {
                        session
                            .send_error(format!("unrecognized control frame: {err}"))
                            .await;
                    }
                }
            }
            Ok(Message::Close(_)) => {
                break;
            }
            Err(err) => {
                debug!(target: "server::ws", "websocket error: {err}");
                break;
            }
            _ => {}
        }
    }

    // Clean up on disconnect
    session.disconnect().await;
}

fn encode_frame(frame: &OutboundFrame) -> serde_json::Result<String> {
    match frame {
        OutboundFrame::Status(update) => serde_json::to_string(update),
        OutboundFrame::Error(message) => serde_json::to_string(&json!({
            "type": "error",
            "message": message,
        })),
    }
}

/// Work either side of a launch: `run` takes fresh configs, `resume`
/// replays a stored record.
enum ScanRun {
    Launch {
        targets: TargetConfig,
        plugins: PluginConfig,
    },
    Resume,
}

/// The scan task this connection currently owns.
struct ActiveScan {
    task_id: ScanTaskId,
    manager: Arc<TaskManager>,
    handle: JoinHandle<()>,
}

/// Per-connection control state. Target and plugin selections arrive as
/// separate frames in either order; the task launches once both are in.
struct ScanSession {
    state: AppState,
    outbound: mpsc::Sender<OutboundFrame>,
    pending_targets: Option<TargetConfig>,
    pending_plugins: Option<PluginConfig>,
    active: Option<ActiveScan>,
}

impl ScanSession {
    fn new(state: AppState, outbound: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            state,
            outbound,
            pending_targets: None,
            pending_plugins: None,
            active: None,
        }
    }

    async fn handle_control(&mut self, msg: ControlMessage) {
        self.clear_settled();
        match msg {
            ControlMessage::Targets(config) => {
                if self.active.is_some() {
                    self.send_error("a scan task is already running on this connection")
                        .await;
                    return;
                }
                self.pending_targets = Some(config);
                self.try_launch().await;
            }
            ControlMessage::Plugins(config) => {
                if self.active.is_some() {
                    self.send_error("a scan task is already running on this connection")
                        .await;
                    return;
                }
                self.pending_plugins = Some(config);
                self.try_launch().await;
            }
            ControlMessage::Pause => {
                let Some(active) = &self.active else {
                    self.send_error("no scan task on this connection").await;
                    return;
                };
                active.manager.request_pause();
                info!(target: "server::ws", task = %active.task_id, "pause requested");
            }
            ControlMessage::Resume { task_id: None } => self.resume_current().await,
            ControlMessage::Resume { task_id: Some(id) } => self.resume_stored(id).await,
            ControlMessage::Stop => self.stop_current().await,
        }
    }

    /// Settled tasks keep their session slot only while paused; anything
    /// else frees the connection for a new launch.
    fn clear_settled(&mut self) {
        if let Some(active) = &self.active {
            if active.handle.is_finished() && !active.manager.is_paused() {
                self.active = None;
            }
        }
    }

    async fn try_launch(&mut self) {
        let Some((targets, plugins)) =
            take_launch_pair(&mut self.pending_targets, &mut self.pending_plugins)
        else {
            return;
        };

        let task_id = ScanTaskId::generate();
        let manager = Arc::new(TaskManager::new(task_id.clone(), &self.state.shutdown));
        self.state
            .sessions
            .insert(task_id.as_str().to_string(), manager.clone());

        let handle = self.spawn_scan(
            ScanRun::Launch { targets, plugins },
            task_id.clone(),
            manager.clone(),
        );
        self.active = Some(ActiveScan {
            task_id,
            manager,
            handle,
        });
    }

    /// Continue this connection's paused task.
    async fn resume_current(&mut self) {
        let Some(mut active) = self.active.take() else {
            self.send_error("no scan task on this connection").await;
            return;
        };
        if !active.manager.is_paused() {
            self.send_error("scan task is not paused").await;
            self.active = Some(active);
            return;
        }

        // The pause checkpoint is already persisted; join so the settle
        // frame lands before resumed progress starts streaming.
        if let Err(err) = (&mut active.handle).await {
            warn!(target: "server::ws", task = %active.task_id, "scan task join failed: {err}");
        }
        active.manager.resume_from_pause();
        active.handle =
            self.spawn_scan(ScanRun::Resume, active.task_id.clone(), active.manager.clone());
        self.active = Some(active);
    }

    /// Pick up a stored task by id, typically from an earlier connection.
    async fn resume_stored(&mut self, id: String) {
        if self.active.is_some() {
            self.send_error("a scan task is already running on this connection")
                .await;
            return;
        }

        let task_id = ScanTaskId::from(id);
        let manager = Arc::new(TaskManager::new(task_id.clone(), &self.state.shutdown));
        match self.state.sessions.entry(task_id.as_str().to_string()) {
            Entry::Occupied(_) => {
                self.send_error(format!("scan task {task_id} is already live"))
                    .await;
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(manager.clone());
            }
        }

        let handle = self.spawn_scan(ScanRun::Resume, task_id.clone(), manager.clone());
        self.active = Some(ActiveScan {
            task_id,
            manager,
            handle,
        });
    }

    /// Cancel the connection's task. Dispatch stops, in-flight pairs drain,
    /// and the stored record is left resumable.
    async fn stop_current(&mut self) {
        let Some(active) = self.active.take() else {
            self.send_error("no scan task on this connection").await;
            return;
        };
        active.manager.cancel();
        if let Err(err) = active.handle.await {
            warn!(target: "server::ws", task = %active.task_id, "scan task join failed: {err}");
        }
        self.state.sessions.remove(active.task_id.as_str());
        info!(target: "server::ws", task = %active.task_id, "scan task stopped");
    }

    fn spawn_scan(
        &self,
        mode: ScanRun,
        task_id: ScanTaskId,
        manager: Arc<TaskManager>,
    ) -> JoinHandle<()> {
        let orchestrator = self.state.orchestrator.clone();
        let sessions = self.state.sessions.clone();
        let sink: Arc<dyn StatusSink> = Arc::new(SocketSink {
            tx: self.outbound.clone(),
        });
        let outbound = self.outbound.clone();

        tokio::spawn(async move {
            let outcome = match mode {
                ScanRun::Launch { targets, plugins } => {
                    orchestrator.run(manager, &targets, &plugins, sink).await
                }
                ScanRun::Resume => orchestrator.resume(manager, sink).await,
            };
            match outcome {
                Ok(status) if status.is_terminal() => {
                    sessions.remove(task_id.as_str());
                    info!(target: "server::ws", task = %task_id, %status, "scan task finished");
                }
                Ok(status) => {
                    info!(target: "server::ws", task = %task_id, %status, "scan task suspended");
                }
                Err(err) => {
                    sessions.remove(task_id.as_str());
                    warn!(target: "server::ws", task = %task_id, "scan task failed: {err}");
                    let _ = outbound
                        .send(OutboundFrame::Error(err.to_string()))
                        .await;
                }
            }
        })
    }

    async fn send_error(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(target: "server::ws", "control error: {message}");
        let _ = self.outbound.send(OutboundFrame::Error(message)).await;
    }

    /// Client went away. Cancelling flushes the task's state so any other
    /// connection can resume it.
    async fn disconnect(mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.manager.cancel();
        if let Err(err) = active.handle.await {
            warn!(target: "server::ws", task = %active.task_id, "scan task join failed: {err}");
        }
        self.state.sessions.remove(active.task_id.as_str());
        info!(target: "server::ws", task = %active.task_id, "scan session closed");
    }
}

/// A launch needs both halves of the selection; taking them clears the
/// slots for the connection's next task.
fn take_launch_pair(
    targets: &mut Option<TargetConfig>,
    plugins: &mut Option<PluginConfig>,
) -> Option<(TargetConfig, PluginConfig)> {
    if targets.is_some() && plugins.is_some() {
        Some((targets.take()?, plugins.take()?))
    } else {
        None
    }
}

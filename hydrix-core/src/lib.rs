//! # Hydrix Core
//!
//! Orchestration library for the Hydrix hybrid scanner, providing task
//! dispatch, durable task records, and the live status stream.
//!
//! ## Overview
//!
//! `hydrix-core` drives the (target, plugin) matrix behind every hybrid
//! scan task:
//!
//! - **Matrix Dispatch**: Targets in input order, the frozen plugin
//!   sequence replayed against each, all under one task-wide concurrency
//!   ceiling
//! - **Lifecycle Control**: Cooperative pause checkpoints, cancellation,
//!   and panic containment per task and per pair
//! - **Durable Records**: Task state persisted through a store trait with
//!   Postgres and in-memory backends
//! - **Resume**: Paused or interrupted tasks reload their record and
//!   continue, skipping pairs the record proves finished
//! - **Status Stream**: Progress snapshots, active-task table deltas, and
//!   engine results pushed through a pluggable sink
//!
//! ## Architecture
//!
//! - [`dispatch`]: The orchestrator and its fan-out loop
//! - [`task`]: Per-task lifecycle controller (pause/cancel handshake)
//! - [`status`]: Shared progress accounting and status publishing
//! - [`targets`] / [`plugins`]: Input expansion and plugin resolution
//! - [`store`] / [`persistence`]: Task record storage traits and backends
//! - [`engine`]: The execution-engine seam scan plugins run behind
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hydrix_core::{ChannelSink, Orchestrator, TaskManager};
//! use hydrix_model::{PluginConfig, ScanTaskId, TargetConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn launch(orchestrator: &Orchestrator) -> hydrix_core::Result<()> {
//!     let manager = Arc::new(TaskManager::new(
//!         ScanTaskId::generate(),
//!         &CancellationToken::new(),
//!     ));
//!     let (tx, _rx) = tokio::sync::mpsc::channel(64);
//!     let targets = TargetConfig {
//!         input: "https://example.com/".into(),
//!         ..TargetConfig::default()
//!     };
//!     let status = orchestrator
//!         .run(
//!             manager,
//!             &targets,
//!             &PluginConfig::default(),
//!             Arc::new(ChannelSink::new(tx)),
//!         )
//!         .await?;
//!     println!("task settled as {status}");
//!     Ok(())
//! }
//! ```

#![allow(missing_docs)]

/// Orchestrator tuning knobs
pub mod config;

/// Matrix dispatch and the task lifecycle driver
pub mod dispatch;

/// Execution-engine seam
pub mod engine;

/// Error types shared across the crate
pub mod error;

/// Postgres-backed task and plugin storage
pub mod persistence;

/// Plugin catalog traits and selection resolution
pub mod plugins;

/// Outbound status transport
pub mod sink;

/// Live progress accounting per task
pub mod status;

/// Task record storage traits and the in-memory backend
pub mod store;

/// Target expansion from raw input
pub mod targets;

/// Per-task lifecycle control
pub mod task;

pub use config::{JitterConfig, OrchestratorConfig};
pub use dispatch::Orchestrator;
pub use engine::{ExecTask, ScanEngine};
pub use error::{Result, ScanError};
pub use persistence::{PostgresPluginCatalog, PostgresTaskStore, connect};
pub use plugins::{MemoryPluginCatalog, PluginCatalog, PluginReplay, PluginSource};
pub use sink::{ChannelSink, NullSink, StatusSink};
pub use status::{ProgressCounts, ProgressSeed, StatusManager};
pub use store::{MemoryTaskStore, TaskStore};
pub use task::TaskManager;

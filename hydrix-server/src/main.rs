//! # Hydrix Server
//!
//! Hybrid scan orchestration server.
//!
//! ## Overview
//!
//! Hydrix Server exposes the hybrid scan engine over the network:
//!
//! - **Control Channel**: WebSocket endpoint accepting target and plugin
//!   selections plus pause/resume/stop commands
//! - **Status Stream**: live progress snapshots, per-pair table deltas, and
//!   engine results pushed over the same socket
//! - **Durable Records**: scan tasks persist across restarts and can be
//!   resumed from any connection
//! - **Plugin Catalog**: REST surface for registering and listing plugins
//!
//! ## Architecture
//!
//! The server is built on Axum and uses:
//! - PostgreSQL for persistent task records (in-memory fallback for dev)
//! - hydrix-core for matrix dispatch, checkpointing, and resume
//! - reqwest for the built-in HTTP probe engine

mod errors;
mod handlers;
mod probe;
mod routes;
mod scan_ws;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dashmap::DashMap;
use hydrix_core::{
    MemoryPluginCatalog, MemoryTaskStore, Orchestrator, OrchestratorConfig, PluginCatalog,
    PluginSource, PostgresPluginCatalog, PostgresTaskStore, TaskStore, connect,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::probe::ProbeEngine;
use crate::state::AppState;

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "hydrix-server")]
#[command(about = "Hybrid scan orchestration server with a WebSocket control channel")]
struct Cli {
    /// Socket address to listen on
    #[arg(long, env = "HYDRIX_BIND", default_value = "0.0.0.0:8787")]
    bind: SocketAddr,

    /// Postgres connection string; storage is in-memory when unset
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Upper bound on concurrently executing scan pairs
    #[arg(long, env = "HYDRIX_CONCURRENT", default_value_t = 20)]
    concurrent: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Quieter defaults with focused dispatch summaries. Override via RUST_LOG.
                "info,scan::dispatch=info,scan::status=info,tower_http=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (store, catalog): (Arc<dyn TaskStore>, Arc<dyn PluginCatalog>) =
        match cli.database_url.as_deref() {
            Some(url) => {
                let pool = connect(url).await.context("postgres connection failed")?;
                let store = PostgresTaskStore::new(pool.clone());
                store
                    .ensure_schema()
                    .await
                    .context("schema setup failed")?;
                store
                    .health_check()
                    .await
                    .context("postgres health check failed")?;
                info!("postgres storage ready");
                (
                    Arc::new(store),
                    Arc::new(PostgresPluginCatalog::new(pool)),
                )
            }
            None => {
                warn!("DATABASE_URL not set; scan task records will not survive restarts");
                (
                    Arc::new(MemoryTaskStore::new()),
                    Arc::new(MemoryPluginCatalog::new()),
                )
            }
        };

    let config = OrchestratorConfig {
        concurrent: cli.concurrent,
        ..Default::default()
    };
    let engine = Arc::new(ProbeEngine::new()?);
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        PluginSource::new(catalog.clone()),
        engine,
        config,
    ));

    let shutdown = CancellationToken::new();
    let app_state = AppState {
        store,
        catalog,
        orchestrator,
        sessions: Arc::new(DashMap::new()),
        shutdown: shutdown.clone(),
    };

    let router = routes::build_router(app_state);

    info!("starting hydrix server on {}", cli.bind);
    let listener = tokio::net::TcpListener::bind(cli.bind).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received; flushing live scan tasks");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}

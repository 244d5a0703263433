use axum::{Router, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers;
use crate::scan_ws;
use crate::state::AppState;

/// Build the application router: the WebSocket control channel plus a
/// small REST surface for records and the plugin catalog.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(handlers::ping))
        .route("/health", get(handlers::health))
        .route("/api/scan/hybrid", get(scan_ws::websocket_handler))
        .route("/api/scan/hybrid/tasks/{task_id}", get(handlers::get_task))
        .route(
            "/api/plugins",
            get(handlers::list_plugins).put(handlers::put_plugin),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

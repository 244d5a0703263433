use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use hydrix_model::ids::ScanTaskId;
use hydrix_model::plugin::PluginDescriptor;
use hydrix_model::record::ScanTaskRecord;
use serde_json::{Value, json};

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

pub async fn ping() -> &'static str {
    "pong"
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "active_sessions": state.sessions.len(),
    }))
}

/// Fetch the durable record of a scan task by id.
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<Json<ScanTaskRecord>> {
    let task_id = ScanTaskId::from(task_id);
    let record = state
        .store
        .get(&task_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("no scan task {task_id}")))?;
    Ok(Json(record))
}

pub async fn list_plugins(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<PluginDescriptor>>> {
    let plugins = state.catalog.list().await?;
    Ok(Json(plugins))
}

/// Register or replace a plugin in the catalog.
pub async fn put_plugin(
    State(state): State<AppState>,
    Json(plugin): Json<PluginDescriptor>,
) -> AppResult<StatusCode> {
    if plugin.name.trim().is_empty() {
        return Err(AppError::bad_request("plugin name must not be empty"));
    }
    state.catalog.upsert(&plugin).await?;
    Ok(StatusCode::NO_CONTENT)
}

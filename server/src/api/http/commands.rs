//! Command HTTP handlers

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use crate::domain::command::{CommandRecord, ExecutionMode};
use crate::{AppState, Error, Result};

/// Execute command request
#[derive(Debug, Deserialize)]
pub struct ExecuteCommandRequest {
    pub prompt: String,
    pub mode: Option<ExecutionMode>,
    pub timeout: Option<u64>,
}

/// Dispatch a natural-language request.
///
/// Returns the freshly created record immediately; the terminal state is
/// observed later by polling or via the event feed.
pub async fn execute_command(
    State(state): State<AppState>,
    Json(req): Json<ExecuteCommandRequest>,
) -> Result<Json<CommandRecord>> {
    if req.prompt.trim().is_empty() {
        return Err(Error::InvalidRequest("prompt must not be empty".to_string()));
    }

    let record = state
        .dispatcher
        .dispatch(req.prompt, req.mode.unwrap_or_default(), req.timeout)
        .await;

    Ok(Json(record))
}

/// All commands, newest first
pub async fn list_commands(State(state): State<AppState>) -> Result<Json<Vec<CommandRecord>>> {
    Ok(Json(state.store.list().await))
}

/// Fetch one command by id
pub async fn get_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CommandRecord>> {
    state
        .store
        .get(&id)
        .await
        .map(Json)
        .ok_or(Error::CommandNotFound(id))
}

/// Clear the whole command history
pub async fn clear_commands(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    state.store.clear().await;
    Ok(Json(serde_json::json!({ "success": true })))
}

//! Agent registry HTTP handlers

use axum::{
    extract::{Path, State},
    Json,
};
use kalirelay_protocol::UiEvent;
use serde::Deserialize;

use crate::domain::agent::AgentRecord;
use crate::{AppState, Error, Result};

/// Create agent request
#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
}

/// Register a new agent and issue its token
pub async fn create_agent(
    State(state): State<AppState>,
    Json(req): Json<CreateAgentRequest>,
) -> Result<Json<AgentRecord>> {
    if req.name.trim().is_empty() {
        return Err(Error::InvalidRequest("name must not be empty".to_string()));
    }
    let record = state.registry.register(req.name).await;
    Ok(Json(record))
}

/// List registered agents
pub async fn list_agents(State(state): State<AppState>) -> Result<Json<Vec<AgentRecord>>> {
    Ok(Json(state.registry.list().await))
}

/// Delete an agent; a live connection is severed as part of the delete
pub async fn delete_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let was_connected = state
        .registry
        .get(&id)
        .await
        .map(|r| r.connected)
        .unwrap_or(false);

    if !state.registry.delete(&id).await {
        return Err(Error::AgentNotFound(id));
    }

    if was_connected {
        state
            .events
            .publish(UiEvent::KaliDisconnected { client_id: id });
    }

    Ok(Json(serde_json::json!({ "success": true })))
}

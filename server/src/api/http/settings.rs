//! Settings HTTP handlers

use axum::{extract::State, Json};

use crate::service::settings::{AppSettings, SettingsPatch};
use crate::{AppState, Result};

pub async fn get_settings(State(state): State<AppState>) -> Result<Json<AppSettings>> {
    Ok(Json(state.settings.get().await))
}

pub async fn update_settings(
    State(state): State<AppState>,
    Json(patch): Json<SettingsPatch>,
) -> Result<Json<AppSettings>> {
    Ok(Json(state.settings.update(patch).await))
}

//! HTTP API handlers

mod agents;
mod commands;
mod health;
mod settings;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::ws;
use crate::AppState;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Command routes
        .route("/commands/execute", post(commands::execute_command))
        .route("/commands", get(commands::list_commands))
        .route("/commands", delete(commands::clear_commands))
        .route("/commands/{id}", get(commands::get_command))
        // Agent routes
        .route("/agents", post(agents::create_agent))
        .route("/agents", get(agents::list_agents))
        .route("/agents/{id}", delete(agents::delete_agent))
        // Settings routes
        .route("/settings", get(settings::get_settings))
        .route("/settings", post(settings::update_settings));

    Router::new()
        .nest("/api", api_routes)
        // Event feed for browser listeners
        .route("/ws", get(ws::ui::ws_handler))
        // Remote-agent protocol endpoint
        .route("/agent-ws", get(ws::agent::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

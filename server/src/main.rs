//! Kalirelay dispatch server
//!
//! Turns natural-language requests into Kali Linux commands via the Gemini
//! API, runs them locally or relays them to a WebSocket-connected remote
//! agent, and streams results to browser listeners and optionally Telegram.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod domain;
mod error;
mod infra;
mod service;

pub use config::Config;
pub use error::{Error, Result};

use infra::agent_registry::AgentRegistry;
use infra::command_store::CommandStore;
use infra::events::EventHub;
use service::dispatcher::Dispatcher;
use service::executor::LocalExecutor;
use service::generator::GeminiGenerator;
use service::settings::SettingsService;
use service::telegram::TelegramNotifier;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<CommandStore>,
    pub registry: Arc<AgentRegistry>,
    pub events: Arc<EventHub>,
    pub settings: Arc<SettingsService>,
    pub dispatcher: Arc<Dispatcher>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(Config::load()?);

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let http_addr: SocketAddr = format!("{}:{}", config.http_host, config.http_port).parse()?;

    info!("Starting Kalirelay Server");
    info!("HTTP listening on {}", http_addr);

    // Initialize infrastructure
    let store = Arc::new(CommandStore::new());
    let registry = Arc::new(AgentRegistry::new());
    let events = Arc::new(EventHub::new());
    let settings = Arc::new(SettingsService::new());

    // Initialize services
    let generator = Arc::new(GeminiGenerator::new(
        config.gemini_base_url.clone(),
        config.gemini_model.clone(),
        config.gemini_api_key.clone(),
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        registry.clone(),
        events.clone(),
        generator,
        LocalExecutor::new(),
        settings.clone(),
        config.local_timeout_secs,
        config.remote_timeout_secs,
    ));

    TelegramNotifier::new(
        config.telegram_base_url.clone(),
        settings.clone(),
        store.clone(),
    )
    .spawn(&events);

    let state = AppState {
        config: config.clone(),
        store,
        registry,
        events,
        settings,
        dispatcher,
    };

    let app = api::http::create_router(state);

    axum::serve(
        tokio::net::TcpListener::bind(http_addr).await?,
        app.into_make_service(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal");
}

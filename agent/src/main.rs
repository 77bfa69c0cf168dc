//! Kalirelay remote execution agent
//!
//! Connects out to the dispatch server over WebSocket, authenticates with a
//! pre-shared token, and executes relayed shell commands on this host.

use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod connection;
mod executor;

use connection::ConnectionManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let server_url = std::env::var("KALIRELAY_SERVER_URL")
        .unwrap_or_else(|_| "ws://127.0.0.1:5000/agent-ws".to_string());
    let token = std::env::var("KALIRELAY_TOKEN")
        .map_err(|_| anyhow::anyhow!("KALIRELAY_TOKEN must be set"))?;

    info!("Starting Kalirelay Agent");
    info!("Server: {}", server_url);

    let mut manager = ConnectionManager::new(server_url, token);
    manager.run().await
}

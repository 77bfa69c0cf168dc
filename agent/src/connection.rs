//! Server connection management

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use kalirelay_protocol::{AgentMessage, ServerMessage};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::executor;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const RECONNECT_INITIAL_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection manager for communicating with the server
pub struct ConnectionManager {
    server_url: String,
    token: String,
}

impl ConnectionManager {
    /// Create a new connection manager
    pub fn new(server_url: String, token: String) -> Self {
        Self { server_url, token }
    }

    /// Run the connection manager until ctrl-c
    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.run_until(tokio::signal::ctrl_c()).await
    }

    /// Connection loop with an external shutdown future
    async fn run_until<F>(&mut self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future,
    {
        tokio::pin!(shutdown);
        let mut reconnect_delay = RECONNECT_INITIAL_DELAY;

        loop {
            tokio::select! {
                result = self.connect_and_run() => {
                    match result {
                        Ok(_) => {
                            info!("Connection closed normally");
                            info!("Reconnecting in {:?}...", reconnect_delay);
                            sleep(reconnect_delay).await;
                            reconnect_delay = RECONNECT_INITIAL_DELAY;
                        }
                        Err(e) => {
                            error!("Connection error: {}", e);
                            info!("Reconnecting in {:?}...", reconnect_delay);
                            sleep(reconnect_delay).await;

                            // Exponential backoff
                            reconnect_delay =
                                std::cmp::min(reconnect_delay * 2, RECONNECT_MAX_DELAY);
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Connect to server and run message loop
    async fn connect_and_run(&self) -> anyhow::Result<()> {
        info!("Connecting to server: {}", self.server_url);

        let (ws, _) = timeout(CONNECT_TIMEOUT, connect_async(&self.server_url)).await??;
        let (mut ws_tx, mut ws_rx) = ws.split();

        // Outbound channel shared by the heartbeat task and command results
        let (tx, mut rx) = mpsc::channel::<AgentMessage>(100);

        let send_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        });

        // Authenticate before anything else
        let hostname = hostname();
        info!("Authenticating as {}", hostname);
        tx.send(AgentMessage::Auth {
            token: self.token.clone(),
            hostname: Some(hostname),
            os: Some(std::env::consts::OS.to_string()),
        })
        .await?;

        let auth_response = timeout(AUTH_TIMEOUT, ws_rx.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("No auth response"))??;

        match parse_server_message(&auth_response) {
            Some(ServerMessage::AuthSuccess { client_id }) => {
                info!("Authenticated, client id: {}", client_id);
            }
            Some(ServerMessage::AuthFailed { error }) => {
                anyhow::bail!("Authentication failed: {}", error);
            }
            _ => anyhow::bail!("Unexpected response to auth"),
        }

        // Spawn heartbeat task
        let tx_heartbeat = tx.clone();
        let heartbeat_handle = tokio::spawn(async move {
            let mut interval = interval(HEARTBEAT_INTERVAL);
            loop {
                interval.tick().await;
                if tx_heartbeat.send(AgentMessage::Ping {}).await.is_err() {
                    break;
                }
            }
        });

        // Process incoming messages
        while let Some(msg_result) = ws_rx.next().await {
            let frame = msg_result?;
            if let Message::Close(_) = frame {
                break;
            }

            let msg = match parse_server_message(&frame) {
                Some(msg) => msg,
                None => continue,
            };

            match msg {
                ServerMessage::Execute {
                    command_id,
                    command,
                } => {
                    debug!("Received execute: {}", command_id);
                    let tx = tx.clone();

                    tokio::spawn(async move {
                        let (output, exit_code) = executor::run(&command).await;
                        let _ = tx
                            .send(AgentMessage::Result {
                                command_id,
                                output,
                                exit_code,
                            })
                            .await;
                    });
                }
                ServerMessage::Pong {} => {
                    debug!("Pong received");
                }
                // Auth outcomes only arrive during the handshake above
                ServerMessage::AuthSuccess { .. } | ServerMessage::AuthFailed { .. } => {}
            }
        }

        heartbeat_handle.abort();
        send_task.abort();
        Ok(())
    }
}

fn parse_server_message(frame: &Message) -> Option<ServerMessage> {
    let text = match frame {
        Message::Text(text) => text.as_str(),
        _ => return None,
    };
    match serde_json::from_str(text) {
        Ok(msg) => Some(msg),
        Err(e) => {
            warn!("Unparsable server message: {}", e);
            None
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "kali".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_future_stops_the_reconnect_loop() {
        // An unreachable server keeps the loop in its retry path; the
        // already-resolved shutdown future must win immediately
        let mut manager = ConnectionManager::new(
            "ws://127.0.0.1:1/agent-ws".to_string(),
            "token".to_string(),
        );

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            manager.run_until(std::future::ready(())),
        )
        .await;

        assert!(result.is_ok(), "shutdown did not stop the loop");
        assert!(result.unwrap().is_ok());
    }
}

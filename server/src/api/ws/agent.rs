//! Remote-agent protocol endpoint
//!
//! One connection per agent. The first message must be `auth`; an invalid
//! token gets `auth_failed` and the connection is closed without retry.
//! After authentication the connection carries `execute`/`result` traffic
//! and `ping`/`pong` liveness signals.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use kalirelay_protocol::{AgentMessage, ServerMessage, UiEvent};
use tokio::sync::{mpsc, Notify};
use tracing::{info, warn};

use crate::AppState;

const OUTBOUND_CHANNEL_CAPACITY: usize = 32;

/// How long queued frames (the auth_failed reply in particular) may take to
/// reach the socket before the handler gives up on a stuck peer.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// WebSocket upgrade handler for `/agent-ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("Agent attempting connection");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Outbound channel; a clone of the sender is registered with the agent
    // registry on successful authentication so the dispatcher can relay
    // execute messages here.
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTBOUND_CHANNEL_CAPACITY);

    // Signaled by the registry when the agent is deleted while connected
    let shutdown = Arc::new(Notify::new());

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to serialize server message: {}", e);
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Set once auth succeeds; everything below auth is refused until then
    let mut client_id: Option<String> = None;

    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            _ = shutdown.notified() => {
                info!("Connection closed by registry");
                break;
            }
        };

        let Some(result) = frame else { break };

        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("Agent connection error: {}", e);
                break;
            }
        };

        let msg: AgentMessage = match serde_json::from_str(&text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Unparsable agent message: {}", e);
                continue;
            }
        };

        match msg {
            AgentMessage::Auth { token, hostname, os } => {
                match state
                    .registry
                    .authenticate(&token, hostname, os, tx.clone(), shutdown.clone())
                    .await
                {
                    Ok(record) => {
                        client_id = Some(record.id.clone());
                        let _ = tx
                            .send(ServerMessage::AuthSuccess {
                                client_id: record.id.clone(),
                            })
                            .await;
                        state
                            .events
                            .publish(UiEvent::KaliConnected { client: record.info() });
                    }
                    Err(_) => {
                        let _ = tx
                            .send(ServerMessage::AuthFailed {
                                error: "Invalid token".to_string(),
                            })
                            .await;
                        break;
                    }
                }
            }

            AgentMessage::Result {
                command_id,
                output,
                exit_code,
            } => {
                if client_id.is_none() {
                    warn!("Result from unauthenticated connection, dropping");
                    continue;
                }
                state
                    .dispatcher
                    .handle_remote_result(&command_id, output, exit_code)
                    .await;
            }

            AgentMessage::Ping {} => {
                if let Some(id) = &client_id {
                    state.registry.touch(id).await;
                }
                let _ = tx.send(ServerMessage::Pong {}).await;
            }
        }
    }

    // Close, error and registry-driven shutdown all converge here: the
    // registry clears the connected flag and the live handles together.
    if let Some(id) = client_id {
        if state.registry.disconnect(&id).await.is_some() {
            state
                .events
                .publish(UiEvent::KaliDisconnected { client_id: id });
        }
    }

    // Closing our sender lets the forward task drain queued frames and
    // exit on its own; only a peer that stops reading gets cut off.
    drop(tx);
    if tokio::time::timeout(FLUSH_TIMEOUT, &mut send_task)
        .await
        .is_err()
    {
        send_task.abort();
    }

    info!("Agent connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::http::create_router;
    use crate::infra::agent_registry::AgentRegistry;
    use crate::infra::command_store::CommandStore;
    use crate::infra::events::EventHub;
    use crate::service::dispatcher::Dispatcher;
    use crate::service::executor::LocalExecutor;
    use crate::service::generator::MockCommandGenerator;
    use crate::service::settings::SettingsService;
    use crate::{AppState, Config};

    use tokio_tungstenite::{connect_async, tungstenite};

    async fn spawn_server() -> (AppState, String) {
        let store = Arc::new(CommandStore::new());
        let registry = Arc::new(AgentRegistry::new());
        let events = Arc::new(EventHub::new());
        let settings = Arc::new(SettingsService::new());
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            registry.clone(),
            events.clone(),
            Arc::new(MockCommandGenerator::new()),
            LocalExecutor::with_tools(&[]),
            settings.clone(),
            5,
            5,
        ));
        let state = AppState {
            config: Arc::new(Config::default()),
            store,
            registry,
            events,
            settings,
            dispatcher,
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = create_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service()).await.unwrap();
        });

        (state, format!("ws://{}/agent-ws", addr))
    }

    async fn next_json(
        ws: &mut (impl StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin),
    ) -> serde_json::Value {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("connection closed")
                .expect("websocket error");
            if let tungstenite::Message::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn invalid_token_gets_auth_failed_before_close() {
        let (_state, url) = spawn_server().await;

        let (mut ws, _) = connect_async(&url).await.unwrap();
        ws.send(tungstenite::Message::Text(
            serde_json::json!({ "type": "auth", "token": "bogus" })
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

        let reply = next_json(&mut ws).await;
        assert_eq!(reply["type"], "auth_failed");
    }

    #[tokio::test]
    async fn valid_token_authenticates_and_answers_ping() {
        let (state, url) = spawn_server().await;
        let agent = state.registry.register("ws-test".to_string()).await;

        let (mut ws, _) = connect_async(&url).await.unwrap();
        ws.send(tungstenite::Message::Text(
            serde_json::json!({ "type": "auth", "token": agent.token })
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

        let reply = next_json(&mut ws).await;
        assert_eq!(reply["type"], "auth_success");
        assert_eq!(reply["clientId"], agent.id);

        ws.send(tungstenite::Message::Text(
            serde_json::json!({ "type": "ping" }).to_string().into(),
        ))
        .await
        .unwrap();
        let reply = next_json(&mut ws).await;
        assert_eq!(reply["type"], "pong");
    }

    #[tokio::test]
    async fn deleting_a_connected_agent_closes_its_socket() {
        let (state, url) = spawn_server().await;
        let agent = state.registry.register("doomed".to_string()).await;

        let (mut ws, _) = connect_async(&url).await.unwrap();
        ws.send(tungstenite::Message::Text(
            serde_json::json!({ "type": "auth", "token": agent.token })
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
        let reply = next_json(&mut ws).await;
        assert_eq!(reply["type"], "auth_success");

        assert!(state.registry.delete(&agent.id).await);

        // The server ends the connection; the client sees a close frame or
        // the stream ending
        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match ws.next().await {
                    None | Some(Ok(tungstenite::Message::Close(_))) | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "socket stayed open after agent delete");
    }
}

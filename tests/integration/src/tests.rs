//! Integration tests for the Kalirelay Server
//!
//! These tests require a running server.
//! Run with: KALIRELAY_TEST_URL=http://127.0.0.1:5000 cargo test

use futures_util::{SinkExt, StreamExt};
use integration_tests::*;
use tokio_tungstenite::{connect_async, tungstenite::Message};

// ============================================================================
// Health Tests
// ============================================================================

#[tokio::test]
async fn test_health_check() {
    let config = TestConfig::new();

    let response = config
        .client
        .get(config.api_url("/health"))
        .send()
        .await
        .expect("Failed to send health request");

    assert!(
        response.status().is_success(),
        "Health check failed with status: {}",
        response.status()
    );

    let health: HealthResponse = response.json().await.expect("Failed to parse health response");
    assert_eq!(health.status, "healthy");
    assert!(!health.version.is_empty());
}

// ============================================================================
// Command Tests
// ============================================================================

#[tokio::test]
async fn test_execute_command_returns_pending_record() {
    let config = TestConfig::new();

    let request = ExecuteCommandRequest {
        prompt: "show the current user".to_string(),
        mode: Some("local".to_string()),
        ..Default::default()
    };

    let response = config
        .client
        .post(config.api_url("/commands/execute"))
        .json(&request)
        .send()
        .await
        .expect("Failed to dispatch command");

    assert!(
        response.status().is_success(),
        "Dispatch failed: {}",
        response.status()
    );

    let command: CommandResponse = response.json().await.expect("Failed to parse command");
    assert!(!command.id.is_empty());
    assert_eq!(command.prompt, "show the current user");
    assert_eq!(command.status, "pending");
    assert!(command.generated_command.is_none());
    assert!(command.exit_code.is_none());
}

#[tokio::test]
async fn test_execute_command_rejects_empty_prompt() {
    let config = TestConfig::new();

    let request = ExecuteCommandRequest {
        prompt: "   ".to_string(),
        ..Default::default()
    };

    let response = config
        .client
        .post(config.api_url("/commands/execute"))
        .json(&request)
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 400);

    let error: ErrorResponse = response.json().await.expect("Failed to parse error");
    assert_eq!(error.code, 1001);
}

#[tokio::test]
async fn test_list_commands_includes_dispatched_command() {
    let config = TestConfig::new();

    let request = ExecuteCommandRequest {
        prompt: "list open ports".to_string(),
        mode: Some("local".to_string()),
        ..Default::default()
    };

    let created: CommandResponse = config
        .client
        .post(config.api_url("/commands/execute"))
        .json(&request)
        .send()
        .await
        .expect("Failed to dispatch command")
        .json()
        .await
        .expect("Failed to parse command");

    let commands: Vec<CommandResponse> = config
        .client
        .get(config.api_url("/commands"))
        .send()
        .await
        .expect("Failed to list commands")
        .json()
        .await
        .expect("Failed to parse command list");

    assert!(commands.iter().any(|c| c.id == created.id));
}

#[tokio::test]
async fn test_get_command_by_id() {
    let config = TestConfig::new();

    let request = ExecuteCommandRequest {
        prompt: "print the hostname".to_string(),
        mode: Some("local".to_string()),
        ..Default::default()
    };

    let created: CommandResponse = config
        .client
        .post(config.api_url("/commands/execute"))
        .json(&request)
        .send()
        .await
        .expect("Failed to dispatch command")
        .json()
        .await
        .expect("Failed to parse command");

    let response = config
        .client
        .get(config.api_url(&format!("/commands/{}", created.id)))
        .send()
        .await
        .expect("Failed to get command");

    assert!(response.status().is_success());

    let command: CommandResponse = response.json().await.expect("Failed to parse command");
    assert_eq!(command.id, created.id);
    assert_eq!(command.prompt, "print the hostname");
}

#[tokio::test]
async fn test_get_unknown_command_is_404() {
    let config = TestConfig::new();

    let response = config
        .client
        .get(config.api_url(&format!("/commands/{}", uuid::Uuid::new_v4())))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 404);

    let error: ErrorResponse = response.json().await.expect("Failed to parse error");
    assert_eq!(error.code, 2001);
}

// ============================================================================
// Agent Tests
// ============================================================================

#[tokio::test]
async fn test_create_agent() {
    let config = TestConfig::new();

    let response = config
        .client
        .post(config.api_url("/agents"))
        .json(&CreateAgentRequest {
            name: "test-agent-create".to_string(),
        })
        .send()
        .await
        .expect("Failed to create agent");

    assert!(
        response.status().is_success(),
        "Create agent failed: {}",
        response.status()
    );

    let agent: AgentResponse = response.json().await.expect("Failed to parse agent");
    assert!(!agent.id.is_empty());
    assert!(!agent.token.is_empty());
    assert_eq!(agent.name, "test-agent-create");
    assert!(agent.filename.starts_with("kali-agent-test-agent-create-"));
    assert!(!agent.connected);

    cleanup_agent(&config, &agent.id).await;
}

#[tokio::test]
async fn test_list_agents() {
    let config = TestConfig::new();

    let created: AgentResponse = config
        .client
        .post(config.api_url("/agents"))
        .json(&CreateAgentRequest {
            name: "test-agent-list".to_string(),
        })
        .send()
        .await
        .expect("Failed to create agent")
        .json()
        .await
        .expect("Failed to parse agent");

    let agents: Vec<AgentResponse> = config
        .client
        .get(config.api_url("/agents"))
        .send()
        .await
        .expect("Failed to list agents")
        .json()
        .await
        .expect("Failed to parse agent list");

    assert!(agents.iter().any(|a| a.id == created.id));

    cleanup_agent(&config, &created.id).await;
}

#[tokio::test]
async fn test_delete_agent() {
    let config = TestConfig::new();

    let created: AgentResponse = config
        .client
        .post(config.api_url("/agents"))
        .json(&CreateAgentRequest {
            name: "test-agent-delete".to_string(),
        })
        .send()
        .await
        .expect("Failed to create agent")
        .json()
        .await
        .expect("Failed to parse agent");

    let response = config
        .client
        .delete(config.api_url(&format!("/agents/{}", created.id)))
        .send()
        .await
        .expect("Failed to delete agent");

    assert!(response.status().is_success());

    // Deleting again reports not found
    let response = config
        .client
        .delete(config.api_url(&format!("/agents/{}", created.id)))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 404);
}

// ============================================================================
// Settings Tests
// ============================================================================

#[tokio::test]
async fn test_settings_roundtrip() {
    let config = TestConfig::new();

    let response = config
        .client
        .get(config.api_url("/settings"))
        .send()
        .await
        .expect("Failed to get settings");

    assert!(response.status().is_success());
    let _: SettingsResponse = response.json().await.expect("Failed to parse settings");

    let updated: SettingsResponse = config
        .client
        .post(config.api_url("/settings"))
        .json(&serde_json::json!({ "telegramEnabled": false }))
        .send()
        .await
        .expect("Failed to update settings")
        .json()
        .await
        .expect("Failed to parse settings");

    assert!(!updated.telegram_enabled);
}

// ============================================================================
// Agent WebSocket Tests
// ============================================================================

#[tokio::test]
async fn test_agent_ws_rejects_invalid_token() {
    let config = TestConfig::new();

    let (mut ws, _) = connect_async(config.agent_ws_url())
        .await
        .expect("Failed to connect agent WebSocket");

    let auth = serde_json::json!({
        "type": "auth",
        "token": "not-a-real-token",
        "hostname": "test-host",
        "os": "linux",
    });
    ws.send(Message::Text(auth.to_string().into()))
        .await
        .expect("Failed to send auth");

    let frame = ws
        .next()
        .await
        .expect("Connection closed before auth reply")
        .expect("WebSocket error");

    let text = match frame {
        Message::Text(text) => text,
        other => panic!("Expected text frame, got {:?}", other),
    };

    let reply: serde_json::Value = serde_json::from_str(&text).expect("Unparsable reply");
    assert_eq!(reply["type"], "auth_failed");
}

#[tokio::test]
async fn test_agent_ws_auth_and_ping() {
    let config = TestConfig::new();

    let agent: AgentResponse = config
        .client
        .post(config.api_url("/agents"))
        .json(&CreateAgentRequest {
            name: "test-agent-ws".to_string(),
        })
        .send()
        .await
        .expect("Failed to create agent")
        .json()
        .await
        .expect("Failed to parse agent");

    let (mut ws, _) = connect_async(config.agent_ws_url())
        .await
        .expect("Failed to connect agent WebSocket");

    let auth = serde_json::json!({
        "type": "auth",
        "token": agent.token,
        "hostname": "test-host",
        "os": "linux",
    });
    ws.send(Message::Text(auth.to_string().into()))
        .await
        .expect("Failed to send auth");

    let reply: serde_json::Value = next_json(&mut ws).await;
    assert_eq!(reply["type"], "auth_success");
    assert_eq!(reply["clientId"], agent.id);

    ws.send(Message::Text(
        serde_json::json!({ "type": "ping" }).to_string().into(),
    ))
    .await
    .expect("Failed to send ping");

    let reply: serde_json::Value = next_json(&mut ws).await;
    assert_eq!(reply["type"], "pong");

    cleanup_agent(&config, &agent.id).await;
}

async fn next_json<S>(ws: &mut S) -> serde_json::Value
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let frame = ws
            .next()
            .await
            .expect("Connection closed")
            .expect("WebSocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).expect("Unparsable frame");
        }
    }
}

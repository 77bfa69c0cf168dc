//! Shared helpers for the server integration tests

use serde::{Deserialize, Serialize};

/// Test configuration resolved from the environment
pub struct TestConfig {
    pub base_url: String,
    pub client: reqwest::Client,
}

impl TestConfig {
    pub fn new() -> Self {
        let base_url = std::env::var("KALIRELAY_TEST_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:5000".to_string());

        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Build a full URL for an API path
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    /// Build the agent WebSocket URL
    pub fn agent_ws_url(&self) -> String {
        format!(
            "{}/agent-ws",
            self.base_url.replacen("http", "ws", 1)
        )
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, Default)]
pub struct ExecuteCommandRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub id: String,
    pub prompt: String,
    pub generated_command: Option<String>,
    pub output: Option<String>,
    pub status: String,
    pub exit_code: Option<String>,
    pub execution_mode: String,
}

#[derive(Debug, Serialize)]
pub struct CreateAgentRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub id: String,
    pub name: String,
    pub token: String,
    pub filename: String,
    pub connected: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsResponse {
    pub personal_gemini_api_key: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub telegram_enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub code: u32,
    pub message: String,
}

/// Delete an agent, ignoring failures (used for cleanup)
pub async fn cleanup_agent(config: &TestConfig, id: &str) {
    let _ = config
        .client
        .delete(config.api_url(&format!("/agents/{}", id)))
        .send()
        .await;
}

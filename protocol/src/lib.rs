//! Wire messages for the kalirelay agent link and the browser event feed.
//!
//! All messages are JSON with a `type` tag. Payload fields are camelCase to
//! stay compatible with existing agent installations.

use serde::{Deserialize, Serialize};

/// Messages sent by a remote agent to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AgentMessage {
    /// First message on a new connection; the token was issued at registration.
    Auth {
        token: String,
        hostname: Option<String>,
        os: Option<String>,
    },
    /// Outcome of a previously relayed `execute` message.
    Result {
        command_id: String,
        output: String,
        exit_code: i32,
    },
    /// Liveness signal; refreshes the agent's last-seen timestamp.
    Ping {},
}

/// Messages sent by the server to a remote agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    AuthSuccess { client_id: String },
    AuthFailed { error: String },
    Execute { command_id: String, command: String },
    Pong {},
}

/// Connected-agent details carried in `kali_connected` events.
///
/// Deliberately excludes the auth token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    pub hostname: Option<String>,
    pub os: Option<String>,
}

/// Events broadcast to browser UI listeners.
///
/// Delivery is best-effort; listeners that miss events reconcile by
/// re-fetching the command list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum UiEvent {
    ExecutionStart {
        command_id: String,
    },
    CommandGenerated {
        command_id: String,
        command: String,
    },
    ExecutionRunning {
        command_id: String,
        mode: String,
    },
    ExecutionComplete {
        command_id: String,
        output: String,
        exit_code: i32,
    },
    ExecutionError {
        command_id: String,
        error: String,
    },
    KaliConnected {
        client: AgentInfo,
    },
    KaliDisconnected {
        client_id: String,
    },
}

//! Remote agent domain model

use chrono::{DateTime, Utc};
use kalirelay_protocol::AgentInfo;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered remote agent identity.
///
/// Created by token issuance, deleted explicitly. The `connected`,
/// `last_seen`, `hostname` and `os` fields are mutated by connection
/// lifecycle events, never by the record's own lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub id: String,

    pub name: String,

    /// Capability credential presented at authentication
    pub token: String,

    /// Derived installer artifact name offered for download
    pub filename: String,

    /// True iff a live connection for this agent currently exists
    pub connected: bool,

    pub last_seen: DateTime<Utc>,

    /// When the current connection was established; cleared on disconnect.
    /// The oldest connection wins when several agents are eligible.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,

    /// Supplied by the agent at authentication time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
}

impl AgentRecord {
    /// Register a new agent: fresh id, fresh token, derived artifact name
    pub fn new(name: String) -> Self {
        let id = Uuid::new_v4().to_string();
        let token = Uuid::new_v4().to_string();
        let sanitized: String = name
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        let filename = format!("kali-agent-{}-{}.py", sanitized, &id[..8]);

        Self {
            id,
            name,
            token,
            filename,
            connected: false,
            last_seen: Utc::now(),
            connected_at: None,
            hostname: None,
            os: None,
        }
    }

    /// Token-free summary carried in connection events
    pub fn info(&self) -> AgentInfo {
        AgentInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            hostname: self.hostname.clone(),
            os: self.os.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_agent_starts_disconnected_with_derived_filename() {
        let agent = AgentRecord::new("Lab Box 1".to_string());
        assert!(!agent.connected);
        assert!(agent.connected_at.is_none());
        assert!(agent.filename.starts_with("kali-agent-lab-box-1-"));
        assert!(agent.filename.ends_with(".py"));
        assert_ne!(agent.id, agent.token);
    }

    #[test]
    fn info_omits_the_token() {
        let agent = AgentRecord::new("box".to_string());
        let json = serde_json::to_value(agent.info()).unwrap();
        assert!(json.get("token").is_none());
        assert_eq!(json["name"], "box");
    }
}

//! Agent registry and live-connection pool
//!
//! Holds the registered agent identities, the map from agent id to the open
//! WebSocket's outbound channel, and the pending-result entries for in-flight
//! remote dispatches. The `connected` flag on a record and the presence of a
//! live sender are mutated together, inside one registry method, so they can
//! never disagree.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use kalirelay_protocol::ServerMessage;
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{info, warn};

use crate::domain::agent::AgentRecord;
use crate::error::{Error, Result};

/// Handles for one live agent connection: the outbound message channel and
/// the signal that tells the socket handler to close.
struct AgentConnection {
    tx: mpsc::Sender<ServerMessage>,
    shutdown: Arc<Notify>,
}

pub struct AgentRegistry {
    /// Registered agent identities, keyed by agent id
    records: RwLock<HashMap<String, AgentRecord>>,
    /// agent id -> handles of the live connection
    connections: DashMap<String, AgentConnection>,
    /// command id -> cancellation handle for an in-flight remote dispatch.
    /// Whichever side removes the entry first (result arrival or deadline
    /// timer) owns the terminal outcome; the loser sees an empty slot and
    /// backs off.
    pending_results: DashMap<String, ()>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            connections: DashMap::new(),
            pending_results: DashMap::new(),
        }
    }

    /// Issue a token for a new agent
    pub async fn register(&self, name: String) -> AgentRecord {
        let record = AgentRecord::new(name);
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        info!("Agent registered: {} ({})", record.name, record.id);
        record
    }

    pub async fn get(&self, id: &str) -> Option<AgentRecord> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<AgentRecord> {
        let mut records: Vec<AgentRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    /// Delete an agent record and sever its live connection, if any
    pub async fn delete(&self, id: &str) -> bool {
        let removed = self.records.write().await.remove(id).is_some();
        if removed {
            // Tell the socket handler to close; its cleanup path no-ops
            // because the record is already gone
            if let Some((_, conn)) = self.connections.remove(id) {
                conn.shutdown.notify_one();
            }
            info!("Agent deleted: {}", id);
        }
        removed
    }

    /// Authenticate a connecting agent by token (linear scan; the registry
    /// holds a handful of entries at most).
    ///
    /// On success the record is marked connected, the connection's handles
    /// are stored, and the updated record is returned.
    pub async fn authenticate(
        &self,
        token: &str,
        hostname: Option<String>,
        os: Option<String>,
        tx: mpsc::Sender<ServerMessage>,
        shutdown: Arc<Notify>,
    ) -> Result<AgentRecord> {
        let mut records = self.records.write().await;
        let record = records
            .values_mut()
            .find(|r| r.token == token)
            .ok_or(Error::InvalidAgentToken)?;

        let now = Utc::now();
        record.connected = true;
        record.connected_at = Some(now);
        record.last_seen = now;
        record.hostname = hostname;
        record.os = os;

        self.connections
            .insert(record.id.clone(), AgentConnection { tx, shutdown });
        info!("Agent authenticated: {} ({})", record.name, record.id);
        Ok(record.clone())
    }

    /// Clear the connected flag and drop the live connection handles.
    ///
    /// Returns the record if it was connected, for event broadcasting.
    pub async fn disconnect(&self, id: &str) -> Option<AgentRecord> {
        self.connections.remove(id);
        let mut records = self.records.write().await;
        let record = records.get_mut(id)?;
        if !record.connected {
            return None;
        }
        record.connected = false;
        record.connected_at = None;
        info!("Agent disconnected: {} ({})", record.name, record.id);
        Some(record.clone())
    }

    /// Refresh an agent's last-seen timestamp (ping handling)
    pub async fn touch(&self, id: &str) {
        if let Some(record) = self.records.write().await.get_mut(id) {
            record.last_seen = Utc::now();
        }
    }

    /// The remote agent a new dispatch should address, if any.
    ///
    /// When several agents are connected the oldest connection wins; callers
    /// must not depend on the choice.
    pub async fn connected_agent(&self) -> Option<AgentRecord> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.connected)
            .min_by_key(|r| r.connected_at)
            .cloned()
    }

    pub fn connected_count(&self) -> usize {
        self.connections.len()
    }

    /// Relay an `execute` message over an agent's live connection
    pub async fn send_execute(&self, agent_id: &str, command_id: &str, command: &str) -> Result<()> {
        let tx = self
            .connections
            .get(agent_id)
            .map(|entry| entry.value().tx.clone())
            .ok_or(Error::NoAgentConnected)?;

        tx.send(ServerMessage::Execute {
            command_id: command_id.to_string(),
            command: command.to_string(),
        })
        .await
        .map_err(|_| Error::AgentCommunicationError("Failed to send execute message".to_string()))
    }

    /// Mark a remote dispatch as awaiting its result
    pub fn park_pending(&self, command_id: &str) {
        self.pending_results.insert(command_id.to_string(), ());
    }

    /// Claim the pending entry for a command. Exactly one caller gets `true`
    /// per dispatch; a late result or an already-resolved timer gets `false`.
    pub fn claim_pending(&self, command_id: &str) -> bool {
        let claimed = self.pending_results.remove(command_id).is_some();
        if !claimed {
            warn!("No pending remote dispatch for command {}", command_id);
        }
        claimed
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn sender() -> mpsc::Sender<ServerMessage> {
        mpsc::channel(8).0
    }

    fn shutdown() -> Arc<Notify> {
        Arc::new(Notify::new())
    }

    #[tokio::test]
    async fn authenticate_with_valid_token_marks_connected() {
        let registry = AgentRegistry::new();
        let issued = registry.register("kali-1".to_string()).await;

        let (tx, _rx) = mpsc::channel(8);
        let authed = registry
            .authenticate(&issued.token, Some("kali".to_string()), None, tx, shutdown())
            .await
            .unwrap();

        assert!(authed.connected);
        assert_eq!(authed.hostname.as_deref(), Some("kali"));
        assert_eq!(registry.connected_count(), 1);
        // Record and live map agree
        assert!(registry.get(&issued.id).await.unwrap().connected);
    }

    #[tokio::test]
    async fn authenticate_with_bad_token_fails() {
        let registry = AgentRegistry::new();
        registry.register("kali-1".to_string()).await;

        let result = registry
            .authenticate("not-a-token", None, None, sender(), shutdown())
            .await;
        assert!(matches!(result, Err(Error::InvalidAgentToken)));
        assert_eq!(registry.connected_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_clears_flag_and_connection_atomically() {
        let registry = AgentRegistry::new();
        let issued = registry.register("kali-1".to_string()).await;
        registry
            .authenticate(&issued.token, None, None, sender(), shutdown())
            .await
            .unwrap();

        let disconnected = registry.disconnect(&issued.id).await.unwrap();
        assert!(!disconnected.connected);
        assert_eq!(registry.connected_count(), 0);
        assert!(registry.connected_agent().await.is_none());

        // Second disconnect is a no-op
        assert!(registry.disconnect(&issued.id).await.is_none());
    }

    #[tokio::test]
    async fn oldest_connection_wins_selection() {
        let registry = AgentRegistry::new();
        let first = registry.register("a".to_string()).await;
        let second = registry.register("b".to_string()).await;

        registry
            .authenticate(&first.token, None, None, sender(), shutdown())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        registry
            .authenticate(&second.token, None, None, sender(), shutdown())
            .await
            .unwrap();

        assert_eq!(registry.connected_agent().await.unwrap().id, first.id);

        // When the oldest drops, the next oldest takes over
        registry.disconnect(&first.id).await;
        assert_eq!(registry.connected_agent().await.unwrap().id, second.id);
    }

    #[tokio::test]
    async fn pending_entry_is_claimed_exactly_once() {
        let registry = AgentRegistry::new();
        registry.park_pending("cmd-1");

        assert!(registry.claim_pending("cmd-1"));
        assert!(!registry.claim_pending("cmd-1"));
        assert!(!registry.claim_pending("never-parked"));
    }

    #[tokio::test]
    async fn delete_severs_live_connection() {
        let registry = AgentRegistry::new();
        let issued = registry.register("kali-1".to_string()).await;
        registry
            .authenticate(&issued.token, None, None, sender(), shutdown())
            .await
            .unwrap();

        assert!(registry.delete(&issued.id).await);
        assert_eq!(registry.connected_count(), 0);
        assert!(registry.get(&issued.id).await.is_none());
    }

    #[tokio::test]
    async fn delete_signals_the_live_connection_to_close() {
        let registry = AgentRegistry::new();
        let issued = registry.register("kali-1".to_string()).await;
        let close_signal = shutdown();
        registry
            .authenticate(&issued.token, None, None, sender(), close_signal.clone())
            .await
            .unwrap();

        assert!(registry.delete(&issued.id).await);

        // The stored permit lets the waiter observe the signal even if it
        // starts waiting after the delete
        assert!(
            timeout(Duration::from_millis(100), close_signal.notified())
                .await
                .is_ok(),
            "delete must signal the socket handler to close"
        );
    }
}

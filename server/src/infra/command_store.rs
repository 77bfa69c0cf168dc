//! In-memory command store
//!
//! No persistence: records live until an explicit clear-all and are lost on
//! restart. The dispatcher alone is responsible for legal status
//! transitions; the store only refuses mutation of terminal records.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::warn;

use crate::domain::command::{CommandPatch, CommandRecord, ExecutionMode};

/// Registry of command records keyed by id
pub struct CommandStore {
    commands: RwLock<HashMap<String, CommandRecord>>,
}

impl CommandStore {
    pub fn new() -> Self {
        Self {
            commands: RwLock::new(HashMap::new()),
        }
    }

    /// Create a new pending command record
    pub async fn create(
        &self,
        prompt: String,
        mode: ExecutionMode,
        timeout: Option<u64>,
    ) -> CommandRecord {
        let record = CommandRecord::new(prompt, mode, timeout);
        self.commands
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        record
    }

    pub async fn get(&self, id: &str) -> Option<CommandRecord> {
        self.commands.read().await.get(id).cloned()
    }

    /// Merge a patch into a record.
    ///
    /// Terminal records are never mutated; the current record is returned
    /// unchanged so that a late outcome is a no-op for the caller.
    pub async fn update(&self, id: &str, patch: CommandPatch) -> Option<CommandRecord> {
        let mut commands = self.commands.write().await;
        let record = commands.get_mut(id)?;

        if record.is_terminal() {
            warn!(
                "Ignoring update to terminal command {} ({})",
                id,
                record.status.as_str()
            );
            return Some(record.clone());
        }

        if let Some(generated) = patch.generated_command {
            record.generated_command = Some(generated);
        }
        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(output) = patch.output {
            record.output = Some(output);
        }
        if let Some(exit_code) = patch.exit_code {
            record.exit_code = Some(exit_code);
        }
        if let Some(mode) = patch.execution_mode {
            record.execution_mode = mode;
        }

        Some(record.clone())
    }

    /// All records, newest first
    pub async fn list(&self) -> Vec<CommandRecord> {
        let mut records: Vec<CommandRecord> =
            self.commands.read().await.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// Remove every record unconditionally
    pub async fn clear(&self) {
        self.commands.write().await.clear();
    }
}

impl Default for CommandStore {
    fn default() -> Self {
        Self::new()
    }
}

//! Command domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Command status
///
/// Progression is strictly forward: `pending -> validating -> executing ->
/// {completed | error}`. `completed` and `error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Created, waiting for command generation
    Pending,
    /// Command generated, safety verdict outstanding
    Validating,
    /// Running locally or relayed to a remote agent
    Executing,
    /// Finished with exit code 0
    Completed,
    /// Finished with a failure of any class
    Error,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Validating => "validating",
            CommandStatus::Executing => "executing",
            CommandStatus::Completed => "completed",
            CommandStatus::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CommandStatus::Pending),
            "validating" => Some(CommandStatus::Validating),
            "executing" => Some(CommandStatus::Executing),
            "completed" => Some(CommandStatus::Completed),
            "error" => Some(CommandStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Completed | CommandStatus::Error)
    }

    /// Whether moving to `next` follows an edge of the lifecycle state machine
    pub fn can_transition_to(&self, next: CommandStatus) -> bool {
        match (self, next) {
            // From Pending
            (CommandStatus::Pending, CommandStatus::Validating) => true,
            (CommandStatus::Pending, CommandStatus::Error) => true,
            // From Validating
            (CommandStatus::Validating, CommandStatus::Executing) => true,
            (CommandStatus::Validating, CommandStatus::Error) => true,
            // From Executing
            (CommandStatus::Executing, CommandStatus::Completed) => true,
            (CommandStatus::Executing, CommandStatus::Error) => true,
            // No other transitions allowed
            _ => false,
        }
    }
}

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Remote if an agent is connected, otherwise local
    Auto,
    Local,
    Remote,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Auto => "auto",
            ExecutionMode::Local => "local",
            ExecutionMode::Remote => "remote",
        }
    }
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Auto
    }
}

/// Command entity
///
/// One record per dispatch request; lives in memory until an explicit
/// clear-all.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    /// Unique identifier, assigned at creation
    pub id: String,

    /// Original natural-language request
    pub prompt: String,

    /// Shell command produced by the generator; None until generation completes
    pub generated_command: Option<String>,

    /// Current lifecycle status
    pub status: CommandStatus,

    /// Captured output; None until execution finishes
    pub output: Option<String>,

    /// String-encoded exit code: "0" success, "-1" generation/safety failure,
    /// "124" timeout, "127" tool not found
    pub exit_code: Option<String>,

    /// Requested mode, overwritten with the concrete path once chosen
    pub execution_mode: ExecutionMode,

    /// Caller-requested timeout in seconds; None means the default applies
    pub timeout: Option<u64>,

    /// Creation timestamp; newest-first ordering key
    pub created_at: DateTime<Utc>,
}

impl CommandRecord {
    /// Create a new pending command
    pub fn new(prompt: String, mode: ExecutionMode, timeout: Option<u64>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            prompt,
            generated_command: None,
            status: CommandStatus::Pending,
            output: None,
            exit_code: None,
            execution_mode: mode,
            timeout,
            created_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Partial update applied by the dispatcher as a command progresses
#[derive(Debug, Clone, Default)]
pub struct CommandPatch {
    pub generated_command: Option<String>,
    pub status: Option<CommandStatus>,
    pub output: Option<String>,
    pub exit_code: Option<String>,
    pub execution_mode: Option<ExecutionMode>,
}

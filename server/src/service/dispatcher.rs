//! Command dispatcher
//!
//! The core state machine: takes a dispatch request, drives the command
//! record through `pending -> validating -> executing -> {completed|error}`,
//! chooses the execution path, enforces timeouts, and reconciles completion
//! from the two result sources (local subprocess exit, asynchronous remote
//! result message). Every failure is recovered here into a terminal record
//! plus a broadcast event; nothing escapes to the caller.

use std::sync::Arc;
use std::time::Duration;

use kalirelay_protocol::UiEvent;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::domain::agent::AgentRecord;
use crate::domain::command::{CommandPatch, CommandRecord, CommandStatus, ExecutionMode};
use crate::infra::agent_registry::AgentRegistry;
use crate::infra::command_store::CommandStore;
use crate::infra::events::EventHub;
use crate::service::executor::LocalExecutor;
use crate::service::generator::CommandGenerator;
use crate::service::settings::SettingsService;

pub struct Dispatcher {
    store: Arc<CommandStore>,
    registry: Arc<AgentRegistry>,
    events: Arc<EventHub>,
    generator: Arc<dyn CommandGenerator>,
    executor: LocalExecutor,
    settings: Arc<SettingsService>,
    local_timeout_secs: u64,
    remote_timeout_secs: u64,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<CommandStore>,
        registry: Arc<AgentRegistry>,
        events: Arc<EventHub>,
        generator: Arc<dyn CommandGenerator>,
        executor: LocalExecutor,
        settings: Arc<SettingsService>,
        local_timeout_secs: u64,
        remote_timeout_secs: u64,
    ) -> Self {
        Self {
            store,
            registry,
            events,
            generator,
            executor,
            settings,
            local_timeout_secs,
            remote_timeout_secs,
        }
    }

    /// Create a pending command and start the pipeline.
    ///
    /// Returns immediately with the fresh record; progress is observed via
    /// the command store and the event feed.
    pub async fn dispatch(
        self: Arc<Self>,
        prompt: String,
        mode: ExecutionMode,
        timeout_secs: Option<u64>,
    ) -> CommandRecord {
        let record = self.store.create(prompt, mode, timeout_secs).await;

        let dispatcher = self.clone();
        let command_id = record.id.clone();
        tokio::spawn(async move {
            dispatcher.run_pipeline(command_id).await;
        });

        record
    }

    async fn run_pipeline(self: Arc<Self>, command_id: String) {
        let Some(record) = self.store.get(&command_id).await else {
            error!("Dispatched command {} vanished from the store", command_id);
            return;
        };

        self.events.publish(UiEvent::ExecutionStart {
            command_id: command_id.clone(),
        });

        let api_key = self.settings.get().await.personal_gemini_api_key;

        // Step 1: prompt -> command
        let generated = match self.generator.generate(&record.prompt, api_key.clone()).await {
            Ok(command) => command,
            Err(e) => {
                self.fail(&command_id, e.to_string(), "-1").await;
                return;
            }
        };

        self.store
            .update(
                &command_id,
                CommandPatch {
                    generated_command: Some(generated.clone()),
                    status: Some(CommandStatus::Validating),
                    ..Default::default()
                },
            )
            .await;

        self.events.publish(UiEvent::CommandGenerated {
            command_id: command_id.clone(),
            command: generated.clone(),
        });

        // Step 2: safety verdict
        let verdict = match self.generator.assess_safety(&generated, api_key).await {
            Ok(verdict) => verdict,
            Err(e) => {
                self.fail(&command_id, e.to_string(), "-1").await;
                return;
            }
        };

        if !verdict.safe {
            let reason = verdict.reason.unwrap_or_else(|| "unspecified".to_string());
            self.store
                .update(
                    &command_id,
                    CommandPatch {
                        status: Some(CommandStatus::Error),
                        output: Some(format!("Command blocked for safety reasons: {}", reason)),
                        exit_code: Some("-1".to_string()),
                        ..Default::default()
                    },
                )
                .await;
            self.events.publish(UiEvent::ExecutionError {
                command_id: command_id.clone(),
                error: reason,
            });
            return;
        }

        // Step 3: choose the execution path
        let target = self.registry.connected_agent().await;
        match (record.execution_mode, target) {
            (ExecutionMode::Remote, Some(agent)) => {
                self.run_remote(&command_id, &generated, agent, record.timeout)
                    .await;
            }
            (ExecutionMode::Remote, None) => {
                // Forced remote never falls back silently
                self.fail(&command_id, "No remote agent connected".to_string(), "-1")
                    .await;
            }
            (ExecutionMode::Auto, Some(agent)) => {
                self.run_remote(&command_id, &generated, agent, record.timeout)
                    .await;
            }
            (ExecutionMode::Auto, None) | (ExecutionMode::Local, _) => {
                self.run_local(&command_id, &generated, record.timeout).await;
            }
        }
    }

    /// Local path: allow-list fast-fail, then a shell subprocess
    async fn run_local(&self, command_id: &str, command: &str, timeout_secs: Option<u64>) {
        if !self.executor.is_tool_available(command) {
            let base = LocalExecutor::base_command(command);
            self.store
                .update(
                    command_id,
                    CommandPatch {
                        status: Some(CommandStatus::Error),
                        output: Some(format!(
                            "Tool '{}' not available. Connect a Kali Linux agent or install the tool locally.",
                            base
                        )),
                        exit_code: Some("127".to_string()),
                        execution_mode: Some(ExecutionMode::Local),
                        ..Default::default()
                    },
                )
                .await;
            self.events.publish(UiEvent::ExecutionError {
                command_id: command_id.to_string(),
                error: format!("Tool not found: {}", base),
            });
            return;
        }

        self.store
            .update(
                command_id,
                CommandPatch {
                    status: Some(CommandStatus::Executing),
                    execution_mode: Some(ExecutionMode::Local),
                    ..Default::default()
                },
            )
            .await;
        self.events.publish(UiEvent::ExecutionRunning {
            command_id: command_id.to_string(),
            mode: "local".to_string(),
        });

        let deadline = timeout_secs.unwrap_or(self.local_timeout_secs);
        let result = self.executor.run(command, deadline).await;

        // A kill-for-timeout is reported as 124, never as the process's own
        // exit code
        let (output, exit_code) = if result.timed_out {
            (
                format!("Command execution timeout ({}s)", deadline),
                124,
            )
        } else {
            (result.output, result.exit_code)
        };

        self.finalize(command_id, output, exit_code).await;
    }

    /// Remote path: relay over the agent's connection and arm the deadline
    async fn run_remote(
        self: Arc<Self>,
        command_id: &str,
        command: &str,
        agent: AgentRecord,
        timeout_secs: Option<u64>,
    ) {
        self.store
            .update(
                command_id,
                CommandPatch {
                    status: Some(CommandStatus::Executing),
                    execution_mode: Some(ExecutionMode::Remote),
                    ..Default::default()
                },
            )
            .await;
        self.events.publish(UiEvent::ExecutionRunning {
            command_id: command_id.to_string(),
            mode: "remote".to_string(),
        });

        // Park before sending so a fast result cannot race the entry
        self.registry.park_pending(command_id);

        if let Err(e) = self.registry.send_execute(&agent.id, command_id, command).await {
            self.registry.claim_pending(command_id);
            self.fail(command_id, e.to_string(), "-1").await;
            return;
        }

        info!("Relayed command {} to agent {}", command_id, agent.id);

        let deadline = timeout_secs.unwrap_or(self.remote_timeout_secs);
        let dispatcher = self.clone();
        let command_id = command_id.to_string();
        tokio::spawn(async move {
            sleep(Duration::from_secs(deadline)).await;
            // The pending entry is the cancellation handle: if the result
            // already claimed it, the timer loses and does nothing.
            if dispatcher.registry.claim_pending(&command_id) {
                dispatcher
                    .store
                    .update(
                        &command_id,
                        CommandPatch {
                            status: Some(CommandStatus::Error),
                            output: Some(format!("Command execution timeout ({}s)", deadline)),
                            exit_code: Some("124".to_string()),
                            ..Default::default()
                        },
                    )
                    .await;
                dispatcher.events.publish(UiEvent::ExecutionError {
                    command_id: command_id.clone(),
                    error: "Timeout".to_string(),
                });
            }
        });
    }

    /// Apply a result message from a remote agent.
    ///
    /// First outcome wins: a result arriving after the deadline timer has
    /// finalized the record is a no-op.
    pub async fn handle_remote_result(&self, command_id: &str, output: String, exit_code: i32) {
        if !self.registry.claim_pending(command_id) {
            warn!("Dropping late or unknown remote result for {}", command_id);
            return;
        }
        self.finalize(command_id, output, exit_code).await;
    }

    /// Record a terminal outcome and broadcast it
    async fn finalize(&self, command_id: &str, output: String, exit_code: i32) {
        let status = if exit_code == 0 {
            CommandStatus::Completed
        } else {
            CommandStatus::Error
        };

        self.store
            .update(
                command_id,
                CommandPatch {
                    status: Some(status),
                    output: Some(output.clone()),
                    exit_code: Some(exit_code.to_string()),
                    ..Default::default()
                },
            )
            .await;

        if exit_code == 0 {
            self.events.publish(UiEvent::ExecutionComplete {
                command_id: command_id.to_string(),
                output,
                exit_code,
            });
        } else {
            self.events.publish(UiEvent::ExecutionError {
                command_id: command_id.to_string(),
                error: output,
            });
        }
    }

    /// Terminal failure with a generic error exit code
    async fn fail(&self, command_id: &str, message: String, exit_code: &str) {
        error!("Command {} failed: {}", command_id, message);
        self.store
            .update(
                command_id,
                CommandPatch {
                    status: Some(CommandStatus::Error),
                    output: Some(message.clone()),
                    exit_code: Some(exit_code.to_string()),
                    ..Default::default()
                },
            )
            .await;
        self.events.publish(UiEvent::ExecutionError {
            command_id: command_id.to_string(),
            error: message,
        });
    }
}

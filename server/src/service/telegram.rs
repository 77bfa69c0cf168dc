//! Telegram result notifications
//!
//! Best-effort push of terminal command outcomes to a configured chat.
//! Subscribes to the UI event hub; when Telegram is disabled in settings the
//! events are simply ignored. Bot onboarding and inbound command parsing are
//! out of scope.

use std::sync::Arc;

use kalirelay_protocol::UiEvent;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::infra::command_store::CommandStore;
use crate::infra::events::EventHub;
use crate::service::settings::SettingsService;

pub struct TelegramNotifier {
    client: reqwest::Client,
    base_url: String,
    settings: Arc<SettingsService>,
    store: Arc<CommandStore>,
}

impl TelegramNotifier {
    pub fn new(base_url: String, settings: Arc<SettingsService>, store: Arc<CommandStore>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            settings,
            store,
        }
    }

    /// Spawn the notifier loop on the event hub
    pub fn spawn(self, events: &EventHub) {
        let mut rx = events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => self.handle_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Telegram notifier lagged, skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    async fn handle_event(&self, event: UiEvent) {
        let command_id = match &event {
            UiEvent::ExecutionComplete { command_id, .. } => command_id.clone(),
            UiEvent::ExecutionError { command_id, .. } => command_id.clone(),
            _ => return,
        };

        let settings = self.settings.get().await;
        if !settings.telegram_enabled {
            return;
        }
        let (Some(token), Some(chat_id)) = (settings.telegram_bot_token, settings.telegram_chat_id)
        else {
            return;
        };

        let Some(record) = self.store.get(&command_id).await else {
            debug!("No record for notified command {}", command_id);
            return;
        };

        let text = format!(
            "Command finished ({})\nPrompt: {}\nCommand: {}\nExit code: {}\n\n{}",
            record.status.as_str(),
            record.prompt,
            record.generated_command.as_deref().unwrap_or("-"),
            record.exit_code.as_deref().unwrap_or("-"),
            record.output.as_deref().unwrap_or(""),
        );

        let url = format!("{}/bot{}/sendMessage", self.base_url, token);
        let result = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                info!("Telegram notification sent for command {}", command_id);
            }
            Ok(response) => {
                warn!(
                    "Telegram API returned {} for command {}",
                    response.status(),
                    command_id
                );
            }
            Err(e) => warn!("Telegram notification failed: {}", e),
        }
    }
}

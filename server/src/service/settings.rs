//! App settings
//!
//! Singleton in-memory settings record. Read-only from the dispatcher's
//! perspective; mutated only through the settings API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub personal_gemini_api_key: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub telegram_enabled: bool,
    pub updated_at: DateTime<Utc>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            personal_gemini_api_key: None,
            telegram_bot_token: None,
            telegram_chat_id: None,
            telegram_enabled: false,
            updated_at: Utc::now(),
        }
    }
}

/// Partial settings update; absent fields are left untouched
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub personal_gemini_api_key: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub telegram_enabled: Option<bool>,
}

pub struct SettingsService {
    inner: RwLock<AppSettings>,
}

impl SettingsService {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(AppSettings::default()),
        }
    }

    pub async fn get(&self) -> AppSettings {
        self.inner.read().await.clone()
    }

    pub async fn update(&self, patch: SettingsPatch) -> AppSettings {
        let mut settings = self.inner.write().await;
        if let Some(key) = patch.personal_gemini_api_key {
            settings.personal_gemini_api_key = if key.is_empty() { None } else { Some(key) };
        }
        if let Some(token) = patch.telegram_bot_token {
            settings.telegram_bot_token = if token.is_empty() { None } else { Some(token) };
        }
        if let Some(chat_id) = patch.telegram_chat_id {
            settings.telegram_chat_id = if chat_id.is_empty() { None } else { Some(chat_id) };
        }
        if let Some(enabled) = patch.telegram_enabled {
            settings.telegram_enabled = enabled;
        }
        settings.updated_at = Utc::now();
        settings.clone()
    }
}

impl Default for SettingsService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_merges_only_present_fields() {
        let service = SettingsService::new();

        service
            .update(SettingsPatch {
                personal_gemini_api_key: Some("key-1".to_string()),
                ..Default::default()
            })
            .await;

        let settings = service
            .update(SettingsPatch {
                telegram_enabled: Some(true),
                ..Default::default()
            })
            .await;

        assert_eq!(settings.personal_gemini_api_key.as_deref(), Some("key-1"));
        assert!(settings.telegram_enabled);
    }

    #[tokio::test]
    async fn empty_string_clears_a_key() {
        let service = SettingsService::new();
        service
            .update(SettingsPatch {
                personal_gemini_api_key: Some("key-1".to_string()),
                ..Default::default()
            })
            .await;

        let settings = service
            .update(SettingsPatch {
                personal_gemini_api_key: Some(String::new()),
                ..Default::default()
            })
            .await;

        assert!(settings.personal_gemini_api_key.is_none());
    }
}

//! Server configuration

use serde::Deserialize;

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server host
    #[serde(default = "default_http_host")]
    pub http_host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Default timeout for local command execution, in seconds
    #[serde(default = "default_local_timeout")]
    pub local_timeout_secs: u64,

    /// Default timeout for remote command execution, in seconds
    #[serde(default = "default_remote_timeout")]
    pub remote_timeout_secs: u64,

    /// Gemini API key used when no personal key is set in app settings
    #[serde(default)]
    pub gemini_api_key: Option<String>,

    /// Gemini model name
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,

    /// Gemini API base URL
    #[serde(default = "default_gemini_base_url")]
    pub gemini_base_url: String,

    /// Telegram Bot API base URL
    #[serde(default = "default_telegram_base_url")]
    pub telegram_base_url: String,
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    5000
}

fn default_local_timeout() -> u64 {
    120
}

fn default_remote_timeout() -> u64 {
    300
}

fn default_gemini_model() -> String {
    "gemini-2.5-pro".to_string()
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_telegram_base_url() -> String {
    "https://api.telegram.org".to_string()
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Config::default();

        if let Ok(val) = std::env::var("KALIRELAY_HTTP_HOST") {
            config.http_host = val;
        }
        if let Ok(val) = std::env::var("KALIRELAY_HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http_port = port;
            }
        }
        if let Ok(val) = std::env::var("KALIRELAY_LOCAL_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                config.local_timeout_secs = secs;
            }
        }
        if let Ok(val) = std::env::var("KALIRELAY_REMOTE_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                config.remote_timeout_secs = secs;
            }
        }
        if let Ok(val) = std::env::var("GEMINI_API_KEY") {
            if !val.is_empty() {
                config.gemini_api_key = Some(val);
            }
        }
        if let Ok(val) = std::env::var("KALIRELAY_GEMINI_MODEL") {
            config.gemini_model = val;
        }
        if let Ok(val) = std::env::var("KALIRELAY_GEMINI_BASE_URL") {
            config.gemini_base_url = val;
        }
        if let Ok(val) = std::env::var("KALIRELAY_TELEGRAM_BASE_URL") {
            config.telegram_base_url = val;
        }

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_host: default_http_host(),
            http_port: default_http_port(),
            local_timeout_secs: default_local_timeout(),
            remote_timeout_secs: default_remote_timeout(),
            gemini_api_key: None,
            gemini_model: default_gemini_model(),
            gemini_base_url: default_gemini_base_url(),
            telegram_base_url: default_telegram_base_url(),
        }
    }
}

//! Command generation via the Gemini API
//!
//! Turns a natural-language prompt into a Kali shell command and produces a
//! safety verdict for it. Transient API failures are retried with a linear
//! backoff; credential problems surface immediately with a hint pointing at
//! the settings page.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{Error, Result};

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_STEP: Duration = Duration::from_secs(1);

/// Safety verdict for a generated command
#[derive(Debug, Clone)]
pub struct SafetyVerdict {
    pub safe: bool,
    pub reason: Option<String>,
}

/// Prompt-to-command translation and safety assessment.
///
/// The dispatcher only ever talks to this trait; the Gemini client below is
/// the production implementation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandGenerator: Send + Sync {
    /// Translate a natural-language prompt into a single shell command
    async fn generate(&self, prompt: &str, api_key: Option<String>) -> Result<String>;

    /// Judge whether a generated command is safe to run
    async fn assess_safety(&self, command: &str, api_key: Option<String>) -> Result<SafetyVerdict>;
}

/// Gemini-backed generator
pub struct GeminiGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    default_api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SafetyResponse {
    #[serde(rename = "isSafe")]
    is_safe: bool,
    reason: Option<String>,
}

impl GeminiGenerator {
    pub fn new(base_url: String, model: String, default_api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            model,
            default_api_key,
        }
    }

    fn resolve_key(&self, api_key: Option<String>) -> Result<String> {
        api_key
            .or_else(|| self.default_api_key.clone())
            .ok_or_else(|| {
                Error::InvalidCredential(
                    "No Gemini API key configured. Set GEMINI_API_KEY or add a personal key in Settings".to_string(),
                )
            })
    }

    /// One generateContent call, returning the first candidate's text
    async fn generate_content(
        &self,
        api_key: &str,
        prompt: &str,
        json_response: bool,
    ) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, api_key
        );

        let mut body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
        });
        if json_response {
            body["generationConfig"] = json!({ "responseMimeType": "application/json" });
        }

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::GenerationFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_api_error(status.as_u16(), &text));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| Error::GenerationFailed(format!("Invalid API response: {}", e)))?;

        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .and_then(|p| p.text)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::GenerationFailed("Empty model output".to_string()))
    }

    /// generateContent with linear-backoff retries for transient failures
    async fn generate_content_with_retry(
        &self,
        api_key: &str,
        prompt: &str,
        json_response: bool,
    ) -> Result<String> {
        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.generate_content(api_key, prompt, json_response).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    if !is_transient(&e) || attempt == MAX_ATTEMPTS {
                        return Err(e);
                    }
                    warn!("Gemini API attempt {} failed, retrying: {}", attempt, e);
                    last_err = Some(e);
                    sleep(BACKOFF_STEP * attempt).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::GenerationFailed("Retries exhausted".to_string())))
    }
}

fn classify_api_error(status: u16, body: &str) -> Error {
    let lower = body.to_lowercase();
    if status == 400 && lower.contains("api key")
        || status == 401
        || status == 403
        || lower.contains("api_key_invalid")
    {
        Error::InvalidCredential(
            "The Gemini API rejected the key. Update it in Settings or via GEMINI_API_KEY"
                .to_string(),
        )
    } else {
        Error::GenerationFailed(format!("Gemini API error ({}): {}", status, body))
    }
}

fn is_transient(err: &Error) -> bool {
    match err {
        Error::GenerationFailed(msg) => {
            let lower = msg.to_lowercase();
            lower.contains("overloaded")
                || lower.contains("unavailable")
                || lower.contains("(429)")
                || lower.contains("(503)")
        }
        _ => false,
    }
}

/// Strip markdown code fences the model sometimes wraps commands in
fn clean_command(text: &str) -> String {
    let mut cleaned = text.trim();
    if let Some(rest) = cleaned.strip_prefix("```") {
        // Drop an optional language tag on the fence line
        cleaned = match rest.split_once('\n') {
            Some((_, body)) => body,
            None => rest,
        };
    }
    if let Some(body) = cleaned.trim_end().strip_suffix("```") {
        cleaned = body;
    }
    cleaned.trim().to_string()
}

fn generation_prompt(prompt: &str) -> String {
    format!(
        "You are a Kali Linux command expert. Convert the natural language request \
into a single Kali Linux shell command.\n\n\
Rules:\n\
1. Return ONLY the command, no explanations, no markdown, no code blocks\n\
2. Prefer safe, non-destructive commands\n\
3. For network reconnaissance use tools like nmap, netcat, whois, dig\n\
4. Include proper flags and options\n\
5. Do not include sudo unless strictly required\n\n\
Request: {}",
        prompt
    )
}

fn safety_prompt(command: &str) -> String {
    format!(
        "You are a security expert reviewing a Kali Linux command that will run \
on a machine the user fully controls. Only flag commands that are extremely \
destructive to the local system itself: wiping or formatting drives, deleting \
critical system paths recursively, or overwriting the bootloader. All \
legitimate security testing tools and scans are allowed. If unsure, allow.\n\n\
Respond with JSON only: {{\"isSafe\": boolean, \"reason\": \"explanation if unsafe\"}}\n\n\
Command: {}",
        command
    )
}

#[async_trait]
impl CommandGenerator for GeminiGenerator {
    async fn generate(&self, prompt: &str, api_key: Option<String>) -> Result<String> {
        let key = self.resolve_key(api_key)?;
        let text = self
            .generate_content_with_retry(&key, &generation_prompt(prompt), false)
            .await?;

        let command = clean_command(&text);
        if command.is_empty() {
            return Err(Error::GenerationFailed(
                "Empty command after processing".to_string(),
            ));
        }

        info!("Generated command: {}", command);
        Ok(command)
    }

    async fn assess_safety(&self, command: &str, api_key: Option<String>) -> Result<SafetyVerdict> {
        let key = self.resolve_key(api_key)?;

        let text = match self
            .generate_content_with_retry(&key, &safety_prompt(command), true)
            .await
        {
            Ok(text) => text,
            Err(Error::InvalidCredential(msg)) => return Err(Error::InvalidCredential(msg)),
            Err(e) => {
                // Fail closed: an unverifiable command is treated as unsafe
                warn!("Safety analysis failed: {}", e);
                return Ok(SafetyVerdict {
                    safe: false,
                    reason: Some("Unable to verify safety due to analysis error".to_string()),
                });
            }
        };

        match serde_json::from_str::<SafetyResponse>(&text) {
            Ok(parsed) => Ok(SafetyVerdict {
                safe: parsed.is_safe,
                reason: parsed.reason,
            }),
            Err(_) => Ok(SafetyVerdict {
                safe: false,
                reason: Some("Invalid safety analysis response".to_string()),
            }),
        }
    }
}

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use propabot_core::config::TextProviderSettings;

use crate::error::TextError;

/// Turns the configured prompt into the slogan printed on the poster.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, TextError>;
}

/// Uses the prompt itself as the slogan.
pub struct PassThrough;

#[async_trait]
impl TextGenerator for PassThrough {
    fn name(&self) -> &str {
        "passthrough"
    }

    async fn generate(&self, prompt: &str) -> Result<String, TextError> {
        let text = prompt.trim();
        if text.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(text.to_string())
    }
}

const SYSTEM_PROMPT: &str = "You write short, punchy poster slogans. \
Answer with the slogan only, one or two sentences, no quotes.";

/// OpenAI-compatible `/v1/chat/completions` client.
pub struct ChatTextGenerator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl ChatTextGenerator {
    pub fn new(api_key: String, base_url: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com".to_string()),
            model: model.into(),
            max_tokens: 120,
        }
    }

    pub fn from_settings(settings: &TextProviderSettings) -> Self {
        Self::new(
            settings.api_key.clone(),
            Some(settings.base_url.trim_end_matches('/').to_string()),
            settings.model.clone(),
        )
    }
}

#[async_trait]
impl TextGenerator for ChatTextGenerator {
    fn name(&self) -> &str {
        "chat"
    }

    async fn generate(&self, prompt: &str) -> Result<String, TextError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
            "max_tokens": self.max_tokens,
        });

        debug!(model = %self.model, "requesting slogan");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            warn!(status, "text provider error");
            return Err(TextError::Api { status, message });
        }

        let parsed: ApiResponse = resp.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().trim_matches('"').trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

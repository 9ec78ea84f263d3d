use crate::error::{ExtractError, Result};
use crate::llm::types::*;
use log::debug;
use reqwest::Client;
use std::time::Duration;

const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "deepseek/deepseek-chat-v3.1:free";
const TEMPERATURE: f32 = 0.0;
const MAX_TOKENS: u32 = 50_000;

/// Chat-completions client for the OpenRouter API.
#[derive(Clone)]
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenRouterClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: OPENROUTER_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY").map_err(|_| {
            ExtractError::ExtractionFailed(
                "OPENROUTER_API_KEY not found in the environment".to_string(),
            )
        })?;
        Ok(Self::new(api_key))
    }

    /// Sends one system+user exchange and returns the raw response text.
    /// The whole call is bounded by the caller-supplied timeout; on expiry a
    /// retryable `Timeout` error is surfaced instead of hanging.
    pub async fn chat_completion(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        timeout: Duration,
    ) -> Result<String> {
        let payload = ChatCompletionRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage::system(system_prompt),
                ChatMessage::user(user_prompt),
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!("requesting chat completion from {} (model {})", url, model);

        let exchange = async {
            let res = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&payload)
                .send()
                .await?;

            let status = res.status();
            if !status.is_success() {
                let error_text = res.text().await?;
                return Err(ExtractError::ExtractionFailed(format!(
                    "OpenRouter API error (status {}): {}",
                    status, error_text
                )));
            }

            let body: ChatCompletionResponse = res.json().await?;
            let text = body
                .choices
                .first()
                .ok_or_else(|| {
                    ExtractError::ExtractionFailed("empty choices in response".to_string())
                })?
                .message
                .content
                .trim()
                .to_string();
            Ok(text)
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| ExtractError::Timeout(timeout.as_secs()))?
    }
}

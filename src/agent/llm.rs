use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::{AppError, Result};

const API_VERSION: &str = "2023-06-01";

/// Backoff between rate-limited attempts.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl RateLimitConfig {
    /// Delay before retry number `attempt` (0-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

pub struct LlmClient {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    rate_limit: RateLimitConfig,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: Client::new(),
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            rate_limit: RateLimitConfig {
                enabled: config.rate_limit_retry,
                max_retries: config.rate_limit_max_retries,
                initial_backoff: Duration::from_secs(config.rate_limit_backoff_secs),
            },
        }
    }

    /// Send a single-turn prompt and return the concatenated text reply.
    pub async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: 0.0,
            system: system.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let mut attempt = 0;
        let response = loop {
            match self.send_message(&request).await {
                Err(AppError::LlmRateLimited(msg) | AppError::LlmTransient(msg))
                    if self.rate_limit.enabled && attempt < self.rate_limit.max_retries =>
                {
                    let delay = self.rate_limit.backoff(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_secs = delay.as_secs(),
                        error = %msg,
                        "LLM API busy, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => break other?,
            }
        };

        tracing::debug!(
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            stop_reason = ?response.stop_reason,
            "LLM response"
        );

        if response.stop_reason.as_deref() == Some("max_tokens") {
            tracing::warn!("LLM response hit max_tokens limit");
        }

        let text = extract_text(&response.content);
        if text.trim().is_empty() {
            return Err(AppError::Llm("empty response".to_string()));
        }
        Ok(text)
    }

    async fn send_message(&self, request: &MessagesRequest) -> Result<MessagesResponse> {
        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let body = response.json::<MessagesResponse>().await?;
        Ok(body)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

fn classify_status(status: StatusCode, body: String) -> AppError {
    let message = format!("API returned {status}: {body}");
    match status.as_u16() {
        429 => AppError::LlmRateLimited(message),
        500..=599 => AppError::LlmTransient(message),
        _ => AppError::Llm(message),
    }
}

fn extract_text(content: &[ContentBlock]) -> String {
    content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            ContentBlock::Other => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// --- Request types ---

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: String,
    content: String,
}

// --- Response types ---

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

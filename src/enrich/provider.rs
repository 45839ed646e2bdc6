//! LLM providers
//!
//! A provider turns one prompt into one classified reply. It never retries and
//! never touches the credential pool; both are the pool's job.

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::prompt::{parse_enrichment, EnrichmentOutput};
use crate::http_client::truncate;

/// Messages sent for one article
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentPrompt {
    pub system: String,
    pub user: String,
}

/// Outcome of a single provider request
#[derive(Debug, Clone)]
pub enum ProviderReply {
    Success(EnrichmentOutput),
    /// Quota hit; `retry_after` is the provider's hint, when given
    RateLimited { retry_after: Option<Duration> },
    TransientError(String),
    PermanentError(String),
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn request(&self, api_key: &str, prompt: &EnrichmentPrompt) -> ProviderReply;
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
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

/// Any endpoint speaking the OpenAI chat-completions protocol
pub struct OpenAiCompatibleProvider {
    name: String,
    base_url: String,
    model: String,
    client: Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(name: impl Into<String>, base_url: &str, model: impl Into<String>, client: Client) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            client,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn request(&self, api_key: &str, prompt: &EnrichmentPrompt) -> ProviderReply {
        let body = json!({
            "model": self.model,
            "temperature": 0.2,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
        });

        let response = match self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                return ProviderReply::TransientError(e.to_string());
            }
            Err(e) => return ProviderReply::PermanentError(e.to_string()),
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            debug!(provider = %self.name, ?retry_after, "Rate limited");
            return ProviderReply::RateLimited { retry_after };
        }

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => return ProviderReply::TransientError(e.to_string()),
        };

        if !status.is_success() {
            let message = format!("{status}: {}", truncate(&text, 300));
            return if status == StatusCode::REQUEST_TIMEOUT || status.is_server_error() {
                ProviderReply::TransientError(message)
            } else {
                ProviderReply::PermanentError(message)
            };
        }

        let completion: ChatCompletion = match serde_json::from_str(&text) {
            Ok(c) => c,
            Err(e) => return ProviderReply::PermanentError(format!("invalid completion: {e}")),
        };

        let Some(content) = completion.choices.into_iter().next().and_then(|c| c.message.content) else {
            return ProviderReply::PermanentError("completion has no content".to_string());
        };

        match parse_enrichment(&content) {
            Ok(output) => ProviderReply::Success(output),
            Err(e) => ProviderReply::PermanentError(e),
        }
    }
}

/// Seconds form of `Retry-After`; HTTP dates and unrepresentable values are ignored
fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs = value.trim().parse::<f64>().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

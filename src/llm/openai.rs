//! OpenAI-compatible chat-completions provider
//!
//! Talks to any endpoint speaking the chat-completions wire format; in
//! production this is Yandex Cloud's OpenAI-compatible API.

use super::types::*;
use super::{LlmError, LlmService};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Backend configuration, read from the environment
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl LlmConfig {
    /// Read `LLM_BASE_URL`, `LLM_API_KEY` and `LLM_MODEL`.
    /// Returns `None` when the API key is missing.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("LLM_API_KEY").ok()?;
        let base_url = std::env::var("LLM_BASE_URL")
            .unwrap_or_else(|_| "https://llm.api.cloud.yandex.net/v1".to_string());
        let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "quen".to_string());
        Some(Self {
            base_url,
            api_key,
            model,
        })
    }
}

/// Service implementation over the chat-completions wire format
pub struct OpenAiCompatService {
    client: Client,
    config: LlmConfig,
    endpoint: String,
}

impl OpenAiCompatService {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let endpoint = format!(
            "{}/chat/completions",
            config.base_url.trim_end_matches('/')
        );
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::unknown(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            endpoint,
        })
    }

    fn translate_request(&self, request: &CompletionRequest) -> WireRequest {
        WireRequest {
            model: self.config.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: request.temperature,
            stream: false,
        }
    }
}

#[async_trait]
impl LlmService for OpenAiCompatService {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.translate_request(request);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::timeout(format!("request timed out: {e}"))
                } else {
                    LlmError::network(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            let mut error = classify_status(status, &text);
            if let Some(duration) = retry_after {
                error = error.with_retry_after(duration);
            }
            return Err(error);
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| LlmError::unknown(format!("malformed completion response: {e}")))?;

        let content = wire
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(CompletionResponse {
            content,
            usage: Usage {
                prompt_tokens: wire.usage.as_ref().map_or(0, |u| u.prompt_tokens),
                completion_tokens: wire.usage.as_ref().map_or(0, |u| u.completion_tokens),
            },
        })
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }
}

fn classify_status(status: StatusCode, body: &str) -> LlmError {
    let message = format!("completion endpoint returned {status}: {body}");
    match status {
        StatusCode::TOO_MANY_REQUESTS => LlmError::rate_limit(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::auth(message),
        StatusCode::BAD_REQUEST => LlmError::invalid_request(message),
        s if s.is_server_error() => LlmError::server_error(message),
        _ => LlmError::unknown(message),
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

// ==================== Wire types ====================

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "").kind,
            crate::llm::LlmErrorKind::RateLimit
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY, "").kind,
            crate::llm::LlmErrorKind::ServerError
        );
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, "").kind,
            crate::llm::LlmErrorKind::Auth
        );
        assert!(!classify_status(StatusCode::BAD_REQUEST, "")
            .kind
            .is_retryable());
    }

    #[test]
    fn test_endpoint_normalizes_trailing_slash() {
        let service = OpenAiCompatService::new(LlmConfig {
            base_url: "https://example.test/v1/".to_string(),
            api_key: "k".to_string(),
            model: "m".to_string(),
        })
        .unwrap();
        assert_eq!(service.endpoint, "https://example.test/v1/chat/completions");
    }
}

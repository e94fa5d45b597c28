/// Completion client: the single point of entry for the external completion service.
///
/// ARCHITECTURAL RULE: no pipeline stage talks to the service directly. Every call goes
/// through [`resilience::ResilientClient`], which owns rate limiting, circuit breaking,
/// retry, response validation and token accounting. [`LlmClient`] is only the wire adapter.
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod circuit_breaker;
pub mod prompts;
pub mod rate_limiter;
pub mod resilience;
pub mod response;
pub mod usage;

#[cfg(test)]
pub(crate) mod testing;

const TEMPERATURE: f32 = 0.1;
const MAX_TOKENS: u32 = 2000;

#[derive(Debug, Clone, Error)]
pub enum CompletionError {
    #[error("Completion request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection to completion service failed: {0}")]
    Connection(String),

    #[error("Completion service is rate limiting requests: {0}")]
    RateLimited(String),

    #[error("No request slot became free within {0:?}")]
    LocalRateLimit(Duration),

    #[error("Completion service error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Completion service rejected credentials (status {status}): {message}")]
    Authentication { status: u16, message: String },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Completion service returned empty content")]
    EmptyContent,

    #[error("Response validation failed: {0}")]
    Validation(String),

    #[error("Circuit breaker is open, next trial in {retry_after:?}")]
    CircuitOpen { retry_after: Duration },
}

impl CompletionError {
    /// Transient failures worth another attempt after backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CompletionError::Timeout(_)
                | CompletionError::Connection(_)
                | CompletionError::RateLimited(_)
                | CompletionError::LocalRateLimit(_)
                | CompletionError::Server { .. }
        )
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            CompletionError::Timeout(_) => "TIMEOUT_ERROR",
            CompletionError::Connection(_) => "CONNECTION_ERROR",
            CompletionError::RateLimited(_) | CompletionError::LocalRateLimit(_) => {
                "RATE_LIMIT_ERROR"
            }
            CompletionError::Server { .. } | CompletionError::Api { .. } => "SERVICE_ERROR",
            CompletionError::Authentication { .. } => "AUTHENTICATION_ERROR",
            CompletionError::EmptyContent | CompletionError::Validation(_) => {
                "RESPONSE_VALIDATION_ERROR"
            }
            CompletionError::CircuitOpen { .. } => "CIRCUIT_BREAKER_OPEN_ERROR",
        }
    }

    /// The service answered, but with something unusable.
    pub fn is_response_integrity(&self) -> bool {
        matches!(
            self,
            CompletionError::EmptyContent | CompletionError::Validation(_)
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// One request to a configured capability of the completion service.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub capability_id: &'a str,
    pub system: &'a str,
    pub prompt: &'a str,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub usage: Usage,
    pub model: String,
}

/// Transport seam. The HTTP client implements it; tests substitute scripted fakes.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        request: &CompletionRequest<'_>,
    ) -> Result<CompletionResponse, CompletionError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub endpoint: String,
    pub api_key: String,
    pub api_version: String,
    pub model: String,
    pub timeout: Duration,
}

/// HTTP adapter for the chat-completions deployment API.
///
/// Each capability id is a deployment name; a single attempt is made per call and the
/// resilience layer decides whether to try again.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    settings: ClientSettings,
}

impl LlmClient {
    pub fn new(settings: ClientSettings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, settings })
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    fn url_for(&self, capability_id: &str) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.settings.endpoint.trim_end_matches('/'),
            capability_id,
            self.settings.api_version
        )
    }
}

#[async_trait]
impl CompletionBackend for LlmClient {
    async fn complete(
        &self,
        request: &CompletionRequest<'_>,
    ) -> Result<CompletionResponse, CompletionError> {
        let body = ChatRequest {
            messages: [
                ChatMessage {
                    role: "system",
                    content: request.system,
                },
                ChatMessage {
                    role: "user",
                    content: request.prompt,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(self.url_for(request.capability_id))
            .header("api-key", &self.settings.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(classify_status(status, message));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Validation(format!("unreadable response body: {e}")))?;

        let text = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or(CompletionError::EmptyContent)?;

        let usage = chat.usage.unwrap_or_default();
        debug!(
            capability_id = request.capability_id,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "Completion call succeeded"
        );

        Ok(CompletionResponse {
            text,
            usage,
            model: chat.model.unwrap_or_else(|| self.settings.model.clone()),
        })
    }
}

impl LlmClient {
    fn transport_error(&self, e: reqwest::Error) -> CompletionError {
        if e.is_timeout() {
            CompletionError::Timeout(self.settings.timeout)
        } else {
            CompletionError::Connection(e.to_string())
        }
    }
}

fn classify_status(status: StatusCode, message: String) -> CompletionError {
    let code = status.as_u16();
    match status {
        StatusCode::TOO_MANY_REQUESTS => CompletionError::RateLimited(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CompletionError::Authentication {
            status: code,
            message,
        },
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => CompletionError::Server {
            status: code,
            message,
        },
        _ => CompletionError::Api {
            status: code,
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            CompletionError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, String::new()),
            CompletionError::Authentication { status: 401, .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, String::new()),
            CompletionError::Server { status: 502, .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, String::new()),
            CompletionError::Api { status: 400, .. }
        ));
    }

    #[test]
    fn test_retry_classification() {
        assert!(CompletionError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(CompletionError::Connection("reset".into()).is_retryable());
        assert!(CompletionError::RateLimited("slow down".into()).is_retryable());
        assert!(!CompletionError::Authentication {
            status: 401,
            message: String::new()
        }
        .is_retryable());
        assert!(!CompletionError::Validation("bad json".into()).is_retryable());
        assert!(!CompletionError::CircuitOpen {
            retry_after: Duration::from_secs(5)
        }
        .is_retryable());
    }

    #[test]
    fn test_error_type_codes() {
        assert_eq!(
            CompletionError::LocalRateLimit(Duration::ZERO).error_type(),
            "RATE_LIMIT_ERROR"
        );
        assert_eq!(
            CompletionError::EmptyContent.error_type(),
            "RESPONSE_VALIDATION_ERROR"
        );
        assert_eq!(
            CompletionError::Api {
                status: 404,
                message: String::new()
            }
            .error_type(),
            "SERVICE_ERROR"
        );
    }

    #[test]
    fn test_deployment_url() {
        let client = LlmClient::new(ClientSettings {
            endpoint: "https://example.openai.azure.com/".to_string(),
            api_key: "key".to_string(),
            api_version: "2024-05-01-preview".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        assert_eq!(
            client.url_for("profile-extractor"),
            "https://example.openai.azure.com/openai/deployments/profile-extractor/chat/completions?api-version=2024-05-01-preview"
        );
    }

    #[test]
    fn test_chat_response_parsing() {
        let raw = r#"{"model":"gpt-4o-mini","choices":[{"message":{"role":"assistant","content":"{\"a\":1}"}}],"usage":{"prompt_tokens":12,"completion_tokens":3,"total_tokens":15}}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.usage.unwrap().prompt_tokens, 12);
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("{\"a\":1}"));
    }
}

//! The story backend contract.
//!
//! The engine talks to two endpoints: `/api/chat-completion` for narration
//! and `/api/generate-image` for illustrations. The request and response
//! types here are the single wire contract shared by [`HttpBackend`] and
//! the server; anything that does not deserialize into them is rejected
//! at this boundary.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors from backend calls.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("A chat completion needs at least one message")]
    EmptyMessages,

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Transient upstream failure: {0}")]
    Transient(String),

    #[error("Backend error (status {status}): {message}")]
    Status { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to parse backend response: {0}")]
    Parse(String),
}

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Body of `POST /api/chat-completion`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

fn default_temperature() -> f32 {
    0.8
}

fn default_max_tokens() -> usize {
    512
}

impl ChatCompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Response of `POST /api/chat-completion`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub reply: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Body of `POST /api/generate-image`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateImageRequest {
    pub prompt: String,
}

/// Response of `POST /api/generate-image`: `url` holds base64 PNG data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateImageResponse {
    pub url: String,
}

/// Error body returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Text and image generation as seen by the story engine.
#[async_trait]
pub trait StoryBackend: Send + Sync {
    async fn chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, BackendError>;

    /// Returns base64-encoded PNG data.
    async fn generate_image(&self, prompt: &str) -> Result<String, BackendError>;
}

/// [`StoryBackend`] over HTTP.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| BackendError::Network(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, BackendError>
    where
        Req: Serialize + Sync,
        Resp: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "backend request");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))
    }
}

#[async_trait]
impl StoryBackend for HttpBackend {
    async fn chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, BackendError> {
        if request.messages.is_empty() {
            return Err(BackendError::EmptyMessages);
        }
        self.post("/api/chat-completion", &request).await
    }

    async fn generate_image(&self, prompt: &str) -> Result<String, BackendError> {
        let request = GenerateImageRequest {
            prompt: prompt.to_string(),
        };
        let response: GenerateImageResponse = self.post("/api/generate-image", &request).await?;
        Ok(response.url)
    }
}

/// Map a non-success status and its body to a typed error.
fn status_error(status: StatusCode, body: &str) -> BackendError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.to_string());

    if status == StatusCode::TOO_MANY_REQUESTS {
        BackendError::RateLimited(message)
    } else if status.is_server_error() {
        BackendError::Transient(message)
    } else {
        BackendError::Status {
            status: status.as_u16(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_when_deserializing() {
        let raw = r#"{"messages": [{"role": "user", "content": "Hola"}]}"#;
        let request: ChatCompletionRequest = serde_json::from_str(raw).unwrap();

        assert_eq!(request.messages, vec![ChatMessage::user("Hola")]);
        assert_eq!(request.temperature, 0.8);
        assert_eq!(request.max_tokens, 512);
    }

    #[test]
    fn test_unknown_role_rejected() {
        let raw = r#"{"messages": [{"role": "narrator", "content": "x"}]}"#;
        assert!(serde_json::from_str::<ChatCompletionRequest>(raw).is_err());
    }

    #[test]
    fn test_response_without_usage() {
        let response: ChatCompletionResponse =
            serde_json::from_str(r#"{"reply": "Érase una vez"}"#).unwrap();
        assert!(response.usage.is_none());

        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("usage").is_none());
    }

    #[test]
    fn test_reply_shape_is_required() {
        assert!(serde_json::from_str::<ChatCompletionResponse>(r#""just text""#).is_err());
        assert!(serde_json::from_str::<ChatCompletionResponse>(r#"{"text": "x"}"#).is_err());
    }

    #[test]
    fn test_status_error_mapping() {
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, r#"{"error": "slow down"}"#),
            BackendError::RateLimited(m) if m == "slow down"
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, "upstream"),
            BackendError::Transient(m) if m == "upstream"
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, "{}"),
            BackendError::Status { status: 400, .. }
        ));
    }

    #[tokio::test]
    async fn test_http_backend_rejects_empty_messages() {
        let backend = HttpBackend::new("http://localhost:4000/").unwrap();
        assert_eq!(backend.base_url(), "http://localhost:4000");

        let err = backend
            .chat_completion(ChatCompletionRequest::new(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::EmptyMessages));
    }
}

//! Minimal Stability AI client.
//!
//! Wraps the SDXL text-to-image endpoint and returns raw PNG bytes.
//! Server-side failures (5xx) and transport failures are retried exactly
//! once; rate limiting (429) and other client errors are surfaced
//! immediately.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

const API_BASE: &str = "https://api.stability.ai/v1";
const DEFAULT_ENGINE: &str = "stable-diffusion-xl-1024-v1-0";

/// Number of extra attempts after a transient failure.
const TRANSIENT_RETRIES: u32 = 1;

/// Errors that can occur when using the Stability client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded or account credits exhausted: {0}")]
    RateLimited(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether another attempt may succeed: 5xx responses and transport errors.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Stability AI API client.
#[derive(Clone)]
pub struct Stability {
    client: reqwest::Client,
    api_key: String,
    engine: String,
    base_url: String,
}

impl Stability {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            engine: DEFAULT_ENGINE.to_string(),
            base_url: API_BASE.to_string(),
        })
    }

    /// Create a client from the STABILITY_API_KEY environment variable.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("STABILITY_API_KEY").map_err(|_| Error::NoApiKey)?;
        Self::new(api_key)
    }

    /// Use a different generation engine.
    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = engine.into();
        self
    }

    /// Point the client at a different base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Generate a single PNG image for the prompt.
    pub async fn text_to_image(&self, request: &ImageRequest) -> Result<Vec<u8>, Error> {
        let mut retries_left = TRANSIENT_RETRIES;
        loop {
            match self.send_once(request).await {
                Err(e) if e.is_transient() && retries_left > 0 => {
                    retries_left -= 1;
                    warn!(error = %e, "retrying Stability image request");
                }
                result => return result,
            }
        }
    }

    async fn send_once(&self, request: &ImageRequest) -> Result<Vec<u8>, Error> {
        let response = self
            .client
            .post(format!(
                "{}/generation/{}/text-to-image",
                self.base_url, self.engine
            ))
            .headers(self.build_headers()?)
            .json(&ApiRequest::from(request))
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RateLimited(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message: extract_message(&body),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("image/png"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }
}

/// A text-to-image request.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    pub cfg_scale: f32,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
}

impl ImageRequest {
    /// A 1024x1024 single-sample request with the usual SDXL settings.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            cfg_scale: 7.0,
            width: 1024,
            height: 1024,
            steps: 30,
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest {
    text_prompts: Vec<ApiTextPrompt>,
    cfg_scale: f32,
    height: u32,
    width: u32,
    samples: u32,
    steps: u32,
}

#[derive(Debug, Serialize)]
struct ApiTextPrompt {
    text: String,
}

impl From<&ImageRequest> for ApiRequest {
    fn from(request: &ImageRequest) -> Self {
        Self {
            text_prompts: vec![ApiTextPrompt {
                text: request.prompt.clone(),
            }],
            cfg_scale: request.cfg_scale,
            height: request.height,
            width: request.width,
            samples: 1,
            steps: request.steps,
        }
    }
}

/// Pull `message` (or `error`) out of a JSON error body, else return it raw.
fn extract_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Network("reset".into()).is_transient());
        assert!(Error::Api {
            status: 503,
            message: String::new()
        }
        .is_transient());
        assert!(!Error::Api {
            status: 400,
            message: String::new()
        }
        .is_transient());
        assert!(!Error::RateLimited(String::new()).is_transient());
        assert!(!Error::NoApiKey.is_transient());
    }

    #[test]
    fn test_api_request_shape() {
        let api = ApiRequest::from(&ImageRequest::new("a castle on a hill"));
        let json = serde_json::to_value(&api).unwrap();

        assert_eq!(json["text_prompts"][0]["text"], "a castle on a hill");
        assert_eq!(json["samples"], 1);
        assert_eq!(json["width"], 1024);
        assert_eq!(json["steps"], 30);
    }

    #[test]
    fn test_extract_message() {
        assert_eq!(extract_message(r#"{"message": "bad prompt"}"#), "bad prompt");
        assert_eq!(extract_message(r#"{"error": "nope"}"#), "nope");
        assert_eq!(extract_message("plain failure"), "plain failure");
    }

    #[test]
    fn test_client_builder() {
        let client = Stability::new("key")
            .unwrap()
            .with_engine("sdxl-test")
            .with_base_url("http://localhost:9000/v1/");
        assert_eq!(client.engine, "sdxl-test");
        assert_eq!(client.base_url, "http://localhost:9000/v1");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let client = Stability::new("key")
            .unwrap()
            .with_base_url("http://127.0.0.1:1");
        let err = client
            .text_to_image(&ImageRequest::new("a fox"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }
}

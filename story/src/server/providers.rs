//! Upstream model providers behind the HTTP backend.

use async_trait::async_trait;
use story_core::{ChatCompletionRequest, ChatCompletionResponse, ChatRole, Usage};
use thiserror::Error;
use tracing::warn;

/// Errors from upstream providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Upstream unavailable: {0}")]
    Unavailable(String),

    #[error("Upstream error: {0}")]
    Failed(String),
}

/// Chat completions.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ProviderError>;
}

/// Text-to-image generation returning PNG bytes.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, ProviderError>;
}

#[async_trait]
impl<T: ChatProvider + ?Sized> ChatProvider for std::sync::Arc<T> {
    async fn complete(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ProviderError> {
        (**self).complete(request).await
    }
}

/// Stands in for a provider whose API key is missing.
pub struct Unconfigured(pub &'static str);

#[async_trait]
impl ChatProvider for Unconfigured {
    async fn complete(
        &self,
        _request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ProviderError> {
        Err(ProviderError::NotConfigured(self.0))
    }
}

#[async_trait]
impl ImageProvider for Unconfigured {
    async fn generate(&self, _prompt: &str) -> Result<Vec<u8>, ProviderError> {
        Err(ProviderError::NotConfigured(self.0))
    }
}

#[async_trait]
impl ChatProvider for groq::Groq {
    async fn complete(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ProviderError> {
        let messages = request
            .messages
            .iter()
            .map(|m| match m.role {
                ChatRole::System => groq::Message::system(&m.content),
                ChatRole::User => groq::Message::user(&m.content),
                ChatRole::Assistant => groq::Message::assistant(&m.content),
            })
            .collect();

        let response = groq::Groq::complete(
            self,
            groq::Request::new(messages)
                .with_temperature(request.temperature)
                .with_max_tokens(request.max_tokens),
        )
        .await
        .map_err(|e| match e {
            groq::Error::Api { status: 429, message } => ProviderError::RateLimited(message),
            groq::Error::Api { status, message } if status >= 500 => {
                ProviderError::Unavailable(message)
            }
            groq::Error::Network(message) => ProviderError::Unavailable(message),
            groq::Error::NoApiKey => ProviderError::NotConfigured("GROQ_API_KEY"),
            other => ProviderError::Failed(other.to_string()),
        })?;

        if response.finish_reason == groq::FinishReason::Length {
            warn!(
                model = %response.model,
                max_tokens = request.max_tokens,
                "chat completion truncated at max_tokens"
            );
        }

        Ok(ChatCompletionResponse {
            reply: response.content.trim().to_string(),
            usage: response.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
        })
    }
}

#[async_trait]
impl ImageProvider for stability::Stability {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, ProviderError> {
        self.text_to_image(&stability::ImageRequest::new(prompt))
            .await
            .map_err(|e| match e {
                stability::Error::RateLimited(message) => ProviderError::RateLimited(message),
                e if e.is_transient() => ProviderError::Unavailable(e.to_string()),
                stability::Error::NoApiKey => ProviderError::NotConfigured("STABILITY_API_KEY"),
                other => ProviderError::Failed(other.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use story_core::ChatMessage;

    #[tokio::test]
    async fn test_unconfigured_names_missing_key() {
        let chat: Arc<dyn ChatProvider> = Arc::new(Unconfigured("GROQ_API_KEY"));
        let request = ChatCompletionRequest::new(vec![ChatMessage::user("hola")]);

        let err = chat.complete(&request).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured("GROQ_API_KEY")));
        assert_eq!(err.to_string(), "GROQ_API_KEY is not configured");

        let err = Unconfigured("STABILITY_API_KEY").generate("un faro").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured("STABILITY_API_KEY")));
    }
}

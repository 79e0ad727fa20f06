//! Normalization of illustration prompts before they reach the image model.
//!
//! Scenes are written in Spanish while the image model only understands
//! English, so the last sentence of the prompt is cleaned, styled, and
//! translated.

use crate::server::providers::{ChatProvider, ProviderError};
use async_trait::async_trait;
use story_core::{ChatCompletionRequest, ChatMessage};
use tracing::{debug, warn};

/// Style appended to every illustration prompt.
pub const PENCIL_STYLE: &str = "realistic graphite pencil sketch, charcoal shading, cinematic lighting, highly detailed, no childish style, for all audiences";

/// Used when the prompt has no usable line.
pub const FALLBACK_SUBJECT: &str = "Scene description";

const MIN_SUBJECT_CHARS: usize = 3;

/// Strip markdown emphasis and Spanish opening punctuation, flatten newlines.
pub fn clean(text: &str) -> String {
    text.replace("**", "")
        .replace(['¿', '¡'], "")
        .replace("\r\n", " ")
        .replace('\n', " ")
        .trim()
        .to_string()
}

/// Keep the last non-empty line of `prompt` and append [`PENCIL_STYLE`].
pub fn normalize(prompt: &str) -> String {
    let last_line = prompt
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");
    let subject = clean(last_line);

    if subject.chars().count() >= MIN_SUBJECT_CHARS {
        format!("{subject}. {PENCIL_STYLE}")
    } else {
        format!("{FALLBACK_SUBJECT}. {PENCIL_STYLE}")
    }
}

pub fn is_ascii(text: &str) -> bool {
    text.is_ascii()
}

/// Spanish to English translation.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str) -> Result<String, ProviderError>;
}

/// Returns its input untouched.
pub struct Passthrough;

#[async_trait]
impl Translator for Passthrough {
    async fn translate(&self, text: &str) -> Result<String, ProviderError> {
        Ok(text.to_string())
    }
}

/// Translates through a chat model.
pub struct ChatTranslator<P> {
    provider: P,
}

impl<P: ChatProvider> ChatTranslator<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P: ChatProvider> Translator for ChatTranslator<P> {
    async fn translate(&self, text: &str) -> Result<String, ProviderError> {
        let request = ChatCompletionRequest::new(vec![
            ChatMessage::system(
                "Translate the user's text from Spanish to English. \
                 Reply with the translation only, without quotes or comments.",
            ),
            ChatMessage::user(text),
        ])
        .with_temperature(0.0)
        .with_max_tokens(300);

        let response = self.provider.complete(&request).await?;
        Ok(response.reply.trim().trim_matches('"').to_string())
    }
}

/// Translate to English, retrying once if the result still has non-ASCII
/// characters. Falls back to `text` when translation fails.
pub async fn to_english(translator: &dyn Translator, text: &str) -> String {
    let first = match translator.translate(text).await {
        Ok(translated) => translated,
        Err(e) => {
            warn!(error = %e, "prompt translation failed, using original");
            return text.to_string();
        }
    };
    if is_ascii(&first) {
        return first;
    }

    debug!("translation still has non-ASCII characters, retrying");
    match translator.translate(&first).await {
        Ok(second) => second,
        Err(e) => {
            warn!(error = %e, "second translation failed");
            first
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_clean() {
        assert_eq!(clean("  **¿Qué** pasa?¡ "), "Qué pasa?");
        assert_eq!(clean("uno\r\ndos\ntres"), "uno dos tres");
    }

    #[test]
    fn test_normalize_uses_last_line() {
        let prompt = "Line art style.\n\nEl bosque oscuro\n  Un lobo aúlla  \n\n";
        assert_eq!(normalize(prompt), format!("Un lobo aúlla. {PENCIL_STYLE}"));
    }

    #[test]
    fn test_normalize_short_subject_falls_back() {
        assert_eq!(normalize("**ab**"), format!("Scene description. {PENCIL_STYLE}"));
        assert_eq!(normalize(""), format!("Scene description. {PENCIL_STYLE}"));
    }

    struct Scripted(Mutex<Vec<Result<String, ProviderError>>>);

    #[async_trait]
    impl Translator for Scripted {
        async fn translate(&self, _text: &str) -> Result<String, ProviderError> {
            self.0.lock().unwrap().remove(0)
        }
    }

    fn scripted(results: Vec<Result<String, ProviderError>>) -> Scripted {
        Scripted(Mutex::new(results))
    }

    #[tokio::test]
    async fn test_to_english_ascii_first_try() {
        let translator = scripted(vec![Ok("A wolf howls".into())]);
        assert_eq!(to_english(&translator, "Un lobo aúlla").await, "A wolf howls");
    }

    #[tokio::test]
    async fn test_to_english_retries_non_ascii() {
        let translator = scripted(vec![Ok("A wolf aúlla".into()), Ok("A wolf howls".into())]);
        assert_eq!(to_english(&translator, "Un lobo aúlla").await, "A wolf howls");
    }

    #[tokio::test]
    async fn test_to_english_falls_back_on_error() {
        let translator = scripted(vec![Err(ProviderError::Failed("down".into()))]);
        assert_eq!(to_english(&translator, "Un lobo aúlla").await, "Un lobo aúlla");
    }

    #[tokio::test]
    async fn test_passthrough() {
        assert_eq!(to_english(&Passthrough, "hola").await, "hola");
    }
}

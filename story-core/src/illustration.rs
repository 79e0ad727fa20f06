//! Scene illustrations.
//!
//! An illustration is requested in the background after a scene appears.
//! When the reader moves on before it arrives, the request keeps running
//! but its result is dropped: every new scene bumps the epoch of the
//! [`IllustrationSlot`], and only results carrying the current epoch are
//! accepted.

use crate::backend::{BackendError, StoryBackend};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

/// Prepended to every illustration prompt.
pub const STYLE_PREFIX: &str = "simple black and white line art, clean pencil sketch, no shading, no background, coloring book style, only outlines, no fill, no shadows, minimal detail, just contours";

/// Length of the scene excerpt sent as a prompt.
pub const FRAGMENT_MAX_CHARS: usize = 200;

/// Errors from illustration requests.
#[derive(Debug, Error)]
pub enum IllustrationError {
    #[error("Image provider rate limited: {0}")]
    RateLimited(String),

    #[error("Image generation failed: {0}")]
    Failed(String),

    #[error("Image generation returned no data")]
    EmptyImage,
}

impl IllustrationError {
    pub fn user_message(&self) -> &'static str {
        match self {
            IllustrationError::RateLimited(_) => {
                "Límite de peticiones de imágenes excedido o créditos agotados. Intenta más tarde."
            }
            _ => "No se pudo generar la ilustración.",
        }
    }
}

impl From<BackendError> for IllustrationError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::RateLimited(m) => IllustrationError::RateLimited(m),
            other => IllustrationError::Failed(other.to_string()),
        }
    }
}

/// The first [`FRAGMENT_MAX_CHARS`] characters of `text`, cut back to the
/// last space when that space lies past the midpoint.
pub fn prompt_fragment(text: &str) -> String {
    let Some((end, _)) = text.char_indices().nth(FRAGMENT_MAX_CHARS) else {
        return text.to_string();
    };
    let truncated = &text[..end];
    let midpoint = FRAGMENT_MAX_CHARS / 2;

    let cut = truncated
        .rfind(' ')
        .filter(|byte| truncated[..*byte].chars().count() > midpoint)
        .unwrap_or(truncated.len());

    truncated[..cut].trim().to_string()
}

/// The full prompt for a scene.
pub fn styled_prompt(scene_text: &str) -> String {
    format!("{STYLE_PREFIX}. {}", prompt_fragment(scene_text))
}

/// Wrap base64 PNG data as a data URL.
pub fn data_url(base64_png: &str) -> String {
    format!("data:image/png;base64,{base64_png}")
}

/// Requests illustrations from the backend.
#[derive(Clone)]
pub struct Illustrator {
    backend: Arc<dyn StoryBackend>,
}

impl Illustrator {
    pub fn new(backend: Arc<dyn StoryBackend>) -> Self {
        Self { backend }
    }

    /// Illustrate a scene, returning a data URL.
    pub async fn illustrate(&self, scene_text: &str) -> Result<String, IllustrationError> {
        let encoded = self.backend.generate_image(&styled_prompt(scene_text)).await?;
        if encoded.trim().is_empty() {
            return Err(IllustrationError::EmptyImage);
        }
        Ok(data_url(encoded.trim()))
    }
}

/// Identifies the scene an illustration request was made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllustrationTicket {
    epoch: u64,
}

#[derive(Default)]
struct SlotInner {
    epoch: AtomicU64,
    ready: Mutex<Option<(u64, Result<String, IllustrationError>)>>,
}

/// Holds at most one illustration result, for the current scene only.
#[derive(Clone, Default)]
pub struct IllustrationSlot {
    inner: Arc<SlotInner>,
}

impl IllustrationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new epoch and return its ticket. Earlier tickets go stale.
    pub fn issue(&self) -> IllustrationTicket {
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        IllustrationTicket { epoch }
    }

    /// Invalidate outstanding tickets without issuing a new one.
    pub fn supersede(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_current(&self, ticket: IllustrationTicket) -> bool {
        self.inner.epoch.load(Ordering::SeqCst) == ticket.epoch
    }

    /// Store a result if its ticket is still current. Returns whether it was kept.
    pub fn deliver(
        &self,
        ticket: IllustrationTicket,
        result: Result<String, IllustrationError>,
    ) -> bool {
        let mut ready = self
            .inner
            .ready
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !self.is_current(ticket) {
            warn!(epoch = ticket.epoch, "discarding illustration for a superseded scene");
            return false;
        }
        debug!(epoch = ticket.epoch, ok = result.is_ok(), "illustration delivered");
        *ready = Some((ticket.epoch, result));
        true
    }

    /// Take the result for the current epoch, if one has arrived.
    pub fn take(&self) -> Option<Result<String, IllustrationError>> {
        let mut ready = self
            .inner
            .ready
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match ready.take() {
            Some((epoch, result)) if epoch == self.inner.epoch.load(Ordering::SeqCst) => {
                Some(result)
            }
            _ => None,
        }
    }
}

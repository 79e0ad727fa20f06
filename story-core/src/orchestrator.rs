//! Story orchestration.
//!
//! Each generation runs the same sequence:
//! 1. load the story selection and check both the credit balance and the
//!    usage meter, before any network call;
//! 2. update the context windows and build the prompt;
//! 3. call the backend and parse the reply;
//! 4. only then charge the measured usage and debit the scene price.
//!
//! A failure at any step leaves the balances untouched.

use crate::backend::{BackendError, ChatCompletionRequest, ChatMessage, StoryBackend, Usage};
use crate::config::{GenerationParams, StoryConfig};
use crate::context::ContextWindow;
use crate::ledger::{CreditLedger, LedgerError, Pricing};
use crate::parser::{narrative_only, parse_reply, ParseError};
use crate::preferences::{MissingField, StoryKind, StoryPreferences};
use crate::prompts::{self, StoryFrame};
use crate::scene::Scene;
use crate::store::{KeyValueStore, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors surfaced to the caller of a story operation.
///
/// None of them is fatal: the session stays usable and the reader can
/// retry by hand.
#[derive(Debug, Error)]
pub enum StoryError {
    #[error("Insufficient credits: {required} required, {available} available")]
    InsufficientCredits { required: u64, available: u64 },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Upstream rate limited: {0}")]
    UpstreamRateLimited(String),

    #[error("Upstream failure: {0}")]
    UpstreamTransientFailure(String),

    #[error("Missing story preference: {0}")]
    MissingPreferences(MissingField),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Backend error: {0}")]
    Backend(BackendError),

    #[error("Ledger error: {0}")]
    Ledger(LedgerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl StoryError {
    /// Text for the reader.
    pub fn user_message(&self) -> String {
        match self {
            StoryError::InsufficientCredits { required, available } => format!(
                "No tienes suficientes créditos ({available} disponibles, {required} necesarios). Recarga para continuar."
            ),
            StoryError::UpstreamRateLimited(_) => {
                "Se alcanzó el límite de solicitudes. Espera un momento e inténtalo de nuevo.".to_string()
            }
            StoryError::UpstreamTransientFailure(_) => {
                "El servicio no está disponible en este momento. Inténtalo de nuevo.".to_string()
            }
            StoryError::MissingPreferences(_) => {
                "Faltan datos requeridos para generar la historia.".to_string()
            }
            StoryError::InvalidState(reason) => reason.clone(),
            StoryError::MalformedResponse(_)
            | StoryError::Backend(_)
            | StoryError::Ledger(_)
            | StoryError::Store(_) => "No se pudo generar la historia. Inténtalo de nuevo.".to_string(),
        }
    }

    pub fn is_insufficient_credits(&self) -> bool {
        matches!(self, StoryError::InsufficientCredits { .. })
    }
}

impl From<LedgerError> for StoryError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientCredits { required, available } => {
                StoryError::InsufficientCredits { required, available }
            }
            LedgerError::Store(e) => StoryError::Store(e),
            other => StoryError::Ledger(other),
        }
    }
}

impl From<BackendError> for StoryError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::RateLimited(m) => StoryError::UpstreamRateLimited(m),
            BackendError::Transient(m) | BackendError::Network(m) => {
                StoryError::UpstreamTransientFailure(m)
            }
            BackendError::Parse(m) => StoryError::MalformedResponse(m),
            other => StoryError::Backend(other),
        }
    }
}

impl From<ParseError> for StoryError {
    fn from(err: ParseError) -> Self {
        StoryError::MalformedResponse(err.to_string())
    }
}

/// Drives scene generation against a [`StoryBackend`].
#[derive(Clone)]
pub struct StoryOrchestrator {
    backend: Arc<dyn StoryBackend>,
    store: Arc<dyn KeyValueStore>,
    ledger: CreditLedger,
    context: ContextWindow,
    config: StoryConfig,
}

impl StoryOrchestrator {
    pub fn new(backend: Arc<dyn StoryBackend>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            ledger: CreditLedger::new(store.clone()),
            context: ContextWindow::new(store.clone()),
            store,
            config: StoryConfig::default(),
        }
    }

    pub fn with_config(mut self, config: StoryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &StoryConfig {
        &self.config
    }

    pub fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }

    pub fn context(&self) -> &ContextWindow {
        &self.context
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn backend(&self) -> &Arc<dyn StoryBackend> {
        &self.backend
    }

    pub fn preferences(&self) -> Result<StoryPreferences, StoryError> {
        Ok(StoryPreferences::load(self.store.as_ref())?)
    }

    /// Generate the first scene of a new story for `username`.
    pub async fn generate_initial_scene(&self, username: &str) -> Result<Scene, StoryError> {
        let prefs = self.preferences()?;
        let kind = prefs
            .validate(username)
            .map_err(StoryError::MissingPreferences)?;
        let cost = self.preflight(&prefs)?;

        self.context.clear()?;

        let frame = frame(&prefs, kind, username);
        let (reply, usage) = self
            .complete(prompts::opening(&frame), self.config.opening)
            .await?;
        let parsed = parse_reply(&reply)?;

        self.settle(username, cost, usage.as_ref())?;
        if kind == StoryKind::Custom {
            StoryPreferences::consume_custom_prompt(self.store.as_ref())?;
        }

        info!(
            username,
            kind = %kind,
            choices = parsed.choices.len(),
            "generated opening scene"
        );
        Ok(Scene::ongoing(parsed.narrative, parsed.choices))
    }

    /// Generate the scene that follows `choice_text`.
    ///
    /// `history` is the list of scene texts so far, the current one included.
    pub async fn continue_story(
        &self,
        current_text: &str,
        choice_text: &str,
        username: &str,
        history: &[String],
    ) -> Result<Scene, StoryError> {
        let prefs = self.preferences()?;
        let kind = prefs
            .kind
            .ok_or(StoryError::MissingPreferences(MissingField::StoryKind))?;
        let cost = self.preflight(&prefs)?;

        self.context.push_summary(current_text)?;
        self.context.set_recent_history(history)?;
        let preamble = self.context.build_preamble(current_text, Some(choice_text))?;

        let frame = frame(&prefs, kind, username);
        let (reply, usage) = self
            .complete(
                prompts::continuation(&frame, &preamble),
                self.config.continuation,
            )
            .await?;
        let parsed = parse_reply(&reply)?;

        self.settle(username, cost, usage.as_ref())?;
        self.context.push_summary(&parsed.narrative)?;

        info!(
            username,
            choices = parsed.choices.len(),
            "generated continuation"
        );
        Ok(Scene::ongoing(parsed.narrative, parsed.choices))
    }

    /// Generate the closing scene and clear the context windows.
    pub async fn generate_ending(
        &self,
        current_text: &str,
        username: &str,
        history: &[String],
    ) -> Result<Scene, StoryError> {
        let prefs = self.preferences()?;
        let kind = prefs
            .kind
            .ok_or(StoryError::MissingPreferences(MissingField::StoryKind))?;
        let cost = self.preflight(&prefs)?;

        self.context.push_summary(current_text)?;
        self.context.set_recent_history(history)?;
        let preamble = self.context.build_preamble(current_text, None)?;

        let frame = frame(&prefs, kind, username);
        let (reply, usage) = self
            .complete(prompts::ending(&frame, &preamble), self.config.ending)
            .await?;
        let text = narrative_only(&reply);
        if text.is_empty() {
            return Err(StoryError::MalformedResponse("empty ending".to_string()));
        }

        self.settle(username, cost, usage.as_ref())?;
        self.context.clear()?;

        info!(username, "generated ending");
        Ok(Scene::ending(text))
    }

    /// A short title for a finished story.
    ///
    /// Falls back to a stock title on any failure except an exhausted usage
    /// meter. Titles are charged to the usage meter only.
    pub async fn generate_title(
        &self,
        story_text: &str,
        username: &str,
    ) -> Result<String, StoryError> {
        self.ledger
            .ensure_usage_available(self.config.usage_estimate_tokens)?;

        let title = match self
            .complete(prompts::title(story_text), self.config.title)
            .await
        {
            Ok((reply, usage)) => {
                self.ledger.charge_usage(username, usage.as_ref())?;
                clean_title(&reply)
            }
            Err(e) => {
                warn!(error = %e, "title generation failed, using fallback");
                None
            }
        };

        Ok(title.unwrap_or_else(|| prompts::fallback_title(username)))
    }

    /// Check both accounts and return the scene price.
    fn preflight(&self, prefs: &StoryPreferences) -> Result<u64, StoryError> {
        let cost = Pricing::scene_cost(prefs.use_illustrations);
        self.ledger.ensure_available(self.config.actor, cost)?;
        self.ledger
            .ensure_usage_available(self.config.usage_estimate_tokens)?;
        Ok(cost)
    }

    /// Charge a generated scene. The usage meter goes first: it saturates
    /// instead of failing on funds, so the credit debit is the last write.
    fn settle(&self, username: &str, cost: u64, usage: Option<&Usage>) -> Result<(), StoryError> {
        let meter = self.ledger.charge_usage(username, usage)?;
        let credits = self.ledger.debit(self.config.actor, cost)?;
        debug!(cost, credits, meter, "settled scene");
        Ok(())
    }

    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        params: GenerationParams,
    ) -> Result<(String, Option<Usage>), StoryError> {
        let request = ChatCompletionRequest::new(messages)
            .with_temperature(params.temperature)
            .with_max_tokens(params.max_tokens);

        let response = self.backend.chat_completion(request).await.map_err(|e| {
            warn!(error = %e, "chat completion failed");
            StoryError::from(e)
        })?;
        Ok((response.reply, response.usage))
    }
}

fn frame<'a>(prefs: &'a StoryPreferences, kind: StoryKind, username: &'a str) -> StoryFrame<'a> {
    StoryFrame {
        kind,
        protagonist: username,
        genre: prefs.genre.as_deref(),
        custom_prompt: prefs.custom_prompt.as_deref(),
    }
}

fn clean_title(reply: &str) -> Option<String> {
    let title = reply
        .trim()
        .trim_matches(|c: char| c == '"' || c == '*' || c == '«' || c == '»')
        .trim();
    (!title.is_empty()).then(|| title.to_string())
}

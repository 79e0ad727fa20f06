//! Story engine configuration.

use crate::ledger::ActorClass;

/// Default backend address.
pub const DEFAULT_API_BASE: &str = "http://localhost:4000";

/// Provider tokens the usage meter must cover before a generation starts.
pub const DEFAULT_USAGE_ESTIMATE_TOKENS: u64 = 1000;

/// Sampling settings for one kind of request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: usize,
}

impl GenerationParams {
    pub const fn new(temperature: f32, max_tokens: usize) -> Self {
        Self {
            temperature,
            max_tokens,
        }
    }
}

/// Configuration for a [`StoryOrchestrator`](crate::StoryOrchestrator).
#[derive(Debug, Clone, PartialEq)]
pub struct StoryConfig {
    /// Base URL of the backend serving `/api/chat-completion`.
    pub api_base: String,

    /// Whose credits are spent.
    pub actor: ActorClass,

    pub opening: GenerationParams,
    pub continuation: GenerationParams,
    pub ending: GenerationParams,
    pub title: GenerationParams,

    /// Pre-flight estimate checked against the usage meter.
    pub usage_estimate_tokens: u64,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            actor: ActorClass::Guest,
            opening: GenerationParams::new(0.8, 800),
            continuation: GenerationParams::new(0.7, 800),
            ending: GenerationParams::new(0.8, 500),
            title: GenerationParams::new(0.8, 50),
            usage_estimate_tokens: DEFAULT_USAGE_ESTIMATE_TOKENS,
        }
    }
}

impl StoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `STORY_API_BASE` and `STORY_ACTOR` (`guest` or `registered`),
    /// falling back to defaults for anything unset or unrecognised.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(base) = std::env::var("STORY_API_BASE") {
            if !base.trim().is_empty() {
                config = config.with_api_base(base);
            }
        }
        if let Some(actor) = std::env::var("STORY_ACTOR")
            .ok()
            .as_deref()
            .and_then(parse_actor)
        {
            config = config.with_actor(actor);
        }
        config
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_actor(mut self, actor: ActorClass) -> Self {
        self.actor = actor;
        self
    }

    pub fn with_opening(mut self, params: GenerationParams) -> Self {
        self.opening = params;
        self
    }

    pub fn with_continuation(mut self, params: GenerationParams) -> Self {
        self.continuation = params;
        self
    }

    pub fn with_ending(mut self, params: GenerationParams) -> Self {
        self.ending = params;
        self
    }

    pub fn with_usage_estimate(mut self, tokens: u64) -> Self {
        self.usage_estimate_tokens = tokens;
        self
    }
}

/// `"guest"` / `"registered"`, case-insensitive.
pub fn parse_actor(s: &str) -> Option<ActorClass> {
    match s.trim().to_lowercase().as_str() {
        "guest" => Some(ActorClass::Guest),
        "registered" => Some(ActorClass::Registered),
        _ => None,
    }
}

//! The reader's story selection.

use crate::store::{keys, KeyValueStore, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the story is built around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryKind {
    /// The reader is the protagonist.
    Personal,
    /// A story in a chosen genre.
    Genre,
    /// A story from the reader's own idea.
    Custom,
}

impl StoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoryKind::Personal => "personal",
            StoryKind::Genre => "genre",
            StoryKind::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "personal" => Some(StoryKind::Personal),
            "genre" => Some(StoryKind::Genre),
            "custom" => Some(StoryKind::Custom),
            _ => None,
        }
    }
}

impl fmt::Display for StoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a selection cannot start a story.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingField {
    Username,
    StoryKind,
    Genre,
    CustomPrompt,
}

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MissingField::Username => "username",
            MissingField::StoryKind => "story type",
            MissingField::Genre => "genre",
            MissingField::CustomPrompt => "custom prompt",
        })
    }
}

/// Story selection, persisted as plain strings under their own keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryPreferences {
    pub kind: Option<StoryKind>,
    pub genre: Option<String>,
    pub custom_prompt: Option<String>,
    pub use_illustrations: bool,
}

impl Default for StoryPreferences {
    fn default() -> Self {
        Self {
            kind: None,
            genre: None,
            custom_prompt: None,
            use_illustrations: true,
        }
    }
}

impl StoryPreferences {
    pub fn personal() -> Self {
        Self {
            kind: Some(StoryKind::Personal),
            ..Self::default()
        }
    }

    pub fn genre(genre: impl Into<String>) -> Self {
        Self {
            kind: Some(StoryKind::Genre),
            genre: Some(genre.into()),
            ..Self::default()
        }
    }

    pub fn custom(prompt: impl Into<String>) -> Self {
        Self {
            kind: Some(StoryKind::Custom),
            custom_prompt: Some(prompt.into()),
            ..Self::default()
        }
    }

    pub fn with_illustrations(mut self, enabled: bool) -> Self {
        self.use_illustrations = enabled;
        self
    }

    /// Load from the store. Missing keys load as unset; a missing
    /// illustration flag loads as enabled.
    pub fn load(store: &dyn KeyValueStore) -> Result<Self, StoreError> {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        Ok(Self {
            kind: store
                .get(keys::STORY_TYPE)?
                .as_deref()
                .and_then(StoryKind::parse),
            genre: non_empty(store.get(keys::GENRE)?),
            custom_prompt: non_empty(store.get(keys::CUSTOM_PROMPT)?),
            use_illustrations: store
                .get(keys::USE_ILLUSTRATIONS)?
                .map_or(true, |v| v.trim() != "false"),
        })
    }

    /// Write to the store, removing keys for unset fields.
    pub fn save(&self, store: &dyn KeyValueStore) -> Result<(), StoreError> {
        match self.kind {
            Some(kind) => store.set(keys::STORY_TYPE, kind.as_str())?,
            None => store.remove(keys::STORY_TYPE)?,
        }
        match &self.genre {
            Some(genre) => store.set(keys::GENRE, genre)?,
            None => store.remove(keys::GENRE)?,
        }
        match &self.custom_prompt {
            Some(prompt) => store.set(keys::CUSTOM_PROMPT, prompt)?,
            None => store.remove(keys::CUSTOM_PROMPT)?,
        }
        store.set(
            keys::USE_ILLUSTRATIONS,
            if self.use_illustrations { "true" } else { "false" },
        )
    }

    /// Check that a first scene can be generated for `username`.
    pub fn validate(&self, username: &str) -> Result<StoryKind, MissingField> {
        if username.trim().is_empty() {
            return Err(MissingField::Username);
        }
        let kind = self.kind.ok_or(MissingField::StoryKind)?;
        match kind {
            StoryKind::Genre if self.genre.is_none() => Err(MissingField::Genre),
            StoryKind::Custom if self.custom_prompt.is_none() => Err(MissingField::CustomPrompt),
            _ => Ok(kind),
        }
    }

    /// Forget the custom idea once its story has started.
    pub fn consume_custom_prompt(store: &dyn KeyValueStore) -> Result<(), StoreError> {
        store.remove(keys::CUSTOM_PROMPT)
    }
}

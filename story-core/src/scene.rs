//! Story scenes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One option offered at the end of a scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    /// Unique within the turn that produced it.
    pub id: Uuid,
    pub text: String,
}

impl Choice {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
        }
    }
}

/// One turn of the story. Scenes are never edited after generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    pub text: String,
    pub choices: Vec<Choice>,
    pub is_ending: bool,
    /// `data:image/png;base64,...` once an illustration has arrived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub illustration: Option<String>,
}

impl Scene {
    /// A scene the reader can continue from.
    pub fn ongoing(text: impl Into<String>, choices: Vec<Choice>) -> Self {
        Self {
            text: text.into(),
            choices,
            is_ending: false,
            illustration: None,
        }
    }

    /// A closing scene: no choices.
    pub fn ending(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            choices: Vec::new(),
            is_ending: true,
            illustration: None,
        }
    }

    pub fn choice(&self, index: usize) -> Option<&Choice> {
        self.choices.get(index)
    }
}

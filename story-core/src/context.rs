//! Story context for prompt building.
//!
//! Bounds how much earlier narrative goes into each generation request.
//! Two windows are kept side by side: short summaries of past scenes and
//! the full text of the most recent ones. Both are persisted so a session
//! can resume, and both are cleared when a story starts or ends.

use crate::store::{get_json, keys, set_json, KeyValueStore, StoreError};
use std::sync::Arc;

/// Summaries longer than this many characters are cut.
pub const SUMMARY_MAX_CHARS: usize = 200;

/// Appended to a cut summary.
pub const ELLIPSIS: &str = "...";

/// Number of summaries kept.
pub const MAX_SUMMARIES: usize = 3;

/// Number of full scene texts kept.
pub const MAX_RECENT_SCENES: usize = 3;

/// Shorten a scene to at most [`SUMMARY_MAX_CHARS`] characters.
///
/// The cut is a hard one: no attempt is made to end on a word.
pub fn summarize(text: &str) -> String {
    match text.char_indices().nth(SUMMARY_MAX_CHARS) {
        None => text.to_string(),
        Some((byte_index, _)) => format!("{}{ELLIPSIS}", &text[..byte_index]),
    }
}

/// Rolling summaries plus recent scene history.
#[derive(Clone)]
pub struct ContextWindow {
    store: Arc<dyn KeyValueStore>,
}

impl ContextWindow {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Summarize `text` and append it, dropping the oldest beyond the limit.
    pub fn push_summary(&self, text: &str) -> Result<(), StoreError> {
        let mut summaries = self.summaries()?;
        summaries.push(summarize(text));
        let excess = summaries.len().saturating_sub(MAX_SUMMARIES);
        summaries.drain(..excess);
        set_json(self.store.as_ref(), keys::STORY_SUMMARIES, &summaries)
    }

    /// Stored summaries, oldest first.
    pub fn summaries(&self) -> Result<Vec<String>, StoreError> {
        Ok(get_json(self.store.as_ref(), keys::STORY_SUMMARIES)?.unwrap_or_default())
    }

    /// Replace the recent history with the last scenes of `history`.
    pub fn set_recent_history(&self, history: &[String]) -> Result<(), StoreError> {
        let start = history.len().saturating_sub(MAX_RECENT_SCENES);
        set_json(
            self.store.as_ref(),
            keys::STORY_RECENT_HISTORY,
            &history[start..],
        )
    }

    /// Recent full scene texts, oldest first.
    pub fn recent_history(&self) -> Result<Vec<String>, StoreError> {
        Ok(get_json(self.store.as_ref(), keys::STORY_RECENT_HISTORY)?.unwrap_or_default())
    }

    /// Forget both windows.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.remove(keys::STORY_SUMMARIES)?;
        self.store.remove(keys::STORY_RECENT_HISTORY)
    }

    /// Build the prompt preamble: summaries, then recent history, then the
    /// current scene and, if given, the reader's choice.
    pub fn build_preamble(
        &self,
        current_text: &str,
        choice: Option<&str>,
    ) -> Result<String, StoreError> {
        let mut preamble = String::new();

        let summaries = self.summaries()?;
        if !summaries.is_empty() {
            preamble.push_str("[Últimos resúmenes:]\n");
            preamble.push_str(&summaries.join("\n"));
            preamble.push_str("\n\n");
        }

        let recent = self.recent_history()?;
        if !recent.is_empty() {
            preamble.push_str("[Contexto reciente:]\n");
            preamble.push_str(&recent.join("\n\n"));
            preamble.push_str("\n\n");
        }

        preamble.push_str(&format!("Historia actual: \"{current_text}\""));
        if let Some(choice) = choice {
            preamble.push_str(&format!("\nElección: \"{choice}\""));
        }

        Ok(preamble)
    }
}

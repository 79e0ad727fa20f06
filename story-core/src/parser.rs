//! Parsing of narration replies.
//!
//! The model is asked to answer as
//!
//! ```text
//! narrative text
//! |OPCIONES|
//! 1. first option
//! 2. second option
//! 3. third option
//! ```
//!
//! Anything without the delimiter is rejected.

use crate::scene::Choice;
use thiserror::Error;

/// Separates the narrative from the numbered options.
pub const OPTIONS_DELIMITER: &str = "|OPCIONES|";

/// At most this many choices are offered per scene.
pub const MAX_CHOICES: usize = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Reply does not contain the |OPCIONES| delimiter")]
    MissingDelimiter,
}

/// A reply split into narrative and choices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub narrative: String,
    pub choices: Vec<Choice>,
}

/// Split a reply on the first delimiter and collect its numbered options.
pub fn parse_reply(reply: &str) -> Result<ParsedReply, ParseError> {
    let (narrative, options) = reply
        .split_once(OPTIONS_DELIMITER)
        .ok_or(ParseError::MissingDelimiter)?;

    let choices = options
        .lines()
        .filter_map(option_text)
        .take(MAX_CHOICES)
        .map(Choice::new)
        .collect();

    Ok(ParsedReply {
        narrative: narrative.trim().to_string(),
        choices,
    })
}

/// The narrative part of a reply that may or may not carry options.
pub fn narrative_only(reply: &str) -> String {
    reply
        .split_once(OPTIONS_DELIMITER)
        .map_or(reply, |(narrative, _)| narrative)
        .trim()
        .to_string()
}

/// `"2. Go right"` -> `Some("Go right")`; lines not starting with `N.` -> `None`.
fn option_text(line: &str) -> Option<&str> {
    let line = line.trim();
    let rest = line.trim_start_matches(|c: char| c.is_ascii_digit());
    if rest.len() == line.len() {
        return None;
    }
    rest.strip_prefix('.').map(str::trim)
}

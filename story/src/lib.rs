//! Story backend server and headless player.
//!
//! The server proxies chat completions to Groq and illustrations to
//! Stability AI; the player drives a [`story_core::StorySession`] against it
//! from the terminal.

pub mod play;
pub mod server;

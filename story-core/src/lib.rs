//! Interactive story engine with AI narration and credit metering.
//!
//! This crate provides:
//! - A credit ledger per actor class plus a usage meter
//! - Bounded story context (rolling summaries and recent scenes)
//! - Parsing of `narrative |OPCIONES| numbered options` replies
//! - A story session state machine with persisted scenes
//! - Background scene illustrations that are dropped once superseded
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use story_core::{FileStore, HttpBackend, StoryOrchestrator, StoryPreferences, StorySession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(FileStore::open("story.json")?);
//!     StoryPreferences::genre("piratas").save(store.as_ref())?;
//!
//!     let backend = Arc::new(HttpBackend::new("http://localhost:4000")?);
//!     let orchestrator = StoryOrchestrator::new(backend, store);
//!     let mut session = StorySession::new(orchestrator, "Lucía");
//!
//!     let scene = session.start().await?;
//!     println!("{}", scene.text);
//!
//!     let scene = session.choose(0).await?;
//!     println!("{}", scene.text);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod context;
pub mod illustration;
pub mod ledger;
pub mod orchestrator;
pub mod parser;
pub mod preferences;
pub mod prompts;
pub mod scene;
pub mod session;
pub mod store;
pub mod testing;

// Primary public API
pub use backend::{
    BackendError, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatRole,
    ErrorBody, GenerateImageRequest, GenerateImageResponse, HttpBackend, StoryBackend, Usage,
};
pub use config::{GenerationParams, StoryConfig};
pub use context::{summarize, ContextWindow};
pub use illustration::{IllustrationError, IllustrationSlot, Illustrator};
pub use ledger::{ActorClass, CreditLedger, LedgerError, Pricing};
pub use orchestrator::{StoryError, StoryOrchestrator};
pub use parser::{parse_reply, ParseError, ParsedReply};
pub use preferences::{StoryKind, StoryPreferences};
pub use scene::{Choice, Scene};
pub use session::{StoryPhase, StorySession};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
pub use testing::{MockBackend, TestHarness};

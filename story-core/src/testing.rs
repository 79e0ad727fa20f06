//! Testing utilities for the story engine.
//!
//! This module provides tools for integration testing:
//! - `MockBackend` for deterministic testing without API calls
//! - `TestHarness` for scripted story sessions over an in-memory store
//! - Assertion helpers for balances and context windows

use crate::backend::{
    BackendError, ChatCompletionRequest, ChatCompletionResponse, StoryBackend, Usage,
};
use crate::ledger::ActorClass;
use crate::orchestrator::StoryOrchestrator;
use crate::preferences::StoryPreferences;
use crate::session::StorySession;
use crate::store::{KeyValueStore, MemoryStore};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Reply returned once the scripted replies run out.
pub const DEFAULT_REPLY: &str =
    "La historia continúa.\n|OPCIONES|\n1. Seguir adelante\n2. Volver atrás";

/// Base64 returned once the scripted images run out.
pub const DEFAULT_IMAGE: &str = "iVBORw0KGgo=";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A backend that returns scripted responses and records requests.
#[derive(Default)]
pub struct MockBackend {
    replies: Mutex<VecDeque<Result<ChatCompletionResponse, BackendError>>>,
    images: Mutex<VecDeque<Result<String, BackendError>>>,
    requests: Mutex<Vec<ChatCompletionRequest>>,
    image_prompts: Mutex<Vec<String>>,
    image_delay: Option<Duration>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply without usage metadata.
    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        self.queue_reply(reply, None);
        self
    }

    /// Queue a reply reporting `prompt + completion` tokens.
    pub fn with_reply_usage(self, reply: impl Into<String>, prompt: u64, completion: u64) -> Self {
        self.queue_reply(
            reply,
            Some(Usage {
                prompt_tokens: prompt,
                completion_tokens: completion,
            }),
        );
        self
    }

    pub fn with_error(self, error: BackendError) -> Self {
        self.queue_error(error);
        self
    }

    pub fn with_image(self, result: Result<String, BackendError>) -> Self {
        lock(&self.images).push_back(result);
        self
    }

    /// Delay every image response, leaving time to supersede it.
    pub fn with_image_delay(mut self, delay: Duration) -> Self {
        self.image_delay = Some(delay);
        self
    }

    pub fn queue_reply(&self, reply: impl Into<String>, usage: Option<Usage>) {
        lock(&self.replies).push_back(Ok(ChatCompletionResponse {
            reply: reply.into(),
            usage,
        }));
    }

    pub fn queue_error(&self, error: BackendError) {
        lock(&self.replies).push_back(Err(error));
    }

    /// Every chat request received, oldest first.
    pub fn requests(&self) -> Vec<ChatCompletionRequest> {
        lock(&self.requests).clone()
    }

    /// The user message of the most recent chat request.
    pub fn last_user_message(&self) -> Option<String> {
        lock(&self.requests)
            .last()
            .and_then(|r| r.messages.last())
            .map(|m| m.content.clone())
    }

    pub fn chat_calls(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn image_prompts(&self) -> Vec<String> {
        lock(&self.image_prompts).clone()
    }
}

#[async_trait]
impl StoryBackend for MockBackend {
    async fn chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, BackendError> {
        if request.messages.is_empty() {
            return Err(BackendError::EmptyMessages);
        }
        lock(&self.requests).push(request);

        lock(&self.replies).pop_front().unwrap_or_else(|| {
            Ok(ChatCompletionResponse {
                reply: DEFAULT_REPLY.to_string(),
                usage: None,
            })
        })
    }

    async fn generate_image(&self, prompt: &str) -> Result<String, BackendError> {
        lock(&self.image_prompts).push(prompt.to_string());
        let result = lock(&self.images)
            .pop_front()
            .unwrap_or_else(|| Ok(DEFAULT_IMAGE.to_string()));

        if let Some(delay) = self.image_delay {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

/// Test harness for running story scenarios.
pub struct TestHarness {
    /// The scripted backend.
    pub backend: Arc<MockBackend>,
    /// The store shared by every component.
    pub store: Arc<MemoryStore>,
    /// The session under test.
    pub session: StorySession,
}

impl TestHarness {
    /// A personal story for "Ana" without illustrations.
    pub fn new(backend: MockBackend) -> Self {
        Self::with_preferences(backend, StoryPreferences::personal().with_illustrations(false))
    }

    pub fn with_preferences(backend: MockBackend, preferences: StoryPreferences) -> Self {
        let backend = Arc::new(backend);
        let store = Arc::new(MemoryStore::new());
        preferences
            .save(store.as_ref())
            .unwrap_or_else(|e| panic!("failed to save preferences: {e}"));

        let orchestrator = StoryOrchestrator::new(backend.clone(), store.clone());
        let session = StorySession::new(orchestrator, "Ana");

        Self {
            backend,
            store,
            session,
        }
    }

    pub fn orchestrator(&self) -> &StoryOrchestrator {
        self.session.orchestrator()
    }

    pub fn credits(&self, actor: ActorClass) -> u64 {
        self.orchestrator()
            .ledger()
            .balance(actor)
            .unwrap_or_else(|e| panic!("failed to read balance: {e}"))
    }

    pub fn usage_balance(&self) -> u64 {
        self.orchestrator()
            .ledger()
            .usage_balance()
            .unwrap_or_else(|e| panic!("failed to read usage meter: {e}"))
    }

    pub fn summaries(&self) -> Vec<String> {
        self.orchestrator()
            .context()
            .summaries()
            .unwrap_or_else(|e| panic!("failed to read summaries: {e}"))
    }

    pub fn recent_history(&self) -> Vec<String> {
        self.orchestrator()
            .context()
            .recent_history()
            .unwrap_or_else(|e| panic!("failed to read recent history: {e}"))
    }

    /// Overwrite a stored balance.
    pub fn set_credits(&self, actor: ActorClass, amount: u64) {
        let key = match actor {
            ActorClass::Guest => crate::store::keys::CREDIT_BALANCE_GUEST,
            ActorClass::Registered => crate::store::keys::CREDIT_BALANCE_REGISTERED,
        };
        self.store
            .set(key, &amount.to_string())
            .unwrap_or_else(|e| panic!("failed to set balance: {e}"));
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert the guest credit balance.
#[track_caller]
pub fn assert_guest_credits(harness: &TestHarness, expected: u64) {
    let actual = harness.credits(ActorClass::Guest);
    assert_eq!(actual, expected, "Expected {expected} guest credits, got {actual}");
}

/// Assert both context windows are empty.
#[track_caller]
pub fn assert_context_cleared(harness: &TestHarness) {
    assert!(
        harness.summaries().is_empty(),
        "Expected no summaries, got {:?}",
        harness.summaries()
    );
    assert!(
        harness.recent_history().is_empty(),
        "Expected no recent history, got {:?}",
        harness.recent_history()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ChatMessage;

    #[tokio::test]
    async fn test_mock_backend_replays_in_order() {
        let backend = MockBackend::new()
            .with_reply("uno")
            .with_reply_usage("dos", 10, 5)
            .with_error(BackendError::RateLimited("slow".into()));
        let request = || ChatCompletionRequest::new(vec![ChatMessage::user("hola")]);

        assert_eq!(backend.chat_completion(request()).await.unwrap().reply, "uno");
        let second = backend.chat_completion(request()).await.unwrap();
        assert_eq!(second.usage.map(|u| u.total()), Some(15));
        assert!(backend.chat_completion(request()).await.is_err());
        assert_eq!(
            backend.chat_completion(request()).await.unwrap().reply,
            DEFAULT_REPLY
        );
        assert_eq!(backend.chat_calls(), 4);
    }

    #[tokio::test]
    async fn test_mock_backend_rejects_empty_messages() {
        let backend = MockBackend::new();
        let err = backend
            .chat_completion(ChatCompletionRequest::new(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::EmptyMessages));
        assert_eq!(backend.chat_calls(), 0);
    }

    #[test]
    fn test_harness_defaults() {
        let harness = TestHarness::new(MockBackend::new());
        assert_guest_credits(&harness, 100);
        assert_eq!(harness.usage_balance(), 2500);
        assert_context_cleared(&harness);
    }
}

//! Story session state machine.
//!
//! ```text
//! Uninitialized --start--> InProgress --choose/back--> InProgress
//!                              |
//!                             end
//!                              v
//!                            Ended --reset--> Uninitialized
//! ```
//!
//! The current scene and the scenes before it are persisted after every
//! transition, so [`StorySession::restore`] can pick a story up again.

use crate::illustration::{IllustrationError, IllustrationSlot, Illustrator};
use crate::orchestrator::{StoryError, StoryOrchestrator};
use crate::scene::Scene;
use crate::store::{get_json, keys, set_json};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where a session is in its story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoryPhase {
    Uninitialized,
    InProgress,
    Ended,
}

/// One reader's story.
pub struct StorySession {
    orchestrator: StoryOrchestrator,
    username: String,
    phase: StoryPhase,
    current: Option<Scene>,
    history: Vec<Scene>,
    illustrator: Illustrator,
    illustrations: IllustrationSlot,
    pending_illustration: Option<JoinHandle<()>>,
}

impl StorySession {
    /// A fresh session with no story yet.
    pub fn new(orchestrator: StoryOrchestrator, username: impl Into<String>) -> Self {
        Self {
            illustrator: Illustrator::new(orchestrator.backend().clone()),
            orchestrator,
            username: username.into(),
            phase: StoryPhase::Uninitialized,
            current: None,
            history: Vec::new(),
            illustrations: IllustrationSlot::new(),
            pending_illustration: None,
        }
    }

    /// Rebuild a session from the persisted scenes.
    pub fn restore(
        orchestrator: StoryOrchestrator,
        username: impl Into<String>,
    ) -> Result<Self, StoryError> {
        let store = orchestrator.store().clone();
        let current: Option<Scene> = get_json(store.as_ref(), keys::CURRENT_SCENE)?;
        let history: Vec<Scene> =
            get_json(store.as_ref(), keys::STORY_HISTORY)?.unwrap_or_default();

        let mut session = Self::new(orchestrator, username);
        session.phase = match &current {
            None => StoryPhase::Uninitialized,
            Some(scene) if scene.is_ending => StoryPhase::Ended,
            Some(_) => StoryPhase::InProgress,
        };
        session.history = if current.is_some() { history } else { Vec::new() };
        session.current = current;

        debug!(phase = ?session.phase, scenes = session.history.len(), "restored session");
        Ok(session)
    }

    pub fn phase(&self) -> StoryPhase {
        self.phase
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn current_scene(&self) -> Option<&Scene> {
        self.current.as_ref()
    }

    /// Scenes before the current one, oldest first.
    pub fn history(&self) -> &[Scene] {
        &self.history
    }

    pub fn orchestrator(&self) -> &StoryOrchestrator {
        &self.orchestrator
    }

    /// Generate the opening scene.
    pub async fn start(&mut self) -> Result<&Scene, StoryError> {
        if self.phase != StoryPhase::Uninitialized {
            return Err(StoryError::InvalidState(
                "Ya hay una historia en curso.".to_string(),
            ));
        }

        let store = self.orchestrator.store().clone();
        store.remove(keys::CURRENT_SCENE)?;
        store.remove(keys::STORY_HISTORY)?;

        let scene = self
            .orchestrator
            .generate_initial_scene(&self.username)
            .await?;

        info!(username = %self.username, "story started");
        self.history.clear();
        self.advance_to(scene, StoryPhase::InProgress)
    }

    /// Follow choice `index` (zero-based) of the current scene.
    pub async fn choose(&mut self, index: usize) -> Result<&Scene, StoryError> {
        let current = self.in_progress_scene()?;
        let choice = current.choice(index).ok_or_else(|| {
            StoryError::InvalidState(format!("No existe la opción {}.", index + 1))
        })?;

        let texts = self.scene_texts();
        let scene = self
            .orchestrator
            .continue_story(&current.text, &choice.text, &self.username, &texts)
            .await?;

        self.push_current();
        self.advance_to(scene, StoryPhase::InProgress)
    }

    /// Close the story with an ending scene.
    pub async fn end(&mut self) -> Result<&Scene, StoryError> {
        let current = self.in_progress_scene()?;

        let texts = self.scene_texts();
        let scene = self
            .orchestrator
            .generate_ending(&current.text, &self.username, &texts)
            .await?;

        info!(username = %self.username, scenes = self.history.len() + 2, "story ended");
        self.push_current();
        self.advance_to(scene, StoryPhase::Ended)
    }

    /// Return to the previous scene.
    pub fn back(&mut self) -> Result<&Scene, StoryError> {
        self.in_progress_scene()?;
        let previous = self
            .history
            .pop()
            .ok_or_else(|| StoryError::InvalidState("No hay una escena anterior.".to_string()))?;

        self.illustrations.supersede();
        self.current = Some(previous);
        self.persist()?;
        self.current_or_invalid()
    }

    /// Drop the story and go back to [`StoryPhase::Uninitialized`].
    pub fn reset(&mut self) -> Result<(), StoryError> {
        let store = self.orchestrator.store().clone();
        store.remove(keys::CURRENT_SCENE)?;
        store.remove(keys::STORY_HISTORY)?;
        self.orchestrator.context().clear()?;

        self.illustrations.supersede();
        self.pending_illustration = None;
        self.current = None;
        self.history.clear();
        self.phase = StoryPhase::Uninitialized;
        Ok(())
    }

    /// A title for the story so far.
    pub async fn title(&self) -> Result<String, StoryError> {
        let text = self.scene_texts().join("\n\n");
        if text.is_empty() {
            return Err(StoryError::InvalidState("La historia está vacía.".to_string()));
        }
        self.orchestrator.generate_title(&text, &self.username).await
    }

    /// Apply an illustration that has arrived for the current scene.
    ///
    /// Returns `None` when nothing is ready.
    pub fn poll_illustration(&mut self) -> Option<Result<(), IllustrationError>> {
        let url = match self.illustrations.take()? {
            Ok(url) => url,
            Err(e) => return Some(Err(e)),
        };
        if let Some(scene) = self.current.as_mut() {
            scene.illustration = Some(url);
        }
        if let Err(e) = self.persist() {
            warn!(error = %e, "failed to persist illustration");
        }
        Some(Ok(()))
    }

    /// Wait for the outstanding illustration request, then apply it.
    pub async fn wait_for_illustration(&mut self) -> Option<Result<(), IllustrationError>> {
        if let Some(handle) = self.pending_illustration.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "illustration task failed");
            }
        }
        self.poll_illustration()
    }

    fn in_progress_scene(&self) -> Result<Scene, StoryError> {
        match (&self.phase, &self.current) {
            (StoryPhase::InProgress, Some(scene)) => Ok(scene.clone()),
            (StoryPhase::Ended, _) => Err(StoryError::InvalidState(
                "La historia ha terminado.".to_string(),
            )),
            _ => Err(StoryError::InvalidState(
                "No hay ninguna historia en curso.".to_string(),
            )),
        }
    }

    fn current_or_invalid(&self) -> Result<&Scene, StoryError> {
        self.current
            .as_ref()
            .ok_or_else(|| StoryError::InvalidState("No hay escena actual.".to_string()))
    }

    /// Texts of every scene so far, the current one included.
    fn scene_texts(&self) -> Vec<String> {
        self.history
            .iter()
            .chain(self.current.as_ref())
            .map(|scene| scene.text.clone())
            .collect()
    }

    fn push_current(&mut self) {
        if let Some(previous) = self.current.take() {
            self.history.push(previous);
        }
    }

    fn advance_to(&mut self, scene: Scene, phase: StoryPhase) -> Result<&Scene, StoryError> {
        self.current = Some(scene);
        self.phase = phase;
        self.persist()?;
        self.request_illustration()?;
        self.current_or_invalid()
    }

    fn persist(&self) -> Result<(), StoryError> {
        let store = self.orchestrator.store();
        match &self.current {
            Some(scene) => set_json(store.as_ref(), keys::CURRENT_SCENE, scene)?,
            None => store.remove(keys::CURRENT_SCENE)?,
        }
        set_json(store.as_ref(), keys::STORY_HISTORY, &self.history)?;
        Ok(())
    }

    fn request_illustration(&mut self) -> Result<(), StoryError> {
        let Some(scene) = &self.current else {
            return Ok(());
        };
        if !self.orchestrator.preferences()?.use_illustrations {
            self.illustrations.supersede();
            return Ok(());
        }

        let ticket = self.illustrations.issue();
        let slot = self.illustrations.clone();
        let illustrator = self.illustrator.clone();
        let text = scene.text.clone();

        // A superseded task is left running; its result is dropped on delivery.
        self.pending_illustration = Some(tokio::spawn(async move {
            let result = illustrator.illustrate(&text).await;
            if let Err(e) = &result {
                warn!(error = %e, "illustration failed");
            }
            slot.deliver(ticket, result);
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::MockBackend;
    use std::sync::Arc;

    fn session() -> StorySession {
        let backend = Arc::new(MockBackend::new());
        let orchestrator = StoryOrchestrator::new(backend, Arc::new(MemoryStore::new()));
        StorySession::new(orchestrator, "Ana")
    }

    #[test]
    fn test_new_session_is_uninitialized() {
        let session = session();
        assert_eq!(session.phase(), StoryPhase::Uninitialized);
        assert!(session.current_scene().is_none());
        assert!(session.history().is_empty());
    }

    #[test]
    fn test_back_requires_story_in_progress() {
        let mut session = session();
        assert!(matches!(session.back(), Err(StoryError::InvalidState(_))));
    }

    #[test]
    fn test_restore_empty_store() {
        let backend = Arc::new(MockBackend::new());
        let orchestrator = StoryOrchestrator::new(backend, Arc::new(MemoryStore::new()));
        let session = StorySession::restore(orchestrator, "Ana").unwrap();
        assert_eq!(session.phase(), StoryPhase::Uninitialized);
    }
}

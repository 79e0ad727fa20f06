//! HTTP backend proxying the story engine's model calls.
//!
//! - GET /                    - Health check
//! - GET /api/ping            - Liveness probe
//! - POST /api/chat-completion - Chat completion through the chat provider
//! - POST /api/generate-image  - Illustration through the image provider

pub mod handlers;
pub mod image_prompt;
pub mod providers;

use anyhow::Result;
use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use image_prompt::{ChatTranslator, Passthrough, Translator};
pub use providers::{ChatProvider, ImageProvider, ProviderError, Unconfigured};

/// Port the backend listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 4000;

/// Shared state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<dyn ChatProvider>,
    pub images: Arc<dyn ImageProvider>,
    pub translator: Arc<dyn Translator>,
}

impl AppState {
    /// State without prompt translation.
    pub fn new(chat: Arc<dyn ChatProvider>, images: Arc<dyn ImageProvider>) -> Self {
        Self {
            chat,
            images,
            translator: Arc::new(Passthrough),
        }
    }

    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = translator;
        self
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(handlers::health))
        .route("/api/ping", get(handlers::ping))
        .route("/api/chat-completion", post(handlers::chat_completion))
        .route("/api/generate-image", post(handlers::generate_image))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the backend on `0.0.0.0:port` until the process exits.
pub async fn run(port: u16, state: AppState) -> Result<()> {
    let app = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "story backend listening");
    axum::serve(listener, app).await?;

    Ok(())
}

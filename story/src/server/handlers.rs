//! HTTP handlers for the story backend.

use crate::server::image_prompt::{normalize, to_english};
use crate::server::providers::ProviderError;
use crate::server::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use story_core::{ChatCompletionRequest, GenerateImageRequest, GenerateImageResponse};
use tracing::{error, info, warn};

/// Error code returned for any failed chat completion.
pub const CHAT_COMPLETION_ERROR: &str = "CHAT_COMPLETION_ERROR";

pub const EMPTY_MESSAGES_ERROR: &str = "messages debe ser un array y no puede estar vacío.";

pub const IMAGE_RATE_LIMITED_ERROR: &str = "Límite de peticiones a Stability AI excedido o créditos agotados. Intenta más tarde o revisa tu cuenta.";

pub const EMPTY_PROMPT_ERROR: &str = "prompt es obligatorio.";

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (status, Json(json!({ "error": message }))).into_response()
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn ping() -> Json<Value> {
    Json(json!({ "pong": true }))
}

/// `POST /api/chat-completion`
///
/// The body is taken as raw JSON so a missing or non-array `messages`
/// is answered with 400 rather than the extractor's 422.
pub async fn chat_completion(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> axum::response::Response {
    let has_messages = body
        .get("messages")
        .and_then(Value::as_array)
        .is_some_and(|messages| !messages.is_empty());
    if !has_messages {
        warn!("chat completion without messages");
        return error_response(StatusCode::BAD_REQUEST, EMPTY_MESSAGES_ERROR);
    }

    let request: ChatCompletionRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "malformed chat completion request");
            return error_response(StatusCode::BAD_REQUEST, &e.to_string());
        }
    };

    match state.chat.complete(&request).await {
        Ok(response) => {
            info!(
                messages = request.messages.len(),
                tokens = response.usage.as_ref().map(|u| u.total()),
                "chat completion"
            );
            Json(response).into_response()
        }
        Err(e) => {
            error!(error = %e, "chat completion failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, CHAT_COMPLETION_ERROR)
        }
    }
}

/// `POST /api/generate-image`
pub async fn generate_image(
    State(state): State<AppState>,
    Json(request): Json<GenerateImageRequest>,
) -> axum::response::Response {
    if request.prompt.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, EMPTY_PROMPT_ERROR);
    }

    let prompt = to_english(state.translator.as_ref(), &normalize(&request.prompt)).await;
    info!(%prompt, "generating image");

    match state.images.generate(&prompt).await {
        Ok(bytes) => Json(GenerateImageResponse {
            url: STANDARD.encode(bytes),
        })
        .into_response(),
        Err(ProviderError::RateLimited(message)) => {
            error!(%message, "image provider rate limited");
            error_response(StatusCode::TOO_MANY_REQUESTS, IMAGE_RATE_LIMITED_ERROR)
        }
        Err(e @ ProviderError::Unavailable(_)) => {
            error!(error = %e, "image provider unavailable");
            error_response(StatusCode::BAD_GATEWAY, &e.to_string())
        }
        Err(e) => {
            error!(error = %e, "image generation failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

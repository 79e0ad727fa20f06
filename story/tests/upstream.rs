//! Provider clients against local stand-ins for the upstream APIs.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use story::server::{ChatProvider, ImageProvider, ProviderError};
use story_core::{ChatCompletionRequest, ChatMessage};

#[derive(Clone)]
struct Upstream {
    status: StatusCode,
    hits: Arc<AtomicUsize>,
}

async fn respond(State(upstream): State<Upstream>) -> Response {
    upstream.hits.fetch_add(1, Ordering::SeqCst);
    if upstream.status.is_success() {
        return (upstream.status, b"png".to_vec()).into_response();
    }
    (upstream.status, Json(json!({ "message": "upstream says no" }))).into_response()
}

/// Serve `status` for every request and count the hits.
async fn upstream(status: StatusCode) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Router::new().fallback(respond).with_state(Upstream {
        status,
        hits: hits.clone(),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}"), hits)
}

fn stability_client(base: &str) -> stability::Stability {
    stability::Stability::new("test-key")
        .unwrap()
        .with_base_url(base)
}

// ============================================================================
// Stability retry policy
// ============================================================================

#[tokio::test]
async fn test_stability_success_is_single_request() {
    let (base, hits) = upstream(StatusCode::OK).await;

    let bytes = stability_client(&base).generate("a lighthouse").await.unwrap();
    assert_eq!(bytes, b"png");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stability_server_error_retried_once() {
    let (base, hits) = upstream(StatusCode::SERVICE_UNAVAILABLE).await;

    let err = stability_client(&base).generate("a lighthouse").await.unwrap_err();
    assert!(matches!(err, ProviderError::Unavailable(_)), "got {err:?}");
    assert_eq!(hits.load(Ordering::SeqCst), 2, "Expected exactly one retry");
}

#[tokio::test]
async fn test_stability_rate_limit_not_retried() {
    let (base, hits) = upstream(StatusCode::TOO_MANY_REQUESTS).await;

    let err = stability_client(&base).generate("a lighthouse").await.unwrap_err();
    assert!(matches!(err, ProviderError::RateLimited(_)), "got {err:?}");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stability_client_error_not_retried() {
    let (base, hits) = upstream(StatusCode::BAD_REQUEST).await;

    let err = stability_client(&base).generate("a lighthouse").await.unwrap_err();
    assert!(matches!(err, ProviderError::Failed(_)), "got {err:?}");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Groq
// ============================================================================

async fn truncated_completion() -> Json<serde_json::Value> {
    Json(json!({
        "id": "chatcmpl-1",
        "model": "llama-3.1-8b-instant",
        "choices": [{
            "message": { "role": "assistant", "content": "  Había una vez un faro  " },
            "finish_reason": "length"
        }],
        "usage": { "prompt_tokens": 40, "completion_tokens": 12 }
    }))
}

#[tokio::test]
async fn test_groq_truncated_reply_still_returned() {
    let router = Router::new().fallback(truncated_completion);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let groq = groq::Groq::new("test-key")
        .unwrap()
        .with_base_url(format!("http://{addr}"));
    let request = ChatCompletionRequest::new(vec![ChatMessage::user("Cuéntame")])
        .with_max_tokens(12);

    let response = ChatProvider::complete(&groq, &request).await.unwrap();
    assert_eq!(response.reply, "Había una vez un faro");
    assert_eq!(response.usage.map(|u| u.total()), Some(52));
}

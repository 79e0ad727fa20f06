//! Router tests with scripted providers.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use story::server::handlers::{CHAT_COMPLETION_ERROR, IMAGE_RATE_LIMITED_ERROR};
use story::server::image_prompt::PENCIL_STYLE;
use story::server::{
    create_router, AppState, ChatProvider, ImageProvider, ProviderError, Translator,
};
use story_core::{
    BackendError, ChatCompletionRequest, ChatCompletionResponse, HttpBackend, MemoryStore,
    StoryBackend, StoryOrchestrator, StoryPhase, StoryPreferences, StorySession, Usage,
};
use tower::ServiceExt;

// ============================================================================
// Scripted providers
// ============================================================================

#[derive(Default)]
struct FakeChat {
    replies: Mutex<Vec<Result<String, ProviderError>>>,
    requests: Mutex<Vec<ChatCompletionRequest>>,
}

impl FakeChat {
    fn replying(replies: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChatProvider for FakeChat {
    async fn complete(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        let mut replies = self.replies.lock().unwrap();
        let reply = if replies.is_empty() {
            Ok("Fin.".to_string())
        } else {
            replies.remove(0)
        };
        reply.map(|reply| ChatCompletionResponse {
            reply,
            usage: Some(Usage {
                prompt_tokens: 150,
                completion_tokens: 100,
            }),
        })
    }
}

struct FakeImages {
    result: fn() -> Result<Vec<u8>, ProviderError>,
    prompts: Mutex<Vec<String>>,
}

impl FakeImages {
    fn new(result: fn() -> Result<Vec<u8>, ProviderError>) -> Self {
        Self {
            result,
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ImageProvider for FakeImages {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, ProviderError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        (self.result)()
    }
}

struct Upper;

#[async_trait]
impl Translator for Upper {
    async fn translate(&self, text: &str) -> Result<String, ProviderError> {
        Ok(text.to_uppercase())
    }
}

fn png() -> Result<Vec<u8>, ProviderError> {
    Ok(b"png".to_vec())
}

fn app(chat: Arc<FakeChat>, images: Arc<FakeImages>) -> Router {
    create_router(AppState::new(chat, images))
}

async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_and_ping() {
    let chat = Arc::new(FakeChat::default());
    let images = Arc::new(FakeImages::new(png));

    let (status, body) = send(app(chat.clone(), images.clone()), "GET", "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));

    let (status, body) = send(app(chat, images), "GET", "/api/ping", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "pong": true }));
}

// ============================================================================
// Chat completion
// ============================================================================

#[tokio::test]
async fn test_chat_completion_forwards_parameters() {
    let chat = Arc::new(FakeChat::replying(vec![Ok("Había una vez.".into())]));
    let images = Arc::new(FakeImages::new(png));

    let body = json!({
        "messages": [{ "role": "user", "content": "Hola" }],
        "temperature": 0.7,
        "max_tokens": 800
    });
    let (status, body) = send(app(chat.clone(), images), "POST", "/api/chat-completion", Some(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "Había una vez.");
    assert_eq!(body["usage"]["prompt_tokens"], 150);

    let requests = chat.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].temperature, 0.7);
    assert_eq!(requests[0].max_tokens, 800);
}

#[tokio::test]
async fn test_chat_completion_defaults_parameters() {
    let chat = Arc::new(FakeChat::default());
    let images = Arc::new(FakeImages::new(png));

    let body = json!({ "messages": [{ "role": "user", "content": "Hola" }] });
    let (status, _) = send(app(chat.clone(), images), "POST", "/api/chat-completion", Some(body)).await;

    assert_eq!(status, StatusCode::OK);
    let requests = chat.requests.lock().unwrap();
    assert_eq!(requests[0].temperature, 0.8);
    assert_eq!(requests[0].max_tokens, 512);
}

#[tokio::test]
async fn test_chat_completion_rejects_missing_or_empty_messages() {
    let chat = Arc::new(FakeChat::default());
    let images = Arc::new(FakeImages::new(png));

    for body in [
        json!({}),
        json!({ "messages": [] }),
        json!({ "messages": "Hola" }),
    ] {
        let (status, body) = send(
            app(chat.clone(), images.clone()),
            "POST",
            "/api/chat-completion",
            Some(body),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }
    assert!(chat.requests.lock().unwrap().is_empty(), "Provider should not be called");
}

#[tokio::test]
async fn test_chat_completion_failure_is_opaque() {
    let chat = Arc::new(FakeChat::replying(vec![Err(ProviderError::Failed(
        "secret upstream detail".into(),
    ))]));
    let images = Arc::new(FakeImages::new(png));

    let body = json!({ "messages": [{ "role": "user", "content": "Hola" }] });
    let (status, body) = send(app(chat, images), "POST", "/api/chat-completion", Some(body)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": CHAT_COMPLETION_ERROR }));
}

// ============================================================================
// Image generation
// ============================================================================

#[tokio::test]
async fn test_generate_image_returns_base64() {
    let chat = Arc::new(FakeChat::default());
    let images = Arc::new(FakeImages::new(png));

    let body = json!({ "prompt": "Line art.\n\n**¿Un dragón?**" });
    let (status, body) = send(app(chat, images.clone()), "POST", "/api/generate-image", Some(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["url"], "cG5n");
    assert_eq!(
        images.prompts.lock().unwrap().as_slice(),
        [format!("Un dragón?. {PENCIL_STYLE}")]
    );
}

#[tokio::test]
async fn test_generate_image_translates_prompt() {
    let chat = Arc::new(FakeChat::default());
    let images = Arc::new(FakeImages::new(png));
    let router = create_router(AppState::new(chat, images.clone()).with_translator(Arc::new(Upper)));

    let body = json!({ "prompt": "a wolf" });
    let (status, _) = send(router, "POST", "/api/generate-image", Some(body)).await;

    assert_eq!(status, StatusCode::OK);
    let prompts = images.prompts.lock().unwrap();
    assert!(prompts[0].starts_with("A WOLF. REALISTIC GRAPHITE PENCIL SKETCH"));
}

#[tokio::test]
async fn test_generate_image_error_mapping() {
    fn limited() -> Result<Vec<u8>, ProviderError> {
        Err(ProviderError::RateLimited("credits".into()))
    }
    fn unavailable() -> Result<Vec<u8>, ProviderError> {
        Err(ProviderError::Unavailable("503".into()))
    }
    fn failed() -> Result<Vec<u8>, ProviderError> {
        Err(ProviderError::Failed("bad prompt".into()))
    }

    let cases: [(fn() -> Result<Vec<u8>, ProviderError>, StatusCode); 3] = [
        (limited, StatusCode::TOO_MANY_REQUESTS),
        (unavailable, StatusCode::BAD_GATEWAY),
        (failed, StatusCode::INTERNAL_SERVER_ERROR),
    ];

    for (result, expected) in cases {
        let chat = Arc::new(FakeChat::default());
        let body = json!({ "prompt": "Un bosque" });
        let (status, body) = send(
            app(chat, Arc::new(FakeImages::new(result))),
            "POST",
            "/api/generate-image",
            Some(body),
        )
        .await;
        assert_eq!(status, expected);
        assert!(body["error"].is_string());
        if expected == StatusCode::TOO_MANY_REQUESTS {
            assert_eq!(body["error"], IMAGE_RATE_LIMITED_ERROR);
        }
    }
}

#[tokio::test]
async fn test_generate_image_rejects_blank_prompt() {
    let chat = Arc::new(FakeChat::default());
    let images = Arc::new(FakeImages::new(png));

    let (status, _) = send(
        app(chat, images.clone()),
        "POST",
        "/api/generate-image",
        Some(json!({ "prompt": "   " })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(images.prompts.lock().unwrap().is_empty());
}

// ============================================================================
// End to end over HTTP
// ============================================================================

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_story_session_over_http() {
    let chat = Arc::new(FakeChat::replying(vec![
        Ok("Lucía llega a un castillo.\n|OPCIONES|\n1. Entrar\n2. Esperar".into()),
        Ok("Lucía cruza el portón.\n|OPCIONES|\n1. Subir a la torre".into()),
        Ok("Lucía encuentra el tesoro.".into()),
    ]));
    let images = Arc::new(FakeImages::new(png));
    let base = serve(app(chat.clone(), images)).await;

    let backend = Arc::new(HttpBackend::new(&base).unwrap());
    let store = Arc::new(MemoryStore::new());
    StoryPreferences::personal()
        .with_illustrations(false)
        .save(store.as_ref())
        .unwrap();
    let orchestrator = StoryOrchestrator::new(backend, store);
    let mut session = StorySession::new(orchestrator, "Lucía");

    let opening = session.start().await.unwrap();
    assert_eq!(opening.choices.len(), 2);
    session.choose(0).await.unwrap();
    let ending = session.end().await.unwrap();
    assert!(ending.is_ending);
    assert_eq!(session.phase(), StoryPhase::Ended);

    let ledger = session.orchestrator().ledger();
    // Three scenes at 3 credits each, 250 tokens (3 units) per call.
    assert_eq!(ledger.balance(story_core::ActorClass::Guest).unwrap(), 91);
    assert_eq!(ledger.usage_balance().unwrap(), 2491);
    assert_eq!(chat.requests.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_http_backend_maps_image_rate_limit() {
    fn limited() -> Result<Vec<u8>, ProviderError> {
        Err(ProviderError::RateLimited("credits".into()))
    }
    let base = serve(app(
        Arc::new(FakeChat::default()),
        Arc::new(FakeImages::new(limited)),
    ))
    .await;

    let backend = HttpBackend::new(&base).unwrap();
    let err = backend.generate_image("Un bosque").await.unwrap_err();
    match err {
        BackendError::RateLimited(message) => assert_eq!(message, IMAGE_RATE_LIMITED_ERROR),
        other => panic!("Expected rate limit, got {other:?}"),
    }
}

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use promptly::provider::ProviderError;
use promptly::{Assistant, ResilienceError, ServiceError};
use promptly_server::{router, AppState, ChatStore, InMemoryChatStore};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

/// Echoes the query back, or fails when asked to.
#[derive(Default)]
struct Echo {
    calls: AtomicUsize,
}

#[async_trait]
impl Assistant for Echo {
    async fn reply(&self, query: &str) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if query == "fail" {
            return Err(ServiceError::Completion(ResilienceError::Inner(ProviderError::Authentication {
                status: 401,
                message: "invalid api key".into(),
            })));
        }
        Ok(format!("echo: {query}"))
    }
}

struct Harness {
    app: Router,
    store: Arc<InMemoryChatStore>,
    assistant: Arc<Echo>,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryChatStore::new());
    let assistant = Arc::new(Echo::default());
    let app = router(AppState::new(assistant.clone(), store.clone()));
    Harness { app, store, assistant }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
}

fn post_json(body: Value) -> Request<Body> {
    Request::post("/api/conversation")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn conversation_without_chat_creates_one() {
    let h = harness();
    let (status, body) = send(&h.app, post_json(json!({"message": "Hello"}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "echo: Hello", "chat_id": 1}));

    let chat = h.store.get_chat(1).await.unwrap();
    assert_eq!(chat.title, "New chat");
    let contents: Vec<_> = chat.entries.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(contents, vec!["Hello", "echo: Hello"]);
}

#[tokio::test]
async fn conversation_continues_existing_chat_by_string_id() {
    let h = harness();
    send(&h.app, post_json(json!({"message": "first"}))).await;
    let (status, body) = send(&h.app, post_json(json!({"message": "second", "chat_id": "1"}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chat_id"], 1);
    assert_eq!(h.store.get_chat(1).await.unwrap().entries.len(), 4);
    assert_eq!(h.store.list_chats().await.len(), 1);
}

#[tokio::test]
async fn unknown_or_unparsable_chat_id_starts_a_new_chat() {
    let h = harness();
    let (_, body) = send(&h.app, post_json(json!({"message": "a", "chat_id": 99}))).await;
    assert_eq!(body["chat_id"], 1);
    let (_, body) = send(&h.app, post_json(json!({"message": "b", "chat_id": "abc"}))).await;
    assert_eq!(body["chat_id"], 2);
}

#[tokio::test]
async fn assistant_failure_is_a_json_500() {
    let h = harness();
    let (status, body) = send(&h.app, post_json(json!({"message": "fail"}))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("invalid api key"));
    // the user's message is kept even though no answer was produced
    let chat = h.store.get_chat(1).await.unwrap();
    assert_eq!(chat.entries.len(), 1);
}

#[tokio::test]
async fn missing_message_is_rejected_before_the_assistant_runs() {
    let h = harness();
    let (status, body) = send(&h.app, post_json(json!({"chat_id": 1}))).await;

    assert!(status.is_client_error(), "got {}", status);
    assert!(body["error"].is_string());
    assert_eq!(h.assistant.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn chats_are_listed_newest_first_with_teasers() {
    let h = harness();
    send(&h.app, post_json(json!({"message": "older"}))).await;
    let long = "x".repeat(400);
    send(&h.app, post_json(json!({"message": long}))).await;

    let (status, body) = send(&h.app, get("/api/chats")).await;
    assert_eq!(status, StatusCode::OK);
    let chats = body.as_array().unwrap();
    assert_eq!(chats.len(), 2);
    assert_eq!(chats[0]["id"], 2);
    assert_eq!(chats[1]["id"], 1);
    assert_eq!(chats[1]["teaser"], "older");
    let teaser = chats[0]["teaser"].as_str().unwrap();
    assert_eq!(teaser.chars().count(), 150);
    assert!(teaser.ends_with("..."));
}

#[tokio::test]
async fn chat_detail_and_not_found() {
    let h = harness();
    send(&h.app, post_json(json!({"message": "Hello"}))).await;

    let (status, body) = send(&h.app, get("/api/chats/1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "New chat");
    assert_eq!(body["entries"][0]["role"], "user");
    assert_eq!(body["entries"][1]["role"], "assistant");

    let (status, body) = send(&h.app, get("/api/chats/7")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "chat 7 not found");

    let (status, body) = send(&h.app, get("/api/chats/seven")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

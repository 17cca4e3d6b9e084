//! JSON API handlers.

use crate::store::{Chat, ChatId, ChatStore, ChatSummary, EntryRole, StoreError};
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use promptly::{Assistant, ServiceError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub assistant: Arc<dyn Assistant>,
    pub store: Arc<dyn ChatStore>,
}

impl AppState {
    pub fn new(assistant: Arc<dyn Assistant>, store: Arc<dyn ChatStore>) -> Self {
        Self { assistant, store }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/conversation", post(conversation))
        .route("/api/chats", get(list_chats))
        .route("/api/chats/{id}", get(get_chat))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ConversationRequest {
    pub message: String,
    #[serde(default)]
    pub chat_id: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ConversationResponse {
    pub message: String,
    pub chat_id: ChatId,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String, StatusCode),
    #[error("chat {0} not found")]
    ChatNotFound(ChatId),
    #[error("assistant failed: {0}")]
    Assistant(#[from] ServiceError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_, status) => *status,
            ApiError::ChatNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Assistant(_) | ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text(), rejection.status())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text(), rejection.status())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// A chat id given as a JSON number or a numeric string; anything else means no chat.
pub fn parse_chat_id(raw: &Value) -> Option<ChatId> {
    match raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

async fn conversation(
    State(state): State<AppState>,
    payload: Result<Json<ConversationRequest>, JsonRejection>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let Json(request) = payload?;

    let existing = match request.chat_id.as_ref().and_then(parse_chat_id) {
        Some(id) => state.store.get_chat(id).await,
        None => None,
    };
    let chat = match existing {
        Some(chat) => chat,
        None => state.store.create_chat(None).await,
    };

    state.store.add_entry(chat.id, EntryRole::User, request.message.clone()).await?;
    let reply = state.assistant.reply(&request.message).await?;
    state.store.add_entry(chat.id, EntryRole::Assistant, reply.clone()).await?;

    Ok(Json(ConversationResponse { message: reply, chat_id: chat.id }))
}

async fn list_chats(State(state): State<AppState>) -> Json<Vec<ChatSummary>> {
    Json(state.store.list_chats().await)
}

async fn get_chat(
    State(state): State<AppState>,
    id: Result<Path<ChatId>, PathRejection>,
) -> Result<Json<Chat>, ApiError> {
    let Path(id) = id?;
    state.store.get_chat(id).await.map(Json).ok_or(ApiError::ChatNotFound(id))
}

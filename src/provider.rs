//! Chat-completion provider boundary.
//!
//! Wire types for the request/response JSON, the `CompletionProvider` trait implemented by
//! concrete backends, and `ProviderError`, which adapts backend failures into a
//! `RetryReason`.

pub mod openai;

use crate::classify::{Classify, RetryReason};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub use openai::OpenAiProvider;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a conversation, as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }
}

/// Body of a chat-completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

impl ChatRequest {
    /// Request with deterministic sampling: temperature 0, top_p 1, no penalties,
    /// up to 2048 completion tokens.
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: model.into(),
            temperature: 0.0,
            max_tokens: 2048,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }
    }
}

/// Message of a completion choice. `content` is null when the model produced none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
}

/// One alternative of a completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: ResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Typed view of a successful chat-completion payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Value>,
}

impl ChatCompletion {
    /// First choice, which is what a single-turn caller shows to the user.
    pub fn first_choice(&self) -> Option<&Choice> {
        self.choices.first()
    }
}

/// Failures of a single provider call, already sorted by whether they may be transient.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("provider timed out: {0}")]
    Timeout(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("provider error (HTTP {status}): {message}")]
    Server { status: u16, message: String },
    #[error("authentication failed (HTTP {status}): {message}")]
    Authentication { status: u16, message: String },
    #[error("invalid request (HTTP {status}): {message}")]
    InvalidRequest { status: u16, message: String },
    #[error("provider returned an error: {0}")]
    Embedded(Value),
    #[error("could not decode provider response: {0}")]
    Decode(String),
    /// The request could not be built or followed (bad base URL, redirect policy).
    #[error("request failed: {0}")]
    Request(String),
    #[error("request cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Map a non-success HTTP status to the matching failure.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            408 => ProviderError::Timeout(message),
            429 => ProviderError::RateLimited(message),
            503 => ProviderError::ServiceUnavailable(message),
            401 | 403 => ProviderError::Authentication { status, message },
            500..=599 => ProviderError::Server { status, message },
            _ => ProviderError::InvalidRequest { status, message },
        }
    }

    /// The provider error carried by a payload's top-level `error` key, if any.
    pub fn embedded_in(payload: &Value) -> Option<Self> {
        payload.get("error").map(|error| ProviderError::Embedded(error.clone()))
    }
}

impl Classify for ProviderError {
    fn retry_reason(&self) -> Option<RetryReason> {
        match self {
            ProviderError::Connection(_) => Some(RetryReason::Connection),
            ProviderError::Timeout(_) => Some(RetryReason::ProviderTimeout),
            ProviderError::ServiceUnavailable(_) => Some(RetryReason::ServiceUnavailable),
            ProviderError::RateLimited(_) => Some(RetryReason::RateLimited),
            ProviderError::Server { .. } => Some(RetryReason::ServerError),
            ProviderError::Embedded(_) => Some(RetryReason::EmbeddedError),
            ProviderError::Authentication { .. }
            | ProviderError::InvalidRequest { .. }
            | ProviderError::Decode(_)
            | ProviderError::Request(_)
            | ProviderError::Cancelled => None,
        }
    }
}

/// A backend able to answer one chat-completion request.
///
/// Implementations return the raw JSON payload untouched and should stop work once `cancel`
/// fires; the deadline policy cancels it when an attempt is abandoned.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn create(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<Value, ProviderError>;
}

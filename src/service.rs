//! Single-turn chat facade.

use crate::completion::CompletionClient;
use crate::provider::{ChatCompletion, ChatMessage, ChatRequest, CompletionProvider, ProviderError};
use crate::ResilienceError;
use async_trait::async_trait;

/// Failures of a single-turn chat request.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Completion(#[from] ResilienceError<ProviderError>),
    #[error("malformed completion response: {0}")]
    MalformedResponse(String),
    #[error("completion has no content")]
    EmptyContent,
}

/// Anything able to answer a free-text question with text.
#[async_trait]
pub trait Assistant: Send + Sync {
    async fn reply(&self, query: &str) -> Result<String, ServiceError>;
}

/// Answers one user query with the configured model through a resilient client.
#[derive(Debug)]
pub struct ChatService<P> {
    client: CompletionClient<P>,
    model: String,
}

impl<P> ChatService<P>
where
    P: CompletionProvider + 'static,
{
    /// Service answering with `model`.
    pub fn new(client: CompletionClient<P>, model: impl Into<String>) -> Self {
        Self { client, model: model.into() }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send `query` as the only user message and return the first choice's content.
    ///
    /// A null `content` is passed through as `None`.
    pub async fn get_response(&self, query: &str) -> Result<Option<String>, ServiceError> {
        let request = ChatRequest::new(self.model.clone(), vec![ChatMessage::user(query)]);
        let payload = self.client.complete(request).await?;

        let completion: ChatCompletion = serde_json::from_value(payload)
            .map_err(|e| ServiceError::MalformedResponse(e.to_string()))?;
        completion
            .first_choice()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| ServiceError::MalformedResponse("response has no choices".to_string()))
    }
}

#[async_trait]
impl<P> Assistant for ChatService<P>
where
    P: CompletionProvider + 'static,
{
    async fn reply(&self, query: &str) -> Result<String, ServiceError> {
        self.get_response(query).await?.ok_or(ServiceError::EmptyContent)
    }
}

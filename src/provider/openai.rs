//! OpenAI-compatible chat-completion backend over HTTP.

use super::{ChatRequest, CompletionProvider, ProviderError};
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Public OpenAI API.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Calls `POST {api_base}/chat/completions` with bearer authentication.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl OpenAiProvider {
    /// Provider for the public API. Requests go unauthenticated when `api_key` is `None`.
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), DEFAULT_API_BASE, api_key)
    }

    /// Use a preconfigured client and base URL (proxies, compatible gateways, tests).
    pub fn with_client(
        client: reqwest::Client,
        api_base: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        Self { client, api_base, api_key }
    }

    /// Point at another OpenAI-compatible base URL.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    async fn send(&self, request: &ChatRequest) -> Result<Value, ProviderError> {
        let mut builder = self.client.post(self.endpoint()).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(transport_error)?;

        if status.is_success() {
            return serde_json::from_slice(&body).map_err(|e| ProviderError::Decode(e.to_string()));
        }

        let message = serde_json::from_slice::<Value>(&body)
            .ok()
            .and_then(|payload| {
                payload.pointer("/error/message").and_then(Value::as_str).map(str::to_owned)
            })
            .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());
        Err(ProviderError::from_status(status.as_u16(), message))
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn create(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<Value, ProviderError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            outcome = self.send(request) => outcome,
        }
    }
}

/// Transport failures stay transient. Builder and redirect errors are fatal.
fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else if err.is_decode() {
        ProviderError::Decode(err.to_string())
    } else if err.is_connect() || err.is_body() || err.is_request() {
        ProviderError::Connection(err.to_string())
    } else {
        ProviderError::Request(err.to_string())
    }
}

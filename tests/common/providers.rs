//! Scripted completion provider for driving the resilience stack in tests.

use async_trait::async_trait;
use promptly::provider::{ChatRequest, CompletionProvider, ProviderError};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What one call to the provider does.
#[derive(Debug, Clone)]
pub enum Step {
    Fail(ProviderError),
    Respond(Value),
    /// Respond after sleeping, or give up early once the attempt is cancelled.
    Slow(Duration, Value),
}

#[derive(Debug, Default)]
struct State {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

/// Plays back `steps` in order and answers with a default completion once they run out.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProvider {
    state: Arc<State>,
}

impl ScriptedProvider {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        let provider = Self::default();
        provider.state.steps.lock().unwrap().extend(steps);
        provider
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn create(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<Value, ProviderError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        self.state.requests.lock().unwrap().push(request.clone());
        let step = self.state.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Respond(payload)) => Ok(payload),
            Some(Step::Slow(delay, payload)) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(ProviderError::Cancelled),
                    _ = tokio::time::sleep(delay) => Ok(payload),
                }
            }
            None => Ok(completion("default answer")),
        }
    }
}

/// A well-formed chat-completion payload with one choice.
pub fn completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
    })
}

pub fn unavailable() -> Step {
    Step::Fail(ProviderError::ServiceUnavailable("The server is overloaded".into()))
}

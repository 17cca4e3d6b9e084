//! Convenient re-exports for common promptly types.
pub use crate::{
    backoff::{Backoff, BackoffError, MAX_BACKOFF},
    classify::{Classify, EmbeddedErrorPolicy, RetryReason, RetrySet},
    completion::{ClientBuildError, CompletionClient, CompletionClientBuilder},
    config::{ConfigError, Settings},
    deadline::{DeadlineError, DeadlineLayer, DeadlinePolicy, DEFAULT_DEADLINE},
    jitter::Jitter,
    provider::{
        ChatCompletion, ChatMessage, ChatRequest, CompletionProvider, OpenAiProvider,
        ProviderError, ResponseMessage, Role,
    },
    retry::{BuildError, RetryLayer, RetryPolicy, RetryPolicyBuilder},
    service::{Assistant, ChatService, ServiceError},
    ResilienceError,
};

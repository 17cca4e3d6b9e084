//! Resilient chat completions.
//!
//! `CompletionClient` wraps a `CompletionProvider` in two independent layers:
//!
//! ```text
//! caller -> RetryPolicy (capped exponential backoff) -> DeadlinePolicy (re-issue on expiry) -> provider
//! ```
//!
//! Each attempt that returns a payload is inspected for a top-level `error` key; a hit is
//! logged and turned into `ProviderError::Embedded`. Whether that error is retried is decided
//! by the configured `EmbeddedErrorPolicy`. Deadline expiry never reaches the retry layer.

use crate::backoff::BackoffError;
use crate::classify::{EmbeddedErrorPolicy, RetrySet};
use crate::config::Settings;
use crate::deadline::{DeadlineError, DeadlinePolicy};
use crate::provider::{ChatRequest, CompletionProvider, ProviderError};
use crate::retry::BuildError;
use crate::{Backoff, Jitter, ResilienceError, RetryPolicy, Sleeper, TokioSleeper};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// First retry delay.
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Growth factor between consecutive retry delays.
pub const BACKOFF_FACTOR: f64 = 1.5;
/// Upper bound of a single retry delay.
pub const BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Errors produced while assembling a completion client.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientBuildError {
    #[error("invalid deadline: {0}")]
    Deadline(#[from] DeadlineError),
    #[error("invalid retry policy: {0}")]
    Retry(#[from] BuildError),
    #[error("invalid backoff: {0}")]
    Backoff(#[from] BackoffError),
}

/// Capped 1s * 1.5^n schedule used between completion attempts.
pub fn provider_backoff() -> Result<Backoff, BackoffError> {
    Backoff::exponential(BACKOFF_BASE).with_factor(BACKOFF_FACTOR)?.with_max(BACKOFF_MAX)
}

/// Resilient chat-completion client.
///
/// Every call runs through the retry policy, and each retry attempt through the deadline
/// policy. Cloning is not supported; share it behind an `Arc`.
pub struct CompletionClient<P> {
    provider: Arc<P>,
    deadline: DeadlinePolicy,
    retry: RetryPolicy<ProviderError>,
    embedded_errors: EmbeddedErrorPolicy,
}

impl<P> std::fmt::Debug for CompletionClient<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionClient")
            .field("deadline", &self.deadline)
            .field("retry", &self.retry)
            .field("embedded_errors", &self.embedded_errors)
            .finish()
    }
}

impl<P> CompletionClient<P>
where
    P: CompletionProvider + 'static,
{
    /// Start configuring a client around `provider`.
    pub fn builder(provider: P) -> CompletionClientBuilder<P> {
        CompletionClientBuilder::new(provider)
    }

    /// Client configured from process settings; `shutdown` aborts pending retries.
    pub fn from_settings(
        provider: P,
        settings: &Settings,
        shutdown: CancellationToken,
    ) -> Result<Self, ClientBuildError> {
        let mut builder = Self::builder(provider)
            .deadline(settings.deadline)
            .embedded_errors(settings.embedded_errors)
            .with_cancellation(shutdown);
        if let Some(attempts) = settings.deadline_attempts {
            builder = builder.deadline_attempts(attempts);
        }
        if let Some(attempts) = settings.max_attempts {
            builder = builder.max_attempts(attempts);
        }
        if let Some(budget) = settings.max_elapsed {
            builder = builder.max_elapsed(budget);
        }
        builder.build()
    }

    /// How payloads with a top-level `error` key are treated.
    pub fn embedded_errors(&self) -> EmbeddedErrorPolicy {
        self.embedded_errors
    }

    /// Issue one logical chat-completion call and return the raw provider payload.
    pub async fn complete(&self, request: ChatRequest) -> Result<Value, ResilienceError<ProviderError>> {
        let request = Arc::new(request);
        self.retry
            .execute(|| {
                let provider = self.provider.clone();
                let request = request.clone();
                let deadline = self.deadline;
                async move {
                    let payload = deadline
                        .execute(move |cancel| {
                            let provider = provider.clone();
                            let request = request.clone();
                            async move {
                                provider.create(&request, cancel).await.map_err(ResilienceError::Inner)
                            }
                        })
                        .await?;
                    inspect(payload)
                }
            })
            .await
    }
}

fn inspect(payload: Value) -> Result<Value, ResilienceError<ProviderError>> {
    match ProviderError::embedded_in(&payload) {
        Some(err) => {
            tracing::warn!(payload = %payload, "provider response carries an error");
            Err(ResilienceError::Inner(err))
        }
        None => {
            tracing::debug!(payload = %payload, "provider response");
            Ok(payload)
        }
    }
}

/// Builder for [`CompletionClient`]. Validation happens in [`build`](Self::build).
pub struct CompletionClientBuilder<P> {
    provider: P,
    deadline: Duration,
    deadline_attempts: Option<usize>,
    max_attempts: Option<usize>,
    max_elapsed: Option<Duration>,
    backoff: Option<Backoff>,
    jitter: Jitter,
    retry_set: RetrySet,
    embedded_errors: EmbeddedErrorPolicy,
    sleeper: Arc<dyn Sleeper>,
    cancellation: Option<CancellationToken>,
}

impl<P> CompletionClientBuilder<P>
where
    P: CompletionProvider + 'static,
{
    /// Defaults: 60s deadline re-issued without limit, unbounded retries on transient
    /// failures with the capped 1.5x schedule, embedded errors fatal.
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            deadline: crate::deadline::DEFAULT_DEADLINE,
            deadline_attempts: None,
            max_attempts: None,
            max_elapsed: None,
            backoff: None,
            jitter: Jitter::None,
            retry_set: RetrySet::transient(),
            embedded_errors: EmbeddedErrorPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            cancellation: None,
        }
    }

    /// Per-attempt deadline. Must be non-zero.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Stop re-issuing after `attempts` expired attempts and fail with `Timeout`.
    pub fn deadline_attempts(mut self, attempts: usize) -> Self {
        self.deadline_attempts = Some(attempts);
        self
    }

    /// Cap on provider calls made by the retry layer.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Wall-clock budget for the whole retry loop.
    pub fn max_elapsed(mut self, budget: Duration) -> Self {
        self.max_elapsed = Some(budget);
        self
    }

    /// Replace the capped 1.5x schedule.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Jitter applied to each backoff delay. Defaults to none.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replace the set of transient reasons. Embedded errors follow `embedded_errors`.
    pub fn retry_on(mut self, set: RetrySet) -> Self {
        self.retry_set = set;
        self
    }

    /// Retry or raise on payloads carrying an `error` key.
    pub fn embedded_errors(mut self, policy: EmbeddedErrorPolicy) -> Self {
        self.embedded_errors = policy;
        self
    }

    /// Custom sleeper for backoff delays (tests use `TrackingSleeper`).
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Abort the retry loop with `Cancelled` once `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Validate the configuration and assemble the client.
    pub fn build(self) -> Result<CompletionClient<P>, ClientBuildError> {
        let mut deadline = DeadlinePolicy::new(self.deadline)?;
        if let Some(attempts) = self.deadline_attempts {
            deadline = deadline.with_max_attempts(attempts)?;
        }

        let backoff = match self.backoff {
            Some(backoff) => backoff,
            None => provider_backoff()?,
        };
        let mut retry = RetryPolicy::<ProviderError>::builder()
            .backoff(backoff)
            .with_jitter(self.jitter)
            .with_shared_sleeper(self.sleeper)
            .retry_on(self.embedded_errors.apply(self.retry_set));
        if let Some(attempts) = self.max_attempts {
            retry = retry.max_attempts(attempts);
        }
        if let Some(budget) = self.max_elapsed {
            retry = retry.max_elapsed(budget);
        }
        if let Some(token) = self.cancellation {
            retry = retry.with_cancellation(token);
        }
        Ok(CompletionClient {
            provider: Arc::new(self.provider),
            deadline,
            retry: retry.build()?,
            embedded_errors: self.embedded_errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_backoff_is_the_capped_one_and_a_half_schedule() {
        let backoff = provider_backoff().unwrap();
        assert_eq!(backoff.delay(1), BACKOFF_BASE);
        assert_eq!(backoff.delay(2), Duration::from_millis(1500));
        assert_eq!(backoff.delay(12), BACKOFF_MAX);
        assert_eq!(backoff.delay(500), BACKOFF_MAX);
    }

    #[test]
    fn explicit_backoff_overrides_the_provider_schedule() {
        struct Never;

        #[async_trait::async_trait]
        impl CompletionProvider for Never {
            async fn create(
                &self,
                _request: &ChatRequest,
                _cancel: CancellationToken,
            ) -> Result<Value, ProviderError> {
                Err(ProviderError::Cancelled)
            }
        }

        let builder = CompletionClient::builder(Never);
        assert!(builder.backoff.is_none());
        let builder = builder.backoff(Backoff::constant(Duration::from_millis(5)));
        assert_eq!(builder.backoff.as_ref().map(|b| b.delay(3)), Some(Duration::from_millis(5)));
        assert!(builder.build().is_ok());
    }
}

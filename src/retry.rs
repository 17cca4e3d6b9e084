//! Retry policy implementation
//!
//! Retry policy for fallible async operations.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries). Unbounded unless set.
//! - `max_elapsed` bounds the total time spent; a retry whose delay would overrun it is not
//!   attempted.
//! - Only `ResilienceError::Inner(E)` values are eligible for retry; other variants return
//!   immediately.
//! - `should_retry` predicate (or `retry_on` for classified errors) decides whether an
//!   `Inner` error is retryable.
//! - Backoff calculates delay per retry attempt; jitter optionally randomizes it.
//! - Sleeper controls how delays are applied (production uses `TokioSleeper`; tests can inject
//!   `InstantSleeper`/`TrackingSleeper`).
//! - A cancellation token aborts the loop with `ResilienceError::Cancelled`, whether an
//!   attempt is running or the policy is sleeping.
//!
//! Invariants:
//! - Attempts are sequential and never exceed `max_attempts`.
//! - Non-`Inner` errors are propagated without retry.
//! - Retry state (attempt count, elapsed time) lives in one `execute` call and is never
//!   shared between calls.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use promptly::{Backoff, RetryPolicy, ResilienceError};
//!
//! #[derive(Debug)]
//! struct MyErr;
//! impl std::fmt::Display for MyErr { fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "oops") } }
//! impl std::error::Error for MyErr {}
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::<MyErr>::builder()
//!     .max_attempts(3) // total attempts
//!     .backoff(Backoff::exponential(Duration::from_millis(10)))
//!     .should_retry(|_e| true)
//!     .build()
//!     .unwrap();
//! let result: Result<(), ResilienceError<MyErr>> =
//!     policy.execute(|| async { Err(ResilienceError::Inner(MyErr)) }).await;
//! assert!(result.unwrap_err().is_retry_exhausted());
//! # });
//! ```

use crate::classify::{Classify, RetrySet};
use crate::error::MAX_RETRY_FAILURES;
use crate::{Backoff, Jitter, ResilienceError, Sleeper, TokioSleeper};
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_layer::Layer;
use tower_service::Service;

/// Retry policy combining backoff, jitter, predicate, limits and sleeper.
pub struct RetryPolicy<E> {
    max_attempts: Option<usize>,
    max_elapsed: Option<Duration>,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
    cancellation: Option<CancellationToken>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            max_elapsed: self.max_elapsed,
            backoff: self.backoff.clone(),
            jitter: self.jitter,
            should_retry: self.should_retry.clone(),
            sleeper: self.sleeper.clone(),
            cancellation: self.cancellation.clone(),
        }
    }
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("max_elapsed", &self.max_elapsed)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("sleeper", &"<sleeper>")
            .field("should_retry", &"<predicate>")
            .field("cancellable", &self.cancellation.is_some())
            .finish()
    }
}

/// Outcome of waiting on something while honoring the policy's cancellation token.
enum Raced<T> {
    Done(T),
    Cancelled,
}

impl<E> RetryPolicy<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Construct a new builder with defaults.
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    /// Convert into a tower layer.
    pub fn into_layer(self) -> RetryLayer<E> {
        RetryLayer { policy: self }
    }

    /// Execute an async operation with retry semantics.
    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let started = Instant::now();
        let mut failures: VecDeque<E> = VecDeque::new();
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            let outcome = match self.race(operation()).await {
                Raced::Done(outcome) => outcome,
                Raced::Cancelled => return Err(ResilienceError::Cancelled),
            };

            let e = match outcome {
                Ok(value) => return Ok(value),
                Err(ResilienceError::Inner(e)) => e,
                // Non-Inner errors (Timeout, RetryExhausted, Cancelled) are not retried
                Err(other) => return Err(other),
            };

            if !(self.should_retry)(&e) {
                return Err(ResilienceError::Inner(e));
            }

            // Calculate backoff delay for this retry (1-indexed: first retry uses delay(1))
            let delay = self.jitter.apply(self.backoff.delay(attempt));
            let out_of_attempts = self.max_attempts.is_some_and(|max| attempt >= max);
            let out_of_time = self.max_elapsed.is_some_and(|max| started.elapsed() + delay > max);

            tracing::debug!(attempt, ?delay, error = %e, "transient failure");
            failures.push_back(e);
            while failures.len() > MAX_RETRY_FAILURES {
                failures.pop_front();
            }

            if out_of_attempts || out_of_time {
                return Err(ResilienceError::retry_exhausted(attempt, failures.into_iter().collect()));
            }

            if let Raced::Cancelled = self.race(self.sleeper.sleep(delay)).await {
                return Err(ResilienceError::Cancelled);
            }
        }
    }

    async fn race<F: Future>(&self, fut: F) -> Raced<F::Output> {
        match &self.cancellation {
            None => Raced::Done(fut.await),
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Raced::Cancelled,
                output = fut => Raced::Done(output),
            },
        }
    }
}

/// Builder for `RetryPolicy`.
pub struct RetryPolicyBuilder<E> {
    max_attempts: Option<usize>,
    max_elapsed: Option<Duration>,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
    cancellation: Option<CancellationToken>,
}

/// Errors produced while building a retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// `max_attempts` must be > 0.
    InvalidMaxAttempts(usize),
    /// `max_elapsed` must be > 0.
    InvalidMaxElapsed(Duration),
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::InvalidMaxAttempts(n) => {
                write!(f, "max_attempts must be > 0 (got {})", n)
            }
            BuildError::InvalidMaxElapsed(d) => {
                write!(f, "max_elapsed must be > 0 (got {:?})", d)
            }
        }
    }
}

impl std::error::Error for BuildError {}

impl<E> RetryPolicyBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Create a builder: unbounded attempts, exponential backoff from 1s, no jitter,
    /// every `Inner` error retried.
    pub fn new() -> Self {
        Self {
            max_attempts: None,
            max_elapsed: None,
            backoff: Backoff::exponential(Duration::from_secs(1)),
            jitter: Jitter::None,
            should_retry: Arc::new(|_| true),
            sleeper: Arc::new(TokioSleeper),
            cancellation: None,
        }
    }

    /// Set total attempts (initial + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Keep retrying until success or a non-retryable error.
    pub fn unbounded(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Stop retrying once the next delay would exceed this total budget. Must be > 0.
    pub fn max_elapsed(mut self, budget: Duration) -> Self {
        self.max_elapsed = Some(budget);
        self
    }

    /// Set backoff strategy.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set jitter strategy.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Predicate to decide if an `Inner` error is retryable.
    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    /// Retry exactly the classified errors whose reason is in `set`.
    pub fn retry_on(self, set: RetrySet) -> Self
    where
        E: Classify,
    {
        self.should_retry(move |e: &E| set.matches(e))
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Same as `with_sleeper` for a sleeper that is already shared.
    pub fn with_shared_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Abort the retry loop with `ResilienceError::Cancelled` once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Build the retry policy, validating inputs.
    pub fn build(self) -> Result<RetryPolicy<E>, BuildError> {
        if self.max_attempts == Some(0) {
            return Err(BuildError::InvalidMaxAttempts(0));
        }
        if let Some(budget) = self.max_elapsed.filter(|d| d.is_zero()) {
            return Err(BuildError::InvalidMaxElapsed(budget));
        }
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            max_elapsed: self.max_elapsed,
            backoff: self.backoff,
            jitter: self.jitter,
            should_retry: self.should_retry,
            sleeper: self.sleeper,
            cancellation: self.cancellation,
        })
    }
}

impl<E> Default for RetryPolicyBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Tower-native retry layer.
#[derive(Debug)]
pub struct RetryLayer<E> {
    policy: RetryPolicy<E>,
}

impl<E> Clone for RetryLayer<E> {
    fn clone(&self) -> Self {
        Self { policy: self.policy.clone() }
    }
}

impl<E> RetryLayer<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Wrap services with `policy`.
    pub fn new(policy: RetryPolicy<E>) -> Self {
        Self { policy }
    }
}

impl<S, E> Layer<S> for RetryLayer<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    type Service = RetryService<S, E>;
    fn layer(&self, service: S) -> Self::Service {
        RetryService { inner: service, policy: self.policy.clone() }
    }
}

/// Retry service produced by `RetryLayer`.
///
/// The inner error converts into `ResilienceError<E>`: plain `E` errors become `Inner` and
/// are candidates for retry, while an inner `DeadlineService` passes its own
/// `ResilienceError` through.
#[derive(Debug)]
pub struct RetryService<S, E> {
    inner: S,
    policy: RetryPolicy<E>,
}

impl<S: Clone, E> Clone for RetryService<S, E> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), policy: self.policy.clone() }
    }
}

impl<S, E, Request> Service<Request> for RetryService<S, E>
where
    Request: Clone + Send + 'static,
    S: Service<Request> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Error: Into<ResilienceError<E>> + Send + 'static,
    S::Future: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    type Response = S::Response;
    type Error = ResilienceError<E>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        // readiness is awaited per attempt on the clone that serves it
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let policy = self.policy.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            policy
                .execute(move || {
                    let svc = inner.clone();
                    let req = req.clone();
                    async move { tower::ServiceExt::oneshot(svc, req).await.map_err(Into::into) }
                })
                .await
        })
    }
}

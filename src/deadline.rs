//! Deadline-bounded execution.
//!
//! `DeadlinePolicy` runs each attempt of an operation on its own single-use worker (a tokio
//! task, or a blocking-pool thread for synchronous work) and waits at most `deadline` for it.
//! When the deadline passes, the attempt is abandoned and the same operation is started
//! again from scratch.
//!
//! Semantics:
//! - A completed attempt's result, success or error, is returned unchanged. Errors are never
//!   retried here; that is the retry policy's job.
//! - An abandoned attempt logs one warning, has its `CancellationToken` cancelled and its
//!   task aborted. Async work stops at its next await point. Blocking work cannot be aborted
//!   and keeps running unless it checks the token.
//! - Attempts are strictly sequential: the next attempt is spawned only after the previous
//!   one was abandoned.
//! - Unbounded by default. `with_max_attempts` caps the number of attempts, after which
//!   `ResilienceError::Timeout` is returned.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use promptly::{DeadlinePolicy, ResilienceError};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = DeadlinePolicy::new(Duration::from_secs(5)).unwrap();
//! let value = policy
//!     .execute(|_cancel| async { Ok::<_, ResilienceError<std::io::Error>>("done") })
//!     .await
//!     .unwrap();
//! assert_eq!(value, "done");
//! # });
//! ```

use crate::ResilienceError;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_layer::Layer;
use tower_service::Service;

/// Deadline used when no explicit value is configured.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(60);

/// Errors produced while configuring a deadline policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadlineError {
    /// The deadline must be non-zero and finite.
    InvalidDeadline(Duration),
    /// `max_attempts` must be > 0.
    InvalidMaxAttempts(usize),
}

impl fmt::Display for DeadlineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadlineError::InvalidDeadline(d) => {
                write!(f, "deadline must be non-zero and finite (got {:?})", d)
            }
            DeadlineError::InvalidMaxAttempts(n) => {
                write!(f, "max_attempts must be > 0 (got {})", n)
            }
        }
    }
}

impl std::error::Error for DeadlineError {}

/// Per-attempt deadline with optional attempt cap.
///
/// `Copy`, so one policy can be moved into every request future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlinePolicy {
    deadline: Duration,
    max_attempts: Option<usize>,
}

impl Default for DeadlinePolicy {
    fn default() -> Self {
        Self { deadline: DEFAULT_DEADLINE, max_attempts: None }
    }
}

impl DeadlinePolicy {
    /// Create an unbounded deadline policy. Rejects zero and `Duration::MAX`.
    pub fn new(deadline: Duration) -> Result<Self, DeadlineError> {
        if deadline.is_zero() || deadline == Duration::MAX {
            return Err(DeadlineError::InvalidDeadline(deadline));
        }
        Ok(Self { deadline, max_attempts: None })
    }

    /// Give up with `ResilienceError::Timeout` after `attempts` abandoned attempts.
    pub fn with_max_attempts(mut self, attempts: usize) -> Result<Self, DeadlineError> {
        if attempts == 0 {
            return Err(DeadlineError::InvalidMaxAttempts(0));
        }
        self.max_attempts = Some(attempts);
        Ok(self)
    }

    /// Inspect the configured per-attempt deadline.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Inspect the attempt cap, `None` when unbounded.
    pub fn max_attempts(&self) -> Option<usize> {
        self.max_attempts
    }

    /// Run an async operation, re-spawning it whenever an attempt outlives the deadline.
    ///
    /// The operation receives a fresh `CancellationToken` per attempt; the token is cancelled
    /// when that attempt is abandoned.
    pub async fn execute<T, E, Fut, Op>(&self, mut operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send + 'static,
        E: Send + Sync + 'static,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send + 'static,
        Op: FnMut(CancellationToken) -> Fut + Send,
    {
        self.run_attempts(|cancel| tokio::spawn(operation(cancel))).await
    }

    /// Run a blocking operation on the blocking pool with the same deadline semantics.
    ///
    /// Abandoned attempts cannot be forcibly stopped: they are expected to poll the token
    /// they were given and return early once it is cancelled.
    pub async fn execute_blocking<T, E, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send + 'static,
        E: Send + Sync + 'static,
        Op: Fn(&CancellationToken) -> Result<T, E> + Send + Sync + 'static,
    {
        let operation = Arc::new(operation);
        self.run_attempts(|cancel| {
            let operation = operation.clone();
            tokio::task::spawn_blocking(move || (*operation)(&cancel).map_err(ResilienceError::Inner))
        })
        .await
    }

    async fn run_attempts<T, E, Spawn>(&self, mut spawn: Spawn) -> Result<T, ResilienceError<E>>
    where
        Spawn: FnMut(CancellationToken) -> JoinHandle<Result<T, ResilienceError<E>>> + Send,
    {
        let start = Instant::now();
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            let cancel = CancellationToken::new();
            let mut worker = Worker { handle: spawn(cancel.clone()), cancel };

            match tokio::time::timeout(self.deadline, &mut worker.handle).await {
                Ok(joined) => return settle(joined),
                Err(_) => {
                    drop(worker);
                    tracing::warn!(
                        attempt,
                        deadline = ?self.deadline,
                        "operation exceeded the given deadline"
                    );
                    if self.max_attempts.is_some_and(|max| attempt >= max) {
                        return Err(ResilienceError::Timeout {
                            elapsed: start.elapsed(),
                            timeout: self.deadline,
                        });
                    }
                }
            }
        }
    }
}

/// A spawned attempt. Dropping it, on expiry or because the caller went away, cancels the
/// attempt's token and aborts the task.
struct Worker<T> {
    handle: JoinHandle<T>,
    cancel: CancellationToken,
}

impl<T> Drop for Worker<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

fn settle<T, E>(
    joined: Result<Result<T, ResilienceError<E>>, JoinError>,
) -> Result<T, ResilienceError<E>> {
    match joined {
        Ok(outcome) => outcome,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        // the worker was cancelled by the runtime shutting down
        Err(_) => Err(ResilienceError::Cancelled),
    }
}

/// Tower layer applying a `DeadlinePolicy` to every request.
#[derive(Debug, Clone, Copy)]
pub struct DeadlineLayer {
    policy: DeadlinePolicy,
}

impl DeadlineLayer {
    /// Wrap services with `policy`.
    pub fn new(policy: DeadlinePolicy) -> Self {
        Self { policy }
    }
}

impl<S> Layer<S> for DeadlineLayer {
    type Service = DeadlineService<S>;
    fn layer(&self, service: S) -> Self::Service {
        DeadlineService { inner: service, policy: self.policy }
    }
}

/// Service produced by `DeadlineLayer`. Each attempt drives a clone of the inner service.
#[derive(Debug, Clone)]
pub struct DeadlineService<S> {
    inner: S,
    policy: DeadlinePolicy,
}

impl<S, Request> Service<Request> for DeadlineService<S>
where
    Request: Clone + Send + 'static,
    S: Service<Request> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + Sync + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = ResilienceError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        // readiness is awaited per attempt on the clone that serves it
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let policy = self.policy;
        let inner = self.inner.clone();
        Box::pin(async move {
            policy
                .execute(move |_cancel| {
                    let svc = inner.clone();
                    let req = req.clone();
                    async move {
                        tower::ServiceExt::oneshot(svc, req).await.map_err(ResilienceError::Inner)
                    }
                })
                .await
        })
    }
}

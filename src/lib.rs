#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # promptly
//!
//! Resilient chat completions: every call to a language-model provider is wrapped in a
//! deadline-bounded executor and a capped exponential backoff.
//!
//! ## Features
//!
//! - **Deadline policy**: each attempt runs on its own task and is abandoned and re-issued
//!   when it outlives its deadline
//! - **Retry policy** with constant or exponential backoff, optional jitter and explicit
//!   attempt and elapsed-time caps
//! - **Classification** of provider failures into a closed set of retry reasons
//! - **Tower layers** for both policies
//! - **OpenAI-compatible provider** over `reqwest`, and a single-turn chat facade
//!
//! ## Quick Start
//!
//! ```rust
//! use promptly::{Backoff, DeadlinePolicy, ResilienceError, RetryPolicy};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let deadline = DeadlinePolicy::new(Duration::from_secs(5)).unwrap();
//!     let retry = RetryPolicy::<std::io::Error>::builder()
//!         .max_attempts(3)
//!         .backoff(Backoff::exponential(Duration::from_millis(10)))
//!         .build()
//!         .unwrap();
//!
//!     let result = retry
//!         .execute(|| deadline.execute(|_cancel| async {
//!             // Your async operation here
//!             Ok::<_, ResilienceError<std::io::Error>>(())
//!         }))
//!         .await;
//!     assert!(result.is_ok());
//! }
//! ```

pub mod backoff;
pub mod classify;
pub mod completion;
pub mod config;
pub mod deadline;
pub mod error;
pub mod jitter;
pub mod prelude;
pub mod provider;
pub mod retry;
pub mod service;
pub mod sleeper;

// Re-exports
pub use backoff::Backoff;
pub use classify::{Classify, EmbeddedErrorPolicy, RetryReason, RetrySet};
pub use completion::{CompletionClient, CompletionClientBuilder};
pub use config::Settings;
pub use deadline::{DeadlineLayer, DeadlinePolicy};
pub use error::ResilienceError;
pub use jitter::Jitter;
pub use provider::{ChatMessage, ChatRequest, CompletionProvider, OpenAiProvider, ProviderError};
pub use retry::{RetryLayer, RetryPolicy, RetryPolicyBuilder};
pub use service::{Assistant, ChatService, ServiceError};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};

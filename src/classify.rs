//! Retry classification independent of any provider's concrete error types.
//!
//! Provider adapters translate their failures into a `RetryReason`; retry policies decide
//! with a `RetrySet` which reasons are worth another attempt.

use std::fmt;

/// Why a failure might resolve itself without caller intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryReason {
    /// The connection to the provider could not be established or was dropped.
    Connection,
    /// The provider itself reported a request timeout.
    ProviderTimeout,
    /// The provider reported an internal error (5xx other than 503).
    ServerError,
    /// The provider reported it is temporarily unavailable (503).
    ServiceUnavailable,
    /// The provider rejected the request because of rate limiting (429).
    RateLimited,
    /// The provider answered successfully but the payload carries an `error` field.
    EmbeddedError,
}

impl RetryReason {
    const ALL: [RetryReason; 6] = [
        RetryReason::Connection,
        RetryReason::ProviderTimeout,
        RetryReason::ServerError,
        RetryReason::ServiceUnavailable,
        RetryReason::RateLimited,
        RetryReason::EmbeddedError,
    ];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RetryReason::Connection => "connection",
            RetryReason::ProviderTimeout => "provider timeout",
            RetryReason::ServerError => "server error",
            RetryReason::ServiceUnavailable => "service unavailable",
            RetryReason::RateLimited => "rate limited",
            RetryReason::EmbeddedError => "embedded error",
        };
        f.write_str(name)
    }
}

/// Implemented by errors that can tell whether they are transient.
pub trait Classify {
    /// `Some(reason)` for potentially transient failures, `None` for fatal ones.
    fn retry_reason(&self) -> Option<RetryReason>;
}

/// A set of retry reasons that a policy treats as retryable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RetrySet {
    bits: u8,
}

impl RetrySet {
    /// No reason is retryable.
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    /// Connection failures, provider timeouts, server errors, unavailability and rate
    /// limiting. Embedded errors are not included.
    pub fn transient() -> Self {
        Self::empty()
            .with(RetryReason::Connection)
            .with(RetryReason::ProviderTimeout)
            .with(RetryReason::ServerError)
            .with(RetryReason::ServiceUnavailable)
            .with(RetryReason::RateLimited)
    }

    pub fn with(mut self, reason: RetryReason) -> Self {
        self.bits |= reason.bit();
        self
    }

    pub fn without(mut self, reason: RetryReason) -> Self {
        self.bits &= !reason.bit();
        self
    }

    pub fn contains(&self, reason: RetryReason) -> bool {
        self.bits & reason.bit() != 0
    }

    /// Whether `error` classifies into a member of this set.
    pub fn matches<E: Classify + ?Sized>(&self, error: &E) -> bool {
        error.retry_reason().is_some_and(|reason| self.contains(reason))
    }

    pub fn iter(&self) -> impl Iterator<Item = RetryReason> + '_ {
        RetryReason::ALL.into_iter().filter(move |reason| self.contains(*reason))
    }
}

impl fmt::Debug for RetrySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<RetryReason> for RetrySet {
    fn from_iter<I: IntoIterator<Item = RetryReason>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), RetrySet::with)
    }
}

/// What to do with a successful response whose payload carries an `error` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddedErrorPolicy {
    /// Surface the provider error to the caller immediately.
    #[default]
    Fatal,
    /// Treat it like any other transient failure and back off.
    Retry,
}

impl EmbeddedErrorPolicy {
    /// Apply the policy to a retry set.
    pub fn apply(self, set: RetrySet) -> RetrySet {
        match self {
            EmbeddedErrorPolicy::Fatal => set.without(RetryReason::EmbeddedError),
            EmbeddedErrorPolicy::Retry => set.with(RetryReason::EmbeddedError),
        }
    }
}

//! Backoff strategies for retry policies.
//!
//! Provides constant and exponential strategies. The exponential strategy grows by a
//! configurable factor (2.0 unless told otherwise) and can be capped. Attempt semantics:
//! attempt index `0` represents the initial call (no delay), and retries start at
//! `attempt = 1`.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use promptly::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_secs(1))
//!     .with_factor(1.5)
//!     .unwrap()
//!     .with_max(Duration::from_secs(60))
//!     .unwrap();
//! assert_eq!(backoff.delay(0), Duration::ZERO); // initial call
//! assert_eq!(backoff.delay(1), Duration::from_secs(1));
//! assert_eq!(backoff.delay(2), Duration::from_millis(1500));
//! assert_eq!(backoff.delay(30), Duration::from_secs(60)); // capped
//! ```
//!
//! Overflow behavior: computations that would overflow saturate to `MAX_BACKOFF` (1 day).

use std::fmt;
use std::time::Duration;

/// Maximum delay used when calculations overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffError {
    ConstantDoesNotSupportMax,
    ConstantDoesNotSupportFactor,
    MaxMustBePositive,
    MaxLessThanBase { base: Duration, max: Duration },
    InvalidFactor(f64),
}

impl fmt::Display for BackoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffError::ConstantDoesNotSupportMax => {
                write!(f, "with_max is only valid for exponential backoff")
            }
            BackoffError::ConstantDoesNotSupportFactor => {
                write!(f, "with_factor is only valid for exponential backoff")
            }
            BackoffError::MaxMustBePositive => write!(f, "max must be greater than zero"),
            BackoffError::MaxLessThanBase { base, max } => {
                write!(f, "max ({:?}) must be >= base ({:?})", max, base)
            }
            BackoffError::InvalidFactor(factor) => {
                write!(f, "factor must be finite and >= 1.0 (got {})", factor)
            }
        }
    }
}

impl std::error::Error for BackoffError {}

#[derive(Debug, Clone, PartialEq)]
enum BackoffKind {
    Constant { delay: Duration },
    Exponential { base: Duration, factor: f64, max: Option<Duration> },
}

/// Delay schedule consulted by the retry policy between attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    kind: BackoffKind,
}

impl Backoff {
    /// Create a constant backoff strategy
    pub fn constant(delay: Duration) -> Self {
        Self { kind: BackoffKind::Constant { delay } }
    }

    /// Create an exponential backoff strategy that doubles each retry
    pub fn exponential(base: Duration) -> Self {
        Self { kind: BackoffKind::Exponential { base, factor: 2.0, max: None } }
    }

    /// Set the growth factor of an exponential backoff. Must be finite and `>= 1.0`.
    pub fn with_factor(mut self, factor: f64) -> Result<Self, BackoffError> {
        if !factor.is_finite() || factor < 1.0 {
            return Err(BackoffError::InvalidFactor(factor));
        }
        match &mut self.kind {
            BackoffKind::Exponential { factor: existing, .. } => {
                *existing = factor;
                Ok(self)
            }
            BackoffKind::Constant { .. } => Err(BackoffError::ConstantDoesNotSupportFactor),
        }
    }

    /// Set a maximum delay for an exponential backoff.
    /// Returns an error if called on `Constant`, if `max` is zero, or if `max < base`.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match &mut self.kind {
            BackoffKind::Exponential { base, max: existing, .. } => {
                if max < *base {
                    return Err(BackoffError::MaxLessThanBase { base: *base, max });
                }
                *existing = Some(max);
                Ok(self)
            }
            BackoffKind::Constant { .. } => Err(BackoffError::ConstantDoesNotSupportMax),
        }
    }

    /// Calculate the delay for a given attempt number (0-based; 0 = initial call, no delay).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match &self.kind {
            BackoffKind::Constant { delay } => *delay,
            BackoffKind::Exponential { base, factor, max } => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as usize) as i32;
                let nanos = (base.as_nanos() as f64 * factor.powi(exponent)).round();
                let exp_delay = if nanos.is_finite() && nanos < MAX_BACKOFF.as_nanos() as f64 {
                    Duration::from_nanos(nanos as u64)
                } else {
                    MAX_BACKOFF
                };
                let capped = max.map(|m| exp_delay.min(m)).unwrap_or(exp_delay);
                capped.min(MAX_BACKOFF)
            }
        }
    }
}

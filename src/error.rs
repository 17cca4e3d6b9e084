//! Error types shared by the deadline and retry policies
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
/// Cap the number of stored failures inside RetryExhausted to avoid unbounded growth.
pub const MAX_RETRY_FAILURES: usize = 10;
/// Unified error type for the deadline and retry policies
#[derive(Debug, Clone)]
pub enum ResilienceError<E> {
    /// Every permitted deadline-bounded attempt was abandoned
    Timeout { elapsed: Duration, timeout: Duration },
    /// The attempt or elapsed-time budget of a retry policy ran out
    RetryExhausted { attempts: usize, failures: Arc<Vec<E>> },
    /// The logical call was aborted from outside (shutdown) before it resolved
    Cancelled,
    /// The underlying operation failed
    Inner(E),
}
impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { elapsed, timeout } => {
                write!(f, "operation timed out after {:?} (deadline: {:?})", elapsed, timeout)
            }
            Self::RetryExhausted { attempts, failures } => {
                let recorded = failures.len();
                let truncated_note = if recorded < *attempts {
                    format!(" (recorded last {} failures)", recorded)
                } else {
                    String::new()
                };
                if let Some(last) = failures.last() {
                    write!(
                        f,
                        "retry exhausted after {} attempts{}; last error: {}",
                        attempts, truncated_note, last
                    )
                } else {
                    write!(
                        f,
                        "retry exhausted after {} attempts{}; no recorded failures",
                        attempts, truncated_note
                    )
                }
            }
            Self::Cancelled => write!(f, "operation cancelled before completion"),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}
impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RetryExhausted { failures, .. } => {
                failures.last().map(|e| e as &dyn std::error::Error)
            }
            _ => None,
        }
    }
}
impl<E> From<E> for ResilienceError<E> {
    fn from(err: E) -> Self {
        ResilienceError::Inner(err)
    }
}
impl<E> ResilienceError<E> {
    /// Construct a `RetryExhausted` variant while enforcing the `MAX_RETRY_FAILURES` cap by keeping the most recent failures.
    pub fn retry_exhausted(attempts: usize, failures: Vec<E>) -> Self {
        let trimmed = if failures.len() > MAX_RETRY_FAILURES {
            failures.into_iter().rev().take(MAX_RETRY_FAILURES).rev().collect()
        } else {
            failures
        };
        ResilienceError::RetryExhausted { attempts, failures: Arc::new(trimmed) }
    }
    /// Check if this error is due to an exhausted deadline budget
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
    /// Check if this error is due to retry exhaustion
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }
    /// Check if the call was cancelled from outside
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
    /// Access all recorded failures for RetryExhausted, if present.
    pub fn failures(&self) -> Option<&[E]> {
        match self {
            Self::RetryExhausted { failures, .. } => Some(failures.as_slice()),
            _ => None,
        }
    }
    /// Check if this error wraps an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }
    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
    /// Access timeout details as (elapsed, deadline).
    pub fn timeout_details(&self) -> Option<(Duration, Duration)> {
        match self {
            Self::Timeout { elapsed, timeout } => Some((*elapsed, *timeout)),
            _ => None,
        }
    }
    /// Access retry exhaustion info as (attempts, recorded_failures).
    pub fn retry_exhausted_info(&self) -> Option<(usize, usize)> {
        match self {
            Self::RetryExhausted { attempts, failures } => Some((*attempts, failures.len())),
            _ => None,
        }
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::fmt;
    use std::io;
    #[derive(Debug, Clone, PartialEq, Eq)]
    struct DummyError(&'static str);
    impl fmt::Display for DummyError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }
    impl std::error::Error for DummyError {}
    #[test]
    fn timeout_error_display() {
        let err: ResilienceError<io::Error> = ResilienceError::Timeout {
            elapsed: Duration::from_millis(5100),
            timeout: Duration::from_secs(5),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("timed out"));
        assert!(msg.contains("5.1"));
    }
    #[test]
    fn cancelled_error_display() {
        let err: ResilienceError<io::Error> = ResilienceError::Cancelled;
        assert!(err.to_string().contains("cancelled"));
        assert!(err.is_cancelled());
        assert!(err.source().is_none());
    }
    #[test]
    fn retry_exhausted_display_includes_last_error() {
        let err: ResilienceError<DummyError> = ResilienceError::RetryExhausted {
            attempts: 3,
            failures: Arc::new(vec![DummyError("first"), DummyError("rate limited")]),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("3 attempts"));
        assert!(msg.ends_with("last error: rate limited"));
    }
    #[test]
    fn retry_exhausted_display_handles_empty_failures() {
        let err: ResilienceError<DummyError> = ResilienceError::retry_exhausted(3, vec![]);
        let msg = format!("{}", err);
        assert!(msg.contains("3"));
        assert!(msg.contains("no recorded failures"));
        assert!(!msg.ends_with(": "));
    }
    #[test]
    fn retry_exhausted_keeps_most_recent_failures() {
        let failures: Vec<DummyError> = (0..15)
            .map(|i| if i < 14 { DummyError("old") } else { DummyError("newest") })
            .collect();
        let err = ResilienceError::retry_exhausted(15, failures);
        let kept = err.failures().unwrap();
        assert_eq!(kept.len(), MAX_RETRY_FAILURES);
        assert_eq!(kept.last().unwrap().0, "newest");
        assert!(err.to_string().contains("recorded last 10 failures"));
    }
    #[test]
    fn inner_converts_from_plain_error() {
        let err: ResilienceError<DummyError> = DummyError("boom").into();
        assert!(err.is_inner());
        assert_eq!(err.as_inner().unwrap().0, "boom");
        assert_eq!(err.source().unwrap().to_string(), "boom");
        assert_eq!(err.into_inner(), Some(DummyError("boom")));
    }
    #[test]
    fn accessor_methods_return_expected_data() {
        let timeout = ResilienceError::<DummyError>::Timeout {
            elapsed: Duration::from_millis(10),
            timeout: Duration::from_millis(20),
        };
        assert_eq!(
            timeout.timeout_details(),
            Some((Duration::from_millis(10), Duration::from_millis(20)))
        );
        assert!(timeout.retry_exhausted_info().is_none());
        let failures = vec![DummyError("one"), DummyError("two")];
        let retry = ResilienceError::retry_exhausted(5, failures.clone());
        assert_eq!(retry.retry_exhausted_info(), Some((5, failures.len())));
        assert_eq!(retry.failures().unwrap(), failures.as_slice());
        assert!(retry.is_retry_exhausted());
        assert!(!retry.is_timeout());
        let inner = ResilienceError::Inner(DummyError("x"));
        assert!(inner.failures().is_none());
        assert!(inner.timeout_details().is_none());
    }
}

mod common;

use common::log_capture::capture_logs;
use promptly::{DeadlinePolicy, ResilienceError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WARNING: &str = "operation exceeded the given deadline";

#[derive(Debug, Clone, PartialEq, Eq)]
struct ValueError(&'static str);

impl std::fmt::Display for ValueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ValueError: {}", self.0)
    }
}

impl std::error::Error for ValueError {}

fn half_second() -> DeadlinePolicy {
    DeadlinePolicy::new(Duration::from_millis(500)).unwrap()
}

#[tokio::test(start_paused = true)]
async fn slow_first_attempt_is_reissued_once() {
    let logs = capture_logs();
    let calls = Arc::new(AtomicUsize::new(0));

    let result = half_second()
        .execute(|_cancel| {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 1 {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Ok::<_, ResilienceError<ValueError>>(format!("OK {}", n))
            }
        })
        .await;

    assert_eq!(result.unwrap(), "OK 2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(logs.count(WARNING), 1);
}

#[tokio::test(start_paused = true)]
async fn fast_operation_logs_nothing() {
    let logs = capture_logs();
    let result = half_second()
        .execute(|_cancel| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, ResilienceError<ValueError>>(42)
        })
        .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(logs.count(WARNING), 0);
}

#[tokio::test(start_paused = true)]
async fn completed_error_propagates_without_reissue() {
    let calls = Arc::new(AtomicUsize::new(0));
    let result = half_second()
        .execute(|_cancel| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ResilienceError::Inner(ValueError("boom")))
            }
        })
        .await;

    assert_eq!(result.unwrap_err().into_inner(), Some(ValueError("boom")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn every_abandoned_attempt_logs_one_warning() {
    let logs = capture_logs();
    let calls = Arc::new(AtomicUsize::new(0));

    let result = half_second()
        .execute(|_cancel| {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 4 {
                    futures::future::pending::<()>().await;
                }
                Ok::<_, ResilienceError<ValueError>>("finally")
            }
        })
        .await;

    assert_eq!(result.unwrap(), "finally");
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(logs.count(WARNING), 4);
}

#[tokio::test(start_paused = true)]
async fn bounded_policy_gives_up_with_timeout() {
    let policy = half_second().with_max_attempts(3).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let result = policy
        .execute(|_cancel| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                futures::future::pending::<Result<(), ResilienceError<ValueError>>>().await
            }
        })
        .await;

    let (elapsed, timeout) = result.unwrap_err().timeout_details().unwrap();
    assert_eq!(timeout, Duration::from_millis(500));
    assert!(elapsed >= Duration::from_millis(1500));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn blocking_operation_is_reissued_after_deadline() {
    let logs = capture_logs();
    let policy = DeadlinePolicy::new(Duration::from_millis(50)).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let observed_cancel = Arc::new(AtomicUsize::new(0));

    let result = {
        let calls = calls.clone();
        let observed_cancel = observed_cancel.clone();
        policy
            .execute_blocking(move |cancel| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 1 {
                    // cooperative: poll the token instead of sleeping blindly
                    while !cancel.is_cancelled() {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    observed_cancel.fetch_add(1, Ordering::SeqCst);
                    return Err(ValueError("abandoned"));
                }
                Ok(format!("OK {}", n))
            })
            .await
    };

    assert_eq!(result.unwrap(), "OK 2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(logs.count(WARNING), 1);

    // the abandoned worker sees its token and stops on its own
    for _ in 0..200 {
        if observed_cancel.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(observed_cancel.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn blocking_error_propagates() {
    let policy = DeadlinePolicy::new(Duration::from_secs(5)).unwrap();
    let result = policy
        .execute_blocking(|_cancel| Err::<(), _>(ValueError("boom")))
        .await;
    assert_eq!(result.unwrap_err().into_inner(), Some(ValueError("boom")));
}

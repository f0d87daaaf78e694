use std::future::Future;

use domain::common::error::DomainError;
use domain::ingest::backoff::{BackoffPolicy, RetryStep};
use tokio_util::sync::CancellationToken;

/// Whether a failed attempt is worth repeating. Caller mistakes
/// (`InvalidInput`) and missing targets never succeed on retry.
pub fn is_retryable(err: &DomainError) -> bool {
    !matches!(err, DomainError::InvalidInput(_) | DomainError::NotFound(_))
}

/// Drive `f` through the policy's retry state machine.
///
/// Each attempt is bounded by the policy's attempt timeout. Backoff
/// sleeps end early on cancellation, which returns the last error.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &BackoffPolicy,
    cancel: &CancellationToken,
    mut f: F,
) -> Result<T, DomainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DomainError>>,
{
    let mut state = policy.start();
    loop {
        let err = match tokio::time::timeout(state.attempt_timeout(), f()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_elapsed) => DomainError::Unavailable(format!(
                "attempt timed out after {:?}",
                state.attempt_timeout()
            )),
        };
        if !is_retryable(&err) {
            return Err(err);
        }
        match state.on_failure() {
            RetryStep::Exhausted => {
                return Err(DomainError::Unavailable(format!(
                    "gave up after {} attempts: {err}",
                    state.attempts()
                )));
            }
            RetryStep::RetryAfter(delay) => {
                tracing::debug!(attempt = state.attempts(), ?delay, error = %err, "retrying");
                tokio::select! {
                    () = cancel.cancelled() => return Err(err),
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;

    fn make_policy(max_retries: u32) -> BackoffPolicy {
        BackoffPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            attempt_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = retry_with_backoff(&make_policy(3), &CancellationToken::new(), || {
            calls_clone.fetch_add(1, Ordering::Relaxed);
            async { Ok(7) }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn succeeds_after_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = retry_with_backoff(&make_policy(3), &CancellationToken::new(), || {
            let attempt = calls_clone.fetch_add(1, Ordering::Relaxed);
            async move {
                if attempt < 2 {
                    Err(DomainError::Unavailable("transient".to_string()))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<(), _> =
            retry_with_backoff(&make_policy(2), &CancellationToken::new(), || {
                calls_clone.fetch_add(1, Ordering::Relaxed);
                async { Err(DomainError::Unavailable("down".to_string())) }
            })
            .await;

        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("3 attempts"), "got: {msg}");
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn invalid_input_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<(), _> =
            retry_with_backoff(&make_policy(5), &CancellationToken::new(), || {
                calls_clone.fetch_add(1, Ordering::Relaxed);
                async { Err(DomainError::InvalidInput("400".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(DomainError::InvalidInput(_))));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn attempt_timeout_enforced() {
        let policy = BackoffPolicy {
            attempt_timeout: Duration::from_millis(10),
            ..make_policy(0)
        };
        let result = retry_with_backoff(&policy, &CancellationToken::new(), || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;

        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("timed out"), "got: {msg}");
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let policy = BackoffPolicy {
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            ..make_policy(5)
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let start = std::time::Instant::now();
        let result: Result<(), _> = retry_with_backoff(&policy, &cancel, || async {
            Err(DomainError::Unavailable("down".to_string()))
        })
        .await;

        assert!(result.is_err());
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}

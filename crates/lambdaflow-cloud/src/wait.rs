//! Bounded polling and retry loops
//!
//! Eventual consistency is handled here and nowhere else: waits poll a check
//! until it reports ready, retries repeat an operation while its error is
//! classified as transient. Both give up after `RetryConfig::max_attempts`.

use crate::error::{CloudError, Result};
use crate::provider::RetryConfig;
use std::future::Future;

/// Outcome of a single poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus<T> {
    Ready(T),
    /// Not ready yet; carries the observed status for logging
    Pending(String),
}

/// Poll `check` until it is ready
pub async fn poll_until<T, F, Fut>(what: &str, retry: &RetryConfig, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus<T>>>,
{
    let attempts = retry.max_attempts.max(1);
    let mut last_status = String::new();

    for attempt in 0..attempts {
        match check().await? {
            PollStatus::Ready(value) => {
                if attempt > 0 {
                    tracing::debug!("{} ready after {} polls", what, attempt + 1);
                }
                return Ok(value);
            }
            PollStatus::Pending(status) => {
                tracing::debug!("Waiting for {} (status: {})", what, status);
                last_status = status;
                if attempt + 1 == attempts {
                    break;
                }
                let delay = retry.delay_for(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(CloudError::Timeout(format!(
        "{} still {} after {} polls",
        what, last_status, attempts
    )))
}

/// Run `op`, retrying with backoff while `transient` says the error is worth retrying
pub async fn retry_while<T, F, Fut, P>(
    what: &str,
    retry: &RetryConfig,
    mut op: F,
    transient: P,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&CloudError) -> bool,
{
    let attempts = retry.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if transient(&e) && attempt + 1 < attempts => {
                let delay = retry.delay_for(attempt);
                tracing::warn!(
                    "{} failed ({}), retrying in {:?} ({}/{})",
                    what,
                    e,
                    delay,
                    attempt + 1,
                    attempts
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_poll_until_ready() {
        let polls = AtomicU32::new(0);
        let polls_ref = &polls;

        let value = poll_until("table", &RetryConfig::immediate(5), move || async move {
            let n = polls_ref.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Ok(PollStatus::Pending("creating".to_string()))
            } else {
                Ok(PollStatus::Ready(n))
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 2);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_until_times_out() {
        let result: Result<()> = poll_until("function update", &RetryConfig::immediate(3), || async {
            Ok(PollStatus::Pending("in_progress".to_string()))
        })
        .await;

        match result {
            Err(CloudError::Timeout(msg)) => assert!(msg.contains("in_progress")),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    /// Giving up does not wait out one more delay first
    #[tokio::test]
    async fn test_poll_until_gives_up_without_final_sleep() {
        let retry = RetryConfig {
            max_attempts: 2,
            initial_delay: std::time::Duration::from_millis(50),
            max_delay: std::time::Duration::from_secs(60),
            backoff_multiplier: 600.0,
        };

        let started = std::time::Instant::now();
        let result: Result<()> = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            poll_until("table", &retry, || async {
                Ok(PollStatus::Pending("creating".to_string()))
            }),
        )
        .await
        .expect("poll_until slept after its last attempt");

        assert!(matches!(result, Err(CloudError::Timeout(_))));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retry_while_transient_then_success() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;

        let value = retry_while(
            "create function",
            &RetryConfig::immediate(4),
            move || async move {
                if calls_ref.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CloudError::RoleNotAssumable("not yet".to_string()))
                } else {
                    Ok("created")
                }
            },
            |e| matches!(e, CloudError::RoleNotAssumable(_)),
        )
        .await
        .unwrap();

        assert_eq!(value, "created");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_while_gives_up_and_skips_fatal() {
        let result: Result<()> = retry_while(
            "create function",
            &RetryConfig::immediate(2),
            || async { Err(CloudError::RoleNotAssumable("never".to_string())) },
            |e| matches!(e, CloudError::RoleNotAssumable(_)),
        )
        .await;
        assert!(matches!(result, Err(CloudError::RoleNotAssumable(_))));

        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let result: Result<()> = retry_while(
            "create function",
            &RetryConfig::immediate(5),
            move || async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Err(CloudError::ApiError("boom".to_string()))
            },
            |e| matches!(e, CloudError::RoleNotAssumable(_)),
        )
        .await;
        assert!(matches!(result, Err(CloudError::ApiError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

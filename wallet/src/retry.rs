use crate::config::RetryPolicy;
use std::future::Future;
use tokio::time::sleep;
use tracing::warn;

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's retry budget is spent. The last error is returned.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries && is_retryable(&e) => {
                attempt += 1;
                let delay = policy.backoff(attempt);
                warn!("{} failed ({}), retry {} in {:?}", label, e, attempt, delay);
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::WalletError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let started = tokio::time::Instant::now();

        let result: Result<u32, WalletError> = retry(
            &RetryPolicy::default(),
            "GetBalance",
            WalletError::is_transient,
            || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(WalletError::Network("connection reset".into()))
                } else {
                    Ok(n)
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms of backoff
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_budget() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy {
            max_retries: 2,
            ..RetryPolicy::default()
        };

        let result: Result<(), WalletError> = retry(&policy, "GetBalance", WalletError::is_transient, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(WalletError::Network("timeout".into()))
        })
        .await;

        assert!(matches!(result, Err(WalletError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_surfaces_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<(), WalletError> = retry(
            &RetryPolicy::default(),
            "GetTransactionStatus",
            WalletError::is_transient,
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(WalletError::InvalidState("bad".into()))
            },
        )
        .await;

        assert!(matches!(result, Err(WalletError::InvalidState(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

use crate::StoreError;
use std::future::Future;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY: Duration = Duration::from_millis(250);

/// Run a sink operation with bounded retries and exponential backoff.
/// Only transient errors retry; the final error is returned unchanged.
pub async fn with_retries<T, F, Fut>(op: &str, mut f: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                let delay = BASE_DELAY * 2u32.saturating_pow(attempt - 1);
                tracing::warn!(
                    op,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient sink error, backing off",
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> StoreError {
        StoreError::Io {
            path: "x".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "flaky"),
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retries("op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(transient())
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_bounded_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries("op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_permanent_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries("op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(StoreError::Serialization(serde::de::Error::custom(
                    "broken",
                )))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

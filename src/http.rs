use crate::meli::config::HttpSettings;
use rand::Rng;
use reqwest::Client;
use std::{future::Future, time::Duration};
use tokio::time::sleep;

pub fn build_client(settings: &HttpSettings) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs.max(1)))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Runs an idempotent read, retrying up to `retries` extra times while
/// `is_transient` holds for the error.
pub async fn with_read_retries<T, E, F, Fut>(
    retries: u32,
    base_delay_ms: u64,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < retries && is_transient(&err) => {
                sleep(backoff_delay(attempt, base_delay_ms)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn backoff_delay(attempt: u32, base_delay_ms: u64) -> Duration {
    let exp = base_delay_ms.saturating_mul(1u64 << attempt.min(6));
    let jitter = if base_delay_ms == 0 {
        0
    } else {
        rand::rng().random_range(0..=base_delay_ms / 2)
    };
    Duration::from_millis(exp + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_read_retries(
            2,
            0,
            |_| true,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err("flaky") } else { Ok(n) } }
            },
        )
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = with_read_retries(
            5,
            0,
            |err: &&str| *err == "transient",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("permanent") }
            },
        )
        .await;
        assert_eq!(result, Err("permanent"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_with_attempts() {
        assert!(backoff_delay(2, 100) >= Duration::from_millis(400));
        assert_eq!(backoff_delay(3, 0), Duration::ZERO);
    }
}

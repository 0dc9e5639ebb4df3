//! Bounded retry with exponential backoff for transient external failures.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Backoff schedule between attempts: the operation runs at most 4 times.
const DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(4),
    Duration::from_secs(16),
];

/// Runs `op`, retrying on errors `is_transient` accepts, with 1s/4s/16s
/// backoff. Non-transient errors and the final failure pass through.
pub async fn with_backoff<T, E, F, Fut>(
    what: &str,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < DELAYS.len() && is_transient(&e) => {
                let delay = DELAYS[attempt];
                attempt += 1;
                warn!(
                    what,
                    attempt,
                    delay_secs = delay.as_secs(),
                    error = %e,
                    "transient failure; backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = with_backoff("op", |_| true, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err("flaky".to_string())
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = with_backoff("op", |_| true, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("down".to_string())
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_transient_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = with_backoff("op", |_| false, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("fatal".to_string())
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

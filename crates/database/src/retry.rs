use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Exponential backoff for store writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff: Duration::from_secs(30),
        }
    }

    /// Backoff before attempt `attempt + 1`, doubling from `initial_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Runs `operation` until it succeeds or the attempts are used up, returning
    /// the last error.
    pub async fn run<T, E, F, Fut>(&self, name: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = name, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < attempts => {
                    let delay = self.backoff(attempt);
                    warn!(operation = name, attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying");
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(operation = name, attempts, error = %e, "giving up");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(40), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let result: Result<u32, String> = policy
            .run("flaky", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(format!("attempt {n}")) } else { Ok(n) }
            })
            .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_error_when_exhausted() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(10));
        let result: Result<(), String> = policy
            .run("broken", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            })
            .await;
        assert_eq!(result, Err("down".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

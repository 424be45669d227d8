//! Retry with exponential backoff.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Something that can wait. Tests substitute a recording fake.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock sleeping on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// How many times to try and how long to wait in between.
///
/// The delay before retry `n` (0-based) is `base_delay * 2^n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Backoff after the `attempt`-th failure (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out. The last error is returned.
    pub async fn run<T, E, Op, Fut, R>(&self, sleeper: &dyn Sleeper, is_retryable: R, mut op: Op) -> Result<T, E>
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if is_retryable(&e) && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::info!(
                        "Retrying in {:?} (attempt {}/{}): {}",
                        delay,
                        attempt + 1,
                        self.max_attempts,
                        e
                    );
                    sleeper.sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingSleeper(Mutex<Vec<Duration>>);

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.0.lock().unwrap().push(duration);
        }
    }

    #[test]
    fn delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let sleeper = RecordingSleeper::default();
        let calls = Arc::new(Mutex::new(0));

        let result: Result<&str, String> = RetryPolicy::default()
            .run(&sleeper, |_| true, |_| {
                let calls = Arc::clone(&calls);
                async move {
                    let mut n = calls.lock().unwrap();
                    *n += 1;
                    if *n < 3 {
                        Err("connection reset".to_string())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(*calls.lock().unwrap(), 3);
        assert_eq!(
            *sleeper.0.lock().unwrap(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let sleeper = RecordingSleeper::default();
        let result: Result<(), String> = RetryPolicy::default()
            .run(&sleeper, |_| true, |n| async move { Err(format!("timeout #{n}")) })
            .await;

        assert_eq!(result, Err("timeout #2".to_string()));
        assert_eq!(sleeper.0.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let sleeper = RecordingSleeper::default();
        let result: Result<(), String> = RetryPolicy::default()
            .run(&sleeper, |e: &String| e.contains("timeout"), |_| async {
                Err("409 conflict".to_string())
            })
            .await;

        assert_eq!(result, Err("409 conflict".to_string()));
        assert!(sleeper.0.lock().unwrap().is_empty());
    }
}

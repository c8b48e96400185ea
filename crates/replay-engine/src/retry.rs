//! Fixed-attempt retry policy
//!
//! Attempts run back to back with no backoff.

use std::fmt::Display;
use std::future::Future;

/// Outcome of a retried operation that never succeeded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted<E> {
    /// Attempts made
    pub attempts: u32,
    /// Error of the final attempt
    pub last: E,
}

/// Retry an operation a fixed number of times
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    /// Policy with `max_attempts` total attempts (at least one)
    #[inline]
    #[must_use]
    pub fn fixed(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Total attempts allowed
    #[inline]
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op` until it succeeds or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. On success returns the value
    /// and the attempt that produced it.
    ///
    /// # Errors
    /// `RetryExhausted` carrying the last attempt's error.
    pub async fn execute<T, E, F, Fut>(&self, mut op: F) -> Result<(T, u32), RetryExhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok((value, attempt)),
                Err(error) if attempt < self.max_attempts => {
                    tracing::warn!(
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        error = %error,
                        "attempt failed, retrying"
                    );
                    attempt += 1;
                }
                Err(error) => {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last: error,
                    })
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(crate::config::WARMUP_MAX_ATTEMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::fixed(3)
            .execute(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err("blip")
                    } else {
                        Ok("warm")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(("warm", 3)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<((), u32), _> = RetryPolicy::fixed(3)
            .execute(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(format!("failure {attempt}")) }
            })
            .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.last, "failure 3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_attempts_means_one() {
        let policy = RetryPolicy::fixed(0);
        assert_eq!(policy.max_attempts(), 1);

        let result = policy.execute(|_| async { Ok::<_, String>(7) }).await;
        assert_eq!(result, Ok((7, 1)));
    }
}

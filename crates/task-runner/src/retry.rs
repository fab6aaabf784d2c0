//! Bounded retry for collaborator calls
//!
//! The pipeline engine never retries; readiness polling and other
//! locally-retryable collaborator calls wrap themselves in [`retry`],
//! which always has a bounded attempt count and delay.

use async_io::Timer;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// All attempts of a retried operation failed.
#[derive(Error, Debug)]
#[error("'{description}' did not succeed after {attempts} attempt(s): {last}")]
pub struct RetryError<E: Display + Debug> {
    /// What was being attempted
    pub description: String,
    /// How many attempts were made
    pub attempts: u32,
    /// The error from the final attempt
    pub last: E,
}

/// Run `op` up to `max_attempts` times, sleeping `delay` between attempts.
///
/// `max_attempts` is clamped to at least one. The wait is always bounded:
/// at most `max_attempts x delay` wall time beyond the operations
/// themselves.
pub async fn retry<T, E, F, Fut>(
    description: &str,
    max_attempts: u32,
    delay: Duration,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display + Debug,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => {
                return Err(RetryError {
                    description: description.to_string(),
                    attempts: attempt,
                    last: e,
                });
            }
            Err(e) => {
                tracing::debug!(
                    "'{}' attempt {}/{} failed: {}; retrying in {:?}",
                    description,
                    attempt,
                    max_attempts,
                    e,
                    delay
                );
                Timer::after(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[smol_potat::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry("poll pods", 5, Duration::from_millis(1), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("not ready")
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[smol_potat::test]
    async fn test_exhaustion_reports_attempts_and_cause() {
        let calls = AtomicU32::new(0);
        let err = retry("poll pods", 3, Duration::from_millis(1), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("still not ready")
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.attempts, 3);
        assert!(err.to_string().contains("poll pods"));
        assert!(err.to_string().contains("still not ready"));
    }

    #[smol_potat::test]
    async fn test_zero_attempts_clamped_to_one() {
        let calls = AtomicU32::new(0);
        let _ = retry("noop", 0, Duration::from_millis(1), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>(())
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

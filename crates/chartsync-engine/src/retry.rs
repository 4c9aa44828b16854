//! Fixed-delay retries applied at the call site
//!
//! Collaborators never retry on their own. The engine wraps image copies
//! and chart pushes with [`retry_with_policy`].

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Attempts and delay between them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: u32,

    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// A single attempt
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

/// Run `op` until it succeeds or the policy's attempts are used up.
///
/// Returns the last error.
pub async fn retry_with_policy<F, Fut, T, E>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                tracing::warn!(
                    operation = %what,
                    attempt,
                    attempts,
                    error = %e,
                    "attempt failed, retrying in {:?}",
                    policy.delay
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(operation = %what, attempts, error = %e, "giving up");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(3, Duration::ZERO);

        let result: Result<u32, String> = retry_with_policy(&policy, "copy", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 { Err(format!("boom {}", n)) } else { Ok(n) }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_returns_last_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(2, Duration::ZERO);

        let result: Result<(), String> = retry_with_policy(&policy, "push", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(format!("boom {}", n))
        })
        .await;

        assert_eq!(result.unwrap_err(), "boom 2");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(0, Duration::ZERO);
        let _: Result<(), &str> = retry_with_policy(&policy, "noop", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("nope")
        })
        .await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_humantime_delay() {
        let policy: RetryPolicy = serde_yaml::from_str("attempts: 5\ndelay: 250ms\n").unwrap();
        assert_eq!(policy.attempts, 5);
        assert_eq!(policy.delay, Duration::from_millis(250));

        let defaulted: RetryPolicy = serde_yaml::from_str("attempts: 2\n").unwrap();
        assert_eq!(defaulted.delay, Duration::from_secs(5));
    }
}

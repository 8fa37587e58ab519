//! Bounded retry with exponential backoff for unreliable collaborator calls.
//!
//! Every call to a role capability in the pipeline (implement, write-tests,
//! review, and the independent reviewer's sub-calls) is wrapped in a
//! [`RetryPolicy`]. The policy is stateless and reentrant; the caller keeps
//! one per call class and shares it freely.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Default attempt budget for implementer-side calls.
pub const DEFAULT_AGENT_ATTEMPTS: u32 = 3;
/// Default base delay for implementer-side calls.
pub const DEFAULT_AGENT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Attempt budget for the independent reviewer's sub-calls. Smaller than the
/// implementer budget: graceful degradation exists as a fallback, so the
/// secondary reviewer is not worth retrying aggressively.
pub const DEFAULT_REVIEWER_ATTEMPTS: u32 = 2;
/// Base delay for the independent reviewer's sub-calls (doubled).
pub const DEFAULT_REVIEWER_BASE_DELAY: Duration = Duration::from_millis(2000);

/// Retries an async operation with exponential backoff and no jitter.
///
/// The delay before attempt `k+1` is `base_delay * 2^(k-1)`; the final
/// attempt has no subsequent delay. The operation's own error type is
/// returned after the final attempt; intermediate failures are only logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::agent_default()
    }
}

impl RetryPolicy {
    /// Create a policy. An attempt budget of zero is promoted to one.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Policy for implementer capability calls: 3 attempts, 1s base delay.
    pub fn agent_default() -> Self {
        Self::new(DEFAULT_AGENT_ATTEMPTS, DEFAULT_AGENT_BASE_DELAY)
    }

    /// Policy for independent-reviewer sub-calls: 2 attempts, 2s base delay.
    pub fn reviewer_default() -> Self {
        Self::new(DEFAULT_REVIEWER_ATTEMPTS, DEFAULT_REVIEWER_BASE_DELAY)
    }

    /// Delay inserted before the given attempt number (1-based).
    ///
    /// Attempt 1 runs immediately; attempt `n >= 2` waits
    /// `base_delay * 2^(n-2)`.
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        self.base_delay * 2u32.saturating_pow(attempt - 2)
    }

    /// Run `op`, retrying on failure up to the attempt budget.
    ///
    /// `label` identifies the operation in retry logs. The error of the final
    /// attempt is returned unchanged.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts => {
                    warn!(
                        target: "conveyor::retry",
                        %err,
                        attempt,
                        max_attempts = self.max_attempts,
                        label,
                        "attempt failed, backing off"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.delay_before_attempt(attempt)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_law_1000ms_base() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000));
        assert_eq!(policy.delay_before_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_before_attempt(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_before_attempt(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_backoff_doubles_each_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_millis(500));
        assert_eq!(policy.delay_before_attempt(2), Duration::from_millis(500));
        assert_eq!(policy.delay_before_attempt(3), Duration::from_millis(1000));
        assert_eq!(policy.delay_before_attempt(4), Duration::from_millis(2000));
        assert_eq!(policy.delay_before_attempt(5), Duration::from_millis(4000));
    }

    #[test]
    fn test_zero_attempts_promoted_to_one() {
        let policy = RetryPolicy::new(0, Duration::from_millis(100));
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn test_defaults() {
        let agent = RetryPolicy::agent_default();
        assert_eq!(agent.max_attempts, 3);
        assert_eq!(agent.base_delay, Duration::from_millis(1000));

        let reviewer = RetryPolicy::reviewer_default();
        assert_eq!(reviewer.max_attempts, 2);
        assert_eq!(reviewer.base_delay, Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_succeeds_first_attempt_without_sleeping() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000));
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = policy
            .run("noop", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(7) }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_until_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000));
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = policy
            .run("flaky", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_final_error_after_budget() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10));
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = policy
            .run("doomed", || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(format!("failure {}", n)) }
            })
            .await;
        assert_eq!(result.unwrap_err(), "failure 2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_single_attempt_never_sleeps() {
        let policy = RetryPolicy::new(1, Duration::from_secs(3600));
        let start = tokio::time::Instant::now();
        let result: Result<(), String> = policy.run("once", || async { Err("no".to_string()) }).await;
        assert!(result.is_err());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}

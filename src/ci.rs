//! CI monitoring: poll check runs until they resolve, then merge.
//!
//! The loop is bounded by an explicit poll budget and the interval is
//! injectable, so tests drive it deterministically without wall-clock
//! delay. A failed CI run or failed merge is surfaced to the caller for
//! escalation; it is never blindly retried.

use crate::collaborators::PrProvider;
use crate::errors::CiError;
use crate::models::{CiStatus, PrResult};
use crate::retry::RetryPolicy;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fixed interval between check-run polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
/// Poll budget: 60 polls at 30s is a 30-minute ceiling.
pub const DEFAULT_MAX_POLLS: u32 = 60;

/// Outcome of a resolved CI run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiOutcome {
    pub status: CiStatus,
    pub merged: bool,
    /// Polls consumed before resolution.
    pub polls: u32,
}

/// Polls an external CI provider for check-run status and triggers merge on
/// success.
#[derive(Debug, Clone)]
pub struct CiMonitor {
    poll_interval: Duration,
    max_polls: u32,
    retry: RetryPolicy,
}

impl Default for CiMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_MAX_POLLS)
    }
}

impl CiMonitor {
    pub fn new(poll_interval: Duration, max_polls: u32) -> Self {
        Self {
            poll_interval,
            max_polls: max_polls.max(1),
            retry: RetryPolicy::agent_default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Poll until the PR's checks resolve.
    ///
    /// - No checks registered yet: wait and poll again.
    /// - Any check failed or cancelled: fail immediately with the failing
    ///   check names, no further polling.
    /// - All checks completed green: merge (and best-effort delete the head
    ///   branch) when `auto_merge` is set, otherwise stop, ready for manual
    ///   merge.
    /// - Budget exhausted: timeout error.
    pub async fn monitor_and_merge(
        &self,
        provider: &dyn PrProvider,
        pr: &PrResult,
        auto_merge: bool,
    ) -> Result<CiOutcome, CiError> {
        for poll in 1..=self.max_polls {
            let checks = self
                .retry
                .run("list-checks", || provider.list_checks(&pr.head_sha))
                .await
                .map_err(CiError::Provider)?;

            if checks.is_empty() {
                debug!(target: "conveyor::ci", poll, "no checks registered yet");
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            let failing: Vec<String> = checks
                .iter()
                .filter(|c| c.is_failing())
                .map(|c| c.name.clone())
                .collect();
            if !failing.is_empty() {
                warn!(target: "conveyor::ci", poll, ?failing, "CI checks failed");
                return Err(CiError::ChecksFailed { failing });
            }

            if checks.iter().all(|c| c.is_completed()) {
                info!(
                    target: "conveyor::ci",
                    poll,
                    checks = checks.len(),
                    "all CI checks passed"
                );
                if !auto_merge {
                    return Ok(CiOutcome {
                        status: CiStatus::Passed,
                        merged: false,
                        polls: poll,
                    });
                }
                provider.merge(pr.number).await.map_err(|source| {
                    CiError::MergeFailed {
                        number: pr.number,
                        source,
                    }
                })?;
                if let Err(err) = provider.delete_branch(&pr.head_branch).await {
                    warn!(
                        target: "conveyor::ci",
                        branch = %pr.head_branch,
                        %err,
                        "branch deletion failed (non-fatal)"
                    );
                }
                info!(target: "conveyor::ci", pr = pr.number, "PR merged");
                return Ok(CiOutcome {
                    status: CiStatus::Passed,
                    merged: true,
                    polls: poll,
                });
            }

            debug!(target: "conveyor::ci", poll, "CI still running");
            tokio::time::sleep(self.poll_interval).await;
        }

        Err(CiError::Timeout {
            polls: self.max_polls,
        })
    }
}

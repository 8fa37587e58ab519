//! Runtime configuration for the pipeline.

use crate::ci::{DEFAULT_MAX_POLLS, DEFAULT_POLL_INTERVAL};
use crate::retry::RetryPolicy;
use crate::review::decision::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::step::BOTTLENECK_THRESHOLD;
use std::path::PathBuf;
use std::time::Duration;

/// Default bound on test-fix attempts before escalating.
pub const DEFAULT_MAX_FIX_ATTEMPTS: u32 = 3;

/// Configuration for one [`crate::pipeline::WorkflowOrchestrator`].
///
/// Only the two storage paths are required; everything else defaults to the
/// pipeline's standard tuning and can be overridden with the `with_*`
/// builders.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory holding per-story state files and escalation records.
    pub state_dir: PathBuf,
    /// The shared sprint-status file.
    pub sprint_file: PathBuf,
    /// Minimum confidence both reviews must report for the gate to pass.
    pub confidence_threshold: f64,
    /// Retry policy for implementer capability calls.
    pub agent_retry: RetryPolicy,
    /// Retry policy for independent-reviewer sub-calls.
    pub reviewer_retry: RetryPolicy,
    /// Maximum test-fix attempts before escalating.
    pub max_fix_attempts: u32,
    /// Whether to monitor CI and merge automatically after PR creation.
    pub auto_merge: bool,
    /// Whether to synthesize a stand-in report when the independent
    /// reviewer is unavailable.
    pub graceful_degradation: bool,
    pub ci_poll_interval: Duration,
    pub ci_max_polls: u32,
    /// Steps slower than this log a bottleneck warning.
    pub bottleneck_threshold: Duration,
}

impl PipelineConfig {
    pub fn new(state_dir: impl Into<PathBuf>, sprint_file: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            sprint_file: sprint_file.into(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            agent_retry: RetryPolicy::agent_default(),
            reviewer_retry: RetryPolicy::reviewer_default(),
            max_fix_attempts: DEFAULT_MAX_FIX_ATTEMPTS,
            auto_merge: true,
            graceful_degradation: true,
            ci_poll_interval: DEFAULT_POLL_INTERVAL,
            ci_max_polls: DEFAULT_MAX_POLLS,
            bottleneck_threshold: BOTTLENECK_THRESHOLD,
        }
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_agent_retry(mut self, retry: RetryPolicy) -> Self {
        self.agent_retry = retry;
        self
    }

    pub fn with_reviewer_retry(mut self, retry: RetryPolicy) -> Self {
        self.reviewer_retry = retry;
        self
    }

    pub fn with_max_fix_attempts(mut self, attempts: u32) -> Self {
        self.max_fix_attempts = attempts.max(1);
        self
    }

    pub fn with_auto_merge(mut self, auto_merge: bool) -> Self {
        self.auto_merge = auto_merge;
        self
    }

    pub fn with_graceful_degradation(mut self, enabled: bool) -> Self {
        self.graceful_degradation = enabled;
        self
    }

    pub fn with_ci_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.ci_poll_interval = interval;
        self.ci_max_polls = max_polls;
        self
    }

    pub fn with_bottleneck_threshold(mut self, threshold: Duration) -> Self {
        self.bottleneck_threshold = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::new("/tmp/states", "/tmp/sprint.yaml");
        assert_eq!(config.confidence_threshold, 0.85);
        assert_eq!(config.agent_retry.max_attempts, 3);
        assert_eq!(config.reviewer_retry.max_attempts, 2);
        assert_eq!(
            config.reviewer_retry.base_delay,
            config.agent_retry.base_delay * 2
        );
        assert_eq!(config.max_fix_attempts, 3);
        assert!(config.auto_merge);
        assert!(config.graceful_degradation);
        assert_eq!(config.ci_poll_interval, Duration::from_secs(30));
        assert_eq!(config.ci_max_polls, 60);
        assert_eq!(config.bottleneck_threshold, Duration::from_secs(1800));
    }

    #[test]
    fn test_builders() {
        let config = PipelineConfig::new("/tmp/states", "/tmp/sprint.yaml")
            .with_confidence_threshold(0.7)
            .with_auto_merge(false)
            .with_graceful_degradation(false)
            .with_max_fix_attempts(5)
            .with_ci_polling(Duration::from_secs(5), 10);
        assert_eq!(config.confidence_threshold, 0.7);
        assert!(!config.auto_merge);
        assert!(!config.graceful_degradation);
        assert_eq!(config.max_fix_attempts, 5);
        assert_eq!(config.ci_max_polls, 10);
    }

    #[test]
    fn test_zero_fix_attempts_promoted_to_one() {
        let config =
            PipelineConfig::new("/tmp/states", "/tmp/sprint.yaml").with_max_fix_attempts(0);
        assert_eq!(config.max_fix_attempts, 1);
    }
}

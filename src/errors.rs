//! Typed error hierarchy for the Conveyor pipeline.
//!
//! Three top-level enums cover the three subsystems:
//! - `PipelineError`: top-level orchestration failures
//! - `ReviewError`: report shape validation failures
//! - `CiError`: CI monitoring and merge failures
//!
//! Transient failures (network, model calls) are retried before they ever
//! become one of these; validation failures are never retried.

use thiserror::Error;

/// Errors from the top-level workflow orchestrator.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Story {story_id} is halted in error state; reset its persisted state to resume")]
    HaltedInError { story_id: String },

    #[error("Review gate rejected the story: {rationale}")]
    ReviewRejected { rationale: String },

    #[error("Tests still failing after {attempts} fix attempts")]
    FixAttemptsExhausted { attempts: u32 },

    #[error("Step {step} requires missing output: {output}")]
    MissingStepOutput { step: u32, output: &'static str },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from review report validation.
///
/// These indicate a collaborator contract violation, not transient
/// unavailability, and are never retried.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("Self-review checklist is empty")]
    EmptyChecklist,

    #[error("{role} confidence {value} outside [0, 1]")]
    ConfidenceOutOfRange { role: &'static str, value: f64 },

    #[error("Unrecognized code smell severity '{severity}'")]
    UnknownSmellSeverity { severity: String },

    #[error("Category score '{category}' is {value}, expected [0, 1]")]
    ScoreOutOfRange { category: &'static str, value: f64 },
}

/// Errors from the CI monitor and merge loop.
#[derive(Debug, Error)]
pub enum CiError {
    #[error("CI checks failed: {}", failing.join(", "))]
    ChecksFailed { failing: Vec<String> },

    #[error("CI did not resolve within {polls} polls")]
    Timeout { polls: u32 },

    #[error("Failed to merge PR #{number}: {source}")]
    MergeFailed {
        number: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("Check-run fetch failed: {0}")]
    Provider(#[source] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_error_halted_carries_story_id() {
        let err = PipelineError::HaltedInError {
            story_id: "story-7".to_string(),
        };
        match &err {
            PipelineError::HaltedInError { story_id } => assert_eq!(story_id, "story-7"),
            _ => panic!("Expected HaltedInError"),
        }
        assert!(err.to_string().contains("story-7"));
    }

    #[test]
    fn pipeline_error_review_rejected_carries_rationale() {
        let err = PipelineError::ReviewRejected {
            rationale: "critical issues in self-review".to_string(),
        };
        assert!(err.to_string().contains("critical issues in self-review"));
    }

    #[test]
    fn pipeline_error_converts_from_anyhow() {
        let inner = anyhow::anyhow!("worktree vanished");
        let err: PipelineError = inner.into();
        assert!(matches!(err, PipelineError::Other(_)));
    }

    #[test]
    fn review_error_confidence_out_of_range_carries_value() {
        let err = ReviewError::ConfidenceOutOfRange {
            role: "self-review",
            value: 1.3,
        };
        match &err {
            ReviewError::ConfidenceOutOfRange { value, .. } => assert_eq!(*value, 1.3),
            _ => panic!("Expected ConfidenceOutOfRange"),
        }
        assert!(err.to_string().contains("1.3"));
    }

    #[test]
    fn ci_error_checks_failed_lists_names() {
        let err = CiError::ChecksFailed {
            failing: vec!["unit".to_string(), "lint".to_string()],
        };
        assert_eq!(err.to_string(), "CI checks failed: unit, lint");
    }

    #[test]
    fn ci_error_timeout_carries_poll_count() {
        let err = CiError::Timeout { polls: 60 };
        assert!(err.to_string().contains("60"));
    }

    #[test]
    fn ci_error_merge_failed_preserves_source() {
        use std::error::Error as _;
        let err = CiError::MergeFailed {
            number: 12,
            source: anyhow::anyhow!("405 merge blocked"),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("#12"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&PipelineError::FixAttemptsExhausted { attempts: 3 });
        assert_std_error(&ReviewError::EmptyChecklist);
        assert_std_error(&CiError::Timeout { polls: 1 });
    }
}

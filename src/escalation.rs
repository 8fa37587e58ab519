//! Human-escalation records: halting automated progress and preserving
//! context for human judgment.

use crate::review::report::{IndependentReviewReport, SelfReviewReport};
use crate::state::WorkflowState;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

/// Why automated progress stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EscalationReason {
    LowConfidence,
    CriticalIssues,
    TestFailures,
    CiFailures,
    PersistentFailures,
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LowConfidence => "low-confidence",
            Self::CriticalIssues => "critical-issues",
            Self::TestFailures => "test-failures",
            Self::CiFailures => "ci-failures",
            Self::PersistentFailures => "persistent-failures",
        };
        write!(f, "{}", s)
    }
}

/// Immutable record written once per escalation event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EscalationContext {
    pub id: Uuid,
    pub story_id: String,
    pub reason: EscalationReason,
    /// Step at which escalation occurred.
    pub step: u32,
    pub message: String,
    /// The decision gate's full rationale, preserved verbatim; richer than
    /// the coarse reason enum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_review: Option<SelfReviewReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub independent_review: Option<IndependentReviewReport>,
    /// Full snapshot of the workflow state at escalation time.
    pub state: WorkflowState,
    pub created_at: DateTime<Utc>,
}

/// Serializes escalation records next to the state files.
///
/// Records are written best-effort (no temp-rename) and never automatically
/// deleted; repeated escalations for the same story each produce a new file.
#[derive(Debug, Clone)]
pub struct EscalationHandler {
    dir: PathBuf,
}

impl EscalationHandler {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Record a review-gate escalation.
    ///
    /// Reason classification: critical issues in the self-review win over
    /// low confidence. Fails only if the underlying write fails.
    pub fn escalate(
        &self,
        state: &WorkflowState,
        self_review: Option<&SelfReviewReport>,
        independent_review: Option<&IndependentReviewReport>,
        rationale: &str,
    ) -> Result<PathBuf> {
        let reason = match self_review {
            Some(review) if review.has_critical_issues() => EscalationReason::CriticalIssues,
            _ => EscalationReason::LowConfidence,
        };
        self.write_record(
            state,
            reason,
            rationale,
            Some(rationale),
            self_review,
            independent_review,
        )
    }

    /// Record an escalation with an explicit reason (test failures, CI
    /// failures, persistent failures).
    pub fn escalate_with_reason(
        &self,
        state: &WorkflowState,
        reason: EscalationReason,
        message: &str,
        self_review: Option<&SelfReviewReport>,
        independent_review: Option<&IndependentReviewReport>,
    ) -> Result<PathBuf> {
        self.write_record(state, reason, message, None, self_review, independent_review)
    }

    fn write_record(
        &self,
        state: &WorkflowState,
        reason: EscalationReason,
        message: &str,
        rationale: Option<&str>,
        self_review: Option<&SelfReviewReport>,
        independent_review: Option<&IndependentReviewReport>,
    ) -> Result<PathBuf> {
        let record = EscalationContext {
            id: Uuid::new_v4(),
            story_id: state.story_id.clone(),
            reason,
            step: state.current_step,
            message: message.to_string(),
            rationale: rationale.map(|r| r.to_string()),
            self_review: self_review.cloned(),
            independent_review: independent_review.cloned(),
            state: state.clone(),
            created_at: Utc::now(),
        };

        fs::create_dir_all(&self.dir).context("Failed to create escalation directory")?;
        let path = self
            .dir
            .join(format!("{}-escalation-{}.json", record.story_id, record.id));
        let json = serde_json::to_vec_pretty(&record)
            .context("Failed to serialize escalation record")?;
        fs::write(&path, json).context("Failed to write escalation record")?;

        info!(
            target: "conveyor::escalation",
            story_id = %record.story_id,
            %reason,
            step = record.step,
            path = %path.display(),
            "escalated for human review"
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::report::ChecklistItem;
    use tempfile::tempdir;

    fn self_review(confidence: f64, critical: Vec<String>) -> SelfReviewReport {
        SelfReviewReport {
            confidence,
            checklist: vec![ChecklistItem {
                item: "done".to_string(),
                passed: true,
            }],
            code_smells: vec![],
            critical_issues: critical,
            recommendations: vec![],
        }
    }

    fn read_record(path: &PathBuf) -> EscalationContext {
        let json = fs::read_to_string(path).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_critical_issues_reason_wins() {
        let dir = tempdir().unwrap();
        let handler = EscalationHandler::new(dir.path());
        let state = WorkflowState::new("story-1");
        let review = self_review(0.9, vec!["buffer overrun".to_string()]);

        let path = handler
            .escalate(&state, Some(&review), None, "critical issues in self-review")
            .unwrap();
        let record = read_record(&path);
        assert_eq!(record.reason, EscalationReason::CriticalIssues);
        assert_eq!(
            record.rationale.as_deref(),
            Some("critical issues in self-review")
        );
    }

    #[test]
    fn test_low_confidence_reason_without_critical_issues() {
        let dir = tempdir().unwrap();
        let handler = EscalationHandler::new(dir.path());
        let state = WorkflowState::new("story-2");
        let review = self_review(0.5, vec![]);

        let path = handler
            .escalate(
                &state,
                Some(&review),
                None,
                "self-review confidence below threshold",
            )
            .unwrap();
        let record = read_record(&path);
        assert_eq!(record.reason, EscalationReason::LowConfidence);
    }

    #[test]
    fn test_record_snapshots_state() {
        let dir = tempdir().unwrap();
        let handler = EscalationHandler::new(dir.path());
        let mut state = WorkflowState::new("story-3");
        state.current_step = 11;

        let path = handler
            .escalate(&state, None, None, "independent review did not pass")
            .unwrap();
        let record = read_record(&path);
        assert_eq!(record.step, 11);
        assert_eq!(record.state.current_step, 11);
        assert_eq!(record.story_id, "story-3");
    }

    #[test]
    fn test_repeated_escalations_are_not_deduplicated() {
        let dir = tempdir().unwrap();
        let handler = EscalationHandler::new(dir.path());
        let state = WorkflowState::new("story-4");

        let first = handler
            .escalate_with_reason(&state, EscalationReason::TestFailures, "3 attempts", None, None)
            .unwrap();
        let second = handler
            .escalate_with_reason(&state, EscalationReason::TestFailures, "3 attempts", None, None)
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_explicit_reason_serializes_kebab_case() {
        let dir = tempdir().unwrap();
        let handler = EscalationHandler::new(dir.path());
        let state = WorkflowState::new("story-5");

        let path = handler
            .escalate_with_reason(&state, EscalationReason::CiFailures, "checks failed", None, None)
            .unwrap();
        let json = fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"ci-failures\""));
    }
}

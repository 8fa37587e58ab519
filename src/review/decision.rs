//! Decision synthesis: combine the self-review and the independent review
//! into a single gate verdict.
//!
//! The gate is a pure function over the two reports. Four rules are
//! evaluated in order and the first failing rule determines the outcome;
//! the weighted combined score is reporting-only and never gates.

use crate::review::report::{IndependentReviewReport, ReviewDecision, SelfReviewReport};
use serde::{Deserialize, Serialize};

/// Default minimum confidence either review must report for the gate to pass.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.85;

/// Weight of the self-review confidence in the combined score.
pub const SELF_REVIEW_WEIGHT: f64 = 0.3;
/// Weight of the independent overall score in the combined score.
pub const INDEPENDENT_REVIEW_WEIGHT: f64 = 0.7;

/// Outcome of the review gate, persisted with the workflow state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateDecision {
    pub verdict: ReviewDecision,
    pub rationale: String,
    /// `self.confidence * 0.3 + independent.overall_score() * 0.7`.
    pub combined_score: f64,
    /// Unweighted mean of the two confidences.
    pub combined_confidence: f64,
    pub self_review_passed: bool,
    pub independent_review_passed: bool,
    #[serde(default)]
    pub critical_issues: Vec<String>,
    #[serde(default)]
    pub fixable_issues: Vec<String>,
}

impl GateDecision {
    pub fn passed(&self) -> bool {
        self.verdict.is_pass()
    }
}

/// Evaluate the gate rules in order; the first failing rule decides.
///
/// 1. self-review confidence >= threshold
/// 2. no critical issues in the self-review
/// 3. independent decision == pass
/// 4. independent confidence >= threshold
pub fn decide(
    self_review: &SelfReviewReport,
    independent: &IndependentReviewReport,
    confidence_threshold: f64,
) -> GateDecision {
    let combined_score = self_review.confidence * SELF_REVIEW_WEIGHT
        + independent.overall_score() * INDEPENDENT_REVIEW_WEIGHT;
    let combined_confidence = (self_review.confidence + independent.confidence) / 2.0;

    let self_review_passed = self_review.confidence >= confidence_threshold
        && self_review.critical_issues.is_empty();
    let independent_review_passed = independent.decision.is_pass()
        && independent.confidence >= confidence_threshold;

    let critical_issues: Vec<String> = self_review
        .critical_issues
        .iter()
        .cloned()
        .chain(
            independent
                .findings
                .iter()
                .filter(|f| f.severity == "critical")
                .map(|f| f.detail.clone()),
        )
        .collect();
    let fixable_issues: Vec<String> = self_review
        .code_smells
        .iter()
        .map(|s| s.detail.clone())
        .chain(
            independent
                .findings
                .iter()
                .filter(|f| f.severity != "critical")
                .map(|f| f.detail.clone()),
        )
        .collect();

    let (verdict, rationale) = if self_review.confidence < confidence_threshold {
        (
            ReviewDecision::Fail,
            "self-review confidence below threshold".to_string(),
        )
    } else if !self_review.critical_issues.is_empty() {
        (
            ReviewDecision::Fail,
            "critical issues in self-review".to_string(),
        )
    } else if !independent.decision.is_pass() {
        (
            ReviewDecision::Fail,
            "independent review did not pass".to_string(),
        )
    } else if independent.confidence < confidence_threshold {
        (
            ReviewDecision::Fail,
            "independent review confidence below threshold".to_string(),
        )
    } else {
        (ReviewDecision::Pass, "all review gates passed".to_string())
    };

    GateDecision {
        verdict,
        rationale,
        combined_score,
        combined_confidence,
        self_review_passed,
        independent_review_passed,
        critical_issues,
        fixable_issues,
    }
}

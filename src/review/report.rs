//! Review report shapes produced by the implementer and the independent
//! reviewer, plus the shape validation the pipeline applies before trusting
//! them.
//!
//! Reports arrive from collaborators and are mostly opaque: the pipeline
//! reads only confidence, critical issues, the independent decision, and the
//! category sub-scores. Severity values are validated against a closed set;
//! smell *types* are an open set so that new categories never break the
//! pipeline (unknown types log a warning instead of failing).

use crate::errors::ReviewError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Smell severities the pipeline understands. Anything else is a hard
/// validation failure.
pub const KNOWN_SMELL_SEVERITIES: &[&str] = &["low", "medium", "high", "critical"];

/// Smell types the pipeline has seen before. Unknown types are accepted with
/// a warning so new categories roll out without a pipeline release.
pub const KNOWN_SMELL_TYPES: &[&str] = &[
    "duplication",
    "long-method",
    "large-module",
    "complex-conditional",
    "magic-number",
    "dead-code",
    "naming",
    "missing-error-handling",
];

/// One item of the implementer's self-assessment checklist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChecklistItem {
    pub item: String,
    pub passed: bool,
}

/// A code smell reported by the implementer's self-review.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeSmell {
    pub smell_type: String,
    pub severity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub detail: String,
}

/// The implementer's own assessment of its output before handoff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelfReviewReport {
    /// Certainty the work is acceptable, in `[0, 1]`. Out-of-range values
    /// are a validation failure, never silently clamped.
    pub confidence: f64,
    pub checklist: Vec<ChecklistItem>,
    #[serde(default)]
    pub code_smells: Vec<CodeSmell>,
    #[serde(default)]
    pub critical_issues: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl SelfReviewReport {
    /// Validate the report shape.
    ///
    /// Hard failures: empty checklist, confidence outside `[0, 1]`,
    /// unrecognized smell severity. Unrecognized smell types only warn.
    pub fn validate(&self) -> Result<(), ReviewError> {
        if self.checklist.is_empty() {
            return Err(ReviewError::EmptyChecklist);
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ReviewError::ConfidenceOutOfRange {
                role: "self-review",
                value: self.confidence,
            });
        }
        for smell in &self.code_smells {
            if !KNOWN_SMELL_SEVERITIES.contains(&smell.severity.as_str()) {
                return Err(ReviewError::UnknownSmellSeverity {
                    severity: smell.severity.clone(),
                });
            }
            if !KNOWN_SMELL_TYPES.contains(&smell.smell_type.as_str()) {
                warn!(
                    target: "conveyor::review",
                    smell_type = %smell.smell_type,
                    "unrecognized code smell type, accepting"
                );
            }
        }
        Ok(())
    }

    pub fn has_critical_issues(&self) -> bool {
        !self.critical_issues.is_empty()
    }
}

/// Verdict of the independent review, and of the combined decision gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Pass,
    #[default]
    Fail,
    Escalate,
}

impl ReviewDecision {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

impl fmt::Display for ReviewDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Escalate => "escalate",
        };
        write!(f, "{}", s)
    }
}

/// Category sub-scores of the independent review, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct CategoryScores {
    pub security: f64,
    pub quality: f64,
    pub test_validation: f64,
    pub architecture: f64,
}

impl CategoryScores {
    /// Weighted overall score:
    /// security 35%, quality 30%, test validation 25%, architecture 10%.
    pub fn overall(&self) -> f64 {
        self.security * 0.35
            + self.quality * 0.30
            + self.test_validation * 0.25
            + self.architecture * 0.10
    }

    fn validate(&self) -> Result<(), ReviewError> {
        for (category, value) in [
            ("security", self.security),
            ("quality", self.quality),
            ("test_validation", self.test_validation),
            ("architecture", self.architecture),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ReviewError::ScoreOutOfRange { category, value });
            }
        }
        Ok(())
    }
}

/// A single finding from the independent review.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewFindingItem {
    pub category: String,
    pub severity: String,
    pub detail: String,
}

/// The independent reviewer's synthesized report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndependentReviewReport {
    pub decision: ReviewDecision,
    pub confidence: f64,
    pub scores: CategoryScores,
    #[serde(default)]
    pub findings: Vec<ReviewFindingItem>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl IndependentReviewReport {
    /// Weighted overall score derived from the category sub-scores.
    pub fn overall_score(&self) -> f64 {
        self.scores.overall()
    }

    /// Validate the report shape: confidence and all sub-scores in `[0, 1]`.
    pub fn validate(&self) -> Result<(), ReviewError> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ReviewError::ConfidenceOutOfRange {
                role: "independent review",
                value: self.confidence,
            });
        }
        self.scores.validate()
    }
}

/// Result of the reviewer's security pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityReview {
    pub score: f64,
    #[serde(default)]
    pub findings: Vec<ReviewFindingItem>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Result of the reviewer's code quality pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityAnalysis {
    pub score: f64,
    #[serde(default)]
    pub findings: Vec<ReviewFindingItem>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Result of the reviewer's test validation pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestValidation {
    pub score: f64,
    pub coverage_adequate: bool,
    #[serde(default)]
    pub findings: Vec<ReviewFindingItem>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_self_review() -> SelfReviewReport {
        SelfReviewReport {
            confidence: 0.9,
            checklist: vec![ChecklistItem {
                item: "All acceptance criteria covered".to_string(),
                passed: true,
            }],
            code_smells: vec![],
            critical_issues: vec![],
            recommendations: vec![],
        }
    }

    // ── SelfReviewReport validation ──────────────────────────────────

    #[test]
    fn test_valid_self_review_passes() {
        assert!(valid_self_review().validate().is_ok());
    }

    #[test]
    fn test_empty_checklist_is_hard_failure() {
        let mut report = valid_self_review();
        report.checklist.clear();
        assert!(matches!(
            report.validate(),
            Err(ReviewError::EmptyChecklist)
        ));
    }

    #[test]
    fn test_confidence_above_one_is_hard_failure() {
        let mut report = valid_self_review();
        report.confidence = 1.2;
        assert!(matches!(
            report.validate(),
            Err(ReviewError::ConfidenceOutOfRange { .. })
        ));
    }

    #[test]
    fn test_negative_confidence_is_hard_failure() {
        let mut report = valid_self_review();
        report.confidence = -0.1;
        assert!(report.validate().is_err());
    }

    #[test]
    fn test_confidence_boundaries_are_valid() {
        let mut report = valid_self_review();
        report.confidence = 0.0;
        assert!(report.validate().is_ok());
        report.confidence = 1.0;
        assert!(report.validate().is_ok());
    }

    #[test]
    fn test_unknown_smell_severity_is_hard_failure() {
        let mut report = valid_self_review();
        report.code_smells.push(CodeSmell {
            smell_type: "duplication".to_string(),
            severity: "catastrophic".to_string(),
            file: None,
            detail: "copy paste".to_string(),
        });
        assert!(matches!(
            report.validate(),
            Err(ReviewError::UnknownSmellSeverity { .. })
        ));
    }

    #[test]
    fn test_unknown_smell_type_is_only_a_warning() {
        let mut report = valid_self_review();
        report.code_smells.push(CodeSmell {
            smell_type: "quantum-entanglement".to_string(),
            severity: "low".to_string(),
            file: Some("src/lib.rs".to_string()),
            detail: "novel smell category".to_string(),
        });
        // Forward compatible: new smell categories must not break the pipeline.
        assert!(report.validate().is_ok());
    }

    #[test]
    fn test_critical_issues_do_not_fail_validation() {
        let mut report = valid_self_review();
        report.critical_issues.push("SQL injection in query builder".to_string());
        assert!(report.validate().is_ok());
        assert!(report.has_critical_issues());
    }

    // ── CategoryScores / IndependentReviewReport ─────────────────────

    #[test]
    fn test_overall_score_weighting() {
        let scores = CategoryScores {
            security: 1.0,
            quality: 1.0,
            test_validation: 1.0,
            architecture: 1.0,
        };
        assert!((scores.overall() - 1.0).abs() < 1e-9);

        let scores = CategoryScores {
            security: 0.8,
            quality: 0.6,
            test_validation: 0.4,
            architecture: 0.2,
        };
        let expected = 0.8 * 0.35 + 0.6 * 0.30 + 0.4 * 0.25 + 0.2 * 0.10;
        assert!((scores.overall() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_independent_report_validates_confidence() {
        let report = IndependentReviewReport {
            decision: ReviewDecision::Pass,
            confidence: 1.5,
            scores: CategoryScores::default(),
            findings: vec![],
            recommendations: vec![],
        };
        assert!(matches!(
            report.validate(),
            Err(ReviewError::ConfidenceOutOfRange { .. })
        ));
    }

    #[test]
    fn test_independent_report_validates_sub_scores() {
        let report = IndependentReviewReport {
            decision: ReviewDecision::Pass,
            confidence: 0.9,
            scores: CategoryScores {
                security: 0.9,
                quality: 2.0,
                test_validation: 0.9,
                architecture: 0.9,
            },
            findings: vec![],
            recommendations: vec![],
        };
        assert!(matches!(
            report.validate(),
            Err(ReviewError::ScoreOutOfRange {
                category: "quality",
                ..
            })
        ));
    }

    #[test]
    fn test_review_decision_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&ReviewDecision::Escalate).unwrap(),
            "\"escalate\""
        );
        let decision: ReviewDecision = serde_json::from_str("\"pass\"").unwrap();
        assert!(decision.is_pass());
    }

    #[test]
    fn test_self_review_deserialize_with_defaults() {
        let json = r#"{
            "confidence": 0.85,
            "checklist": [{"item": "tests pass", "passed": true}]
        }"#;
        let report: SelfReviewReport = serde_json::from_str(json).unwrap();
        assert!(report.code_smells.is_empty());
        assert!(report.critical_issues.is_empty());
        assert!(report.validate().is_ok());
    }
}

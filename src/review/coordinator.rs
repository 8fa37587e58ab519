//! Dual-agent review coordination: self-review, independent review, then
//! decision synthesis, with phase timing and finding aggregation.
//!
//! The orchestrator drives the three stages as discrete checkpointed steps
//! through [`ReviewCoordinator::run_self_review`],
//! [`ReviewCoordinator::run_independent_review`] and
//! [`ReviewCoordinator::conclude`]; [`ReviewCoordinator::execute`] composes
//! all three for direct library use.

use crate::collaborators::{Implementer, ReviewerFactory};
use crate::metrics::MetricsTracker;
use crate::models::{ImplementationArtifact, StoryContext, TestArtifact};
use crate::retry::RetryPolicy;
use crate::review::decision::{self, GateDecision};
use crate::review::independent::IndependentReviewExecutor;
use crate::review::report::{IndependentReviewReport, SelfReviewReport};
use crate::review::self_review::SelfReviewExecutor;
use crate::state::AgentActivity;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashSet;

/// Where an aggregated finding originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingSource {
    SelfReview,
    IndependentReview,
}

/// One deduplicated finding from either review pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedFinding {
    pub source: FindingSource,
    pub category: String,
    pub severity: String,
    pub detail: String,
}

/// Everything the dual review produced, returned as one value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CombinedReviewResult {
    pub self_review: SelfReviewReport,
    pub independent_review: IndependentReviewReport,
    pub decision: GateDecision,
    pub findings: Vec<AggregatedFinding>,
    pub recommendations: Vec<String>,
    /// Stage durations in milliseconds, keyed by stage name.
    #[serde(default)]
    pub phase_metrics: BTreeMap<String, u64>,
}

/// Sequences the self-review, the independent review and the decision gate.
#[derive(Debug, Clone)]
pub struct ReviewCoordinator {
    self_review: SelfReviewExecutor,
    independent: IndependentReviewExecutor,
    confidence_threshold: f64,
}

impl ReviewCoordinator {
    pub fn new(
        agent_retry: RetryPolicy,
        reviewer_retry: RetryPolicy,
        confidence_threshold: f64,
        graceful_degradation: bool,
    ) -> Self {
        Self {
            self_review: SelfReviewExecutor::new(agent_retry),
            independent: IndependentReviewExecutor::new(reviewer_retry, graceful_degradation),
            confidence_threshold,
        }
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    /// Stage 1: the implementer's self-assessment.
    pub async fn run_self_review(
        &self,
        implementer: &dyn Implementer,
        implementation: &ImplementationArtifact,
        tests: &TestArtifact,
        context: &StoryContext,
    ) -> Result<SelfReviewReport> {
        self.self_review
            .execute(implementer, implementation, tests, context)
            .await
    }

    /// Stage 2: the secondary reviewer, with graceful degradation.
    pub async fn run_independent_review(
        &self,
        factory: &dyn ReviewerFactory,
        implementation: &ImplementationArtifact,
        tests: &TestArtifact,
        context: &StoryContext,
        self_review: &SelfReviewReport,
        activity: &mut AgentActivity,
    ) -> Result<IndependentReviewReport> {
        self.independent
            .execute(factory, implementation, tests, context, self_review, activity)
            .await
    }

    /// Stage 3: decision synthesis plus finding/recommendation aggregation.
    /// Pure; never fails.
    pub fn conclude(
        &self,
        self_review: SelfReviewReport,
        independent_review: IndependentReviewReport,
    ) -> CombinedReviewResult {
        let decision = decision::decide(
            &self_review,
            &independent_review,
            self.confidence_threshold,
        );
        let findings = aggregate_findings(&self_review, &independent_review);
        let recommendations = dedup_preserving_order(
            self_review
                .recommendations
                .iter()
                .chain(independent_review.recommendations.iter()),
        );
        CombinedReviewResult {
            self_review,
            independent_review,
            decision,
            findings,
            recommendations,
            phase_metrics: BTreeMap::new(),
        }
    }

    /// Run all three stages in sequence.
    ///
    /// Any sub-executor failure aborts the coordinator and propagates with a
    /// coordinator-level message; the total timer is stopped before rethrow
    /// so duration data is never lost on failure.
    pub async fn execute(
        &self,
        implementer: &dyn Implementer,
        factory: &dyn ReviewerFactory,
        implementation: &ImplementationArtifact,
        tests: &TestArtifact,
        context: &StoryContext,
        reviewer_activity: &mut AgentActivity,
    ) -> Result<CombinedReviewResult> {
        let mut metrics = MetricsTracker::new();
        metrics.start("total");

        metrics.start("self_review");
        let self_review = match self
            .run_self_review(implementer, implementation, tests, context)
            .await
        {
            Ok(report) => report,
            Err(err) => {
                metrics.stop("total");
                return Err(err).context("Dual-agent review aborted during self-review");
            }
        };
        metrics.stop("self_review");

        metrics.start("independent_review");
        let independent_review = match self
            .run_independent_review(
                factory,
                implementation,
                tests,
                context,
                &self_review,
                reviewer_activity,
            )
            .await
        {
            Ok(report) => report,
            Err(err) => {
                metrics.stop("total");
                return Err(err).context("Dual-agent review aborted during independent review");
            }
        };
        metrics.stop("independent_review");

        metrics.start("decision");
        let mut result = self.conclude(self_review, independent_review);
        metrics.stop("decision");
        metrics.stop("total");

        result.phase_metrics = metrics.summary();
        Ok(result)
    }
}

/// Union of self-review code smells (as quality findings), self-review
/// critical issues (as critical findings) and all independent findings,
/// deduplicated on (category, detail) preserving first occurrence.
fn aggregate_findings(
    self_review: &SelfReviewReport,
    independent: &IndependentReviewReport,
) -> Vec<AggregatedFinding> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut findings = Vec::new();

    let candidates = self_review
        .code_smells
        .iter()
        .map(|smell| AggregatedFinding {
            source: FindingSource::SelfReview,
            category: "quality".to_string(),
            severity: smell.severity.clone(),
            detail: smell.detail.clone(),
        })
        .chain(self_review.critical_issues.iter().map(|issue| {
            AggregatedFinding {
                source: FindingSource::SelfReview,
                category: "critical".to_string(),
                severity: "critical".to_string(),
                detail: issue.clone(),
            }
        }))
        .chain(independent.findings.iter().map(|finding| {
            AggregatedFinding {
                source: FindingSource::IndependentReview,
                category: finding.category.clone(),
                severity: finding.severity.clone(),
                detail: finding.detail.clone(),
            }
        }));

    for finding in candidates {
        if seen.insert((finding.category.clone(), finding.detail.clone())) {
            findings.push(finding);
        }
    }
    findings
}

/// Exact string duplicates removed, order otherwise preserved.
fn dedup_preserving_order<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .filter(|item| seen.insert(item.as_str().to_string()))
        .cloned()
        .collect()
}

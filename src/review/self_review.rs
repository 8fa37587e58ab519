//! Self-review executor: the implementer's own assessment of its output.

use crate::collaborators::Implementer;
use crate::models::{ImplementationArtifact, StoryContext, TestArtifact};
use crate::retry::RetryPolicy;
use crate::review::report::SelfReviewReport;
use anyhow::{Context, Result};
use tracing::{info, warn};

/// Invokes the implementer's self-assessment capability and validates the
/// shape of the returned report.
///
/// Critical issues in the report are recorded but never thrown here; they
/// are surfaced to the decision gate.
#[derive(Debug, Clone)]
pub struct SelfReviewExecutor {
    retry: RetryPolicy,
}

impl SelfReviewExecutor {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Run the self-review. Fails if the implementer call fails after
    /// retries or the report fails shape validation.
    pub async fn execute(
        &self,
        implementer: &dyn Implementer,
        implementation: &ImplementationArtifact,
        tests: &TestArtifact,
        context: &StoryContext,
    ) -> Result<SelfReviewReport> {
        let report = self
            .retry
            .run("self-review", || {
                implementer.review_code(implementation, tests, context)
            })
            .await
            .context("Implementer self-review failed after retries")?;

        report.validate().context("Self-review report failed shape validation")?;

        if report.has_critical_issues() {
            warn!(
                target: "conveyor::review",
                count = report.critical_issues.len(),
                "self-review reported critical issues"
            );
        }
        info!(
            target: "conveyor::review",
            confidence = report.confidence,
            smells = report.code_smells.len(),
            "self-review complete"
        );
        Ok(report)
    }
}

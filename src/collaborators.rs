//! Trait seams for the external collaborators the pipeline drives.
//!
//! The orchestrator depends only on these interfaces, so every collaborator
//! can be substituted for testing. Implementations live in host processes;
//! the only one bundled with this crate is the GitHub PR provider in
//! [`crate::github`].

use crate::models::{
    CheckRun, ImplementationArtifact, PrResult, StoryContext, StoryRef, TestArtifact,
    TestRunSummary, Worktree,
};
use crate::review::report::{
    IndependentReviewReport, QualityAnalysis, SecurityReview, SelfReviewReport, TestValidation,
};
use crate::state::AgentRole;
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Assembles the task context fed to the implementer.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn generate_context(&self, story: &StoryRef) -> Result<StoryContext>;
}

/// Creates and destroys the isolated checkout a story runs in.
#[async_trait]
pub trait WorktreeProvider: Send + Sync {
    async fn create(&self, story_id: &str) -> Result<Worktree>;

    /// Idempotent; the pipeline treats failures here as non-fatal.
    async fn destroy(&self, story_id: &str) -> Result<()>;
}

/// Issues agent handles. The orchestrator records the returned id for later
/// reference but never tears agents down itself; that belongs to the pool.
#[async_trait]
pub trait AgentPool: Send + Sync {
    async fn create_agent(&self, role: AgentRole, task: &str) -> Result<String>;
}

/// Capability set of the implementer role.
#[async_trait]
pub trait Implementer: Send + Sync {
    async fn implement(&self, context: &StoryContext) -> Result<ImplementationArtifact>;

    async fn write_tests(
        &self,
        implementation: &ImplementationArtifact,
        context: &StoryContext,
    ) -> Result<TestArtifact>;

    async fn review_code(
        &self,
        implementation: &ImplementationArtifact,
        tests: &TestArtifact,
        context: &StoryContext,
    ) -> Result<SelfReviewReport>;

    async fn fix_failing_tests(
        &self,
        context: &StoryContext,
        failures: &TestRunSummary,
    ) -> Result<ImplementationArtifact>;
}

/// Capability set of the independent reviewer role.
#[async_trait]
pub trait Reviewer: Send + Sync {
    async fn review_security(
        &self,
        implementation: &ImplementationArtifact,
        context: &StoryContext,
    ) -> Result<SecurityReview>;

    async fn analyze_quality(
        &self,
        implementation: &ImplementationArtifact,
        context: &StoryContext,
    ) -> Result<QualityAnalysis>;

    async fn validate_tests(
        &self,
        implementation: &ImplementationArtifact,
        tests: &TestArtifact,
        context: &StoryContext,
    ) -> Result<TestValidation>;

    /// Fold the three category results into one synthesized report.
    async fn generate_report(
        &self,
        security: &SecurityReview,
        quality: &QualityAnalysis,
        test_validation: &TestValidation,
        self_review: &SelfReviewReport,
    ) -> Result<IndependentReviewReport>;
}

/// Constructs the independent reviewer. Construction failure triggers
/// graceful degradation when enabled.
#[async_trait]
pub trait ReviewerFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn Reviewer>>;
}

/// Executes the story's test suite inside the worktree.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run_tests(&self, worktree: &Path) -> Result<TestRunSummary>;
}

/// Pull-request hosting operations the pipeline invokes.
#[async_trait]
pub trait PrProvider: Send + Sync {
    async fn create_pr(&self, branch: &str, title: &str, body: &str) -> Result<PrResult>;

    async fn list_checks(&self, commit_sha: &str) -> Result<Vec<CheckRun>>;

    async fn merge(&self, pr_number: u64) -> Result<()>;

    /// Best-effort; callers log failures and continue.
    async fn delete_branch(&self, branch: &str) -> Result<()>;
}

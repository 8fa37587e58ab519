//! Shared data types exchanged between the pipeline and its collaborators.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A unit of work the pipeline processes end-to-end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoryRef {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl StoryRef {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Task context assembled for the implementer before any code is written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoryContext {
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub token_count: u64,
}

/// An isolated checkout owned by exactly one story run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Worktree {
    pub path: std::path::PathBuf,
    pub branch: String,
}

/// One file produced or modified by an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileChange {
    /// Path relative to the worktree root.
    pub path: String,
    pub content: String,
}

/// Output of the implement phase: a summary plus the concrete file set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImplementationArtifact {
    pub summary: String,
    #[serde(default)]
    pub files: Vec<FileChange>,
}

/// Output of the test-generation phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestArtifact {
    pub summary: String,
    #[serde(default)]
    pub files: Vec<FileChange>,
}

/// Result of one test-suite execution inside the worktree.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestRunSummary {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    /// Names of failing tests, for the fix prompt and error messages.
    #[serde(default)]
    pub failing: Vec<String>,
}

impl TestRunSummary {
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Lifecycle state of a pull request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    #[default]
    Open,
    Merged,
    Closed,
}

impl fmt::Display for PrState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Merged => "merged",
            Self::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// A created pull request. Immutable after creation except for `state`,
/// which the CI monitor advances on merge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrResult {
    pub url: String,
    pub number: u64,
    pub title: String,
    pub body: String,
    pub base_branch: String,
    pub head_branch: String,
    /// Head commit the CI check runs are attached to.
    pub head_sha: String,
    pub state: PrState,
    pub auto_merge: bool,
}

/// Execution status of one CI check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Queued,
    InProgress,
    Completed,
}

/// Terminal conclusion of a completed check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    Success,
    Failure,
    Neutral,
    Cancelled,
    Skipped,
    TimedOut,
    ActionRequired,
}

/// One CI check run attached to a commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckRun {
    pub name: String,
    pub status: CheckStatus,
    #[serde(default)]
    pub conclusion: Option<CheckConclusion>,
}

impl CheckRun {
    /// A check counts as failing once it has completed with a failure or
    /// cancellation conclusion. In-flight checks are never failing.
    pub fn is_failing(&self) -> bool {
        self.status == CheckStatus::Completed
            && matches!(
                self.conclusion,
                Some(CheckConclusion::Failure) | Some(CheckConclusion::Cancelled)
            )
    }

    pub fn is_completed(&self) -> bool {
        self.status == CheckStatus::Completed
    }
}

/// Sprint-board status values the orchestrator writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SprintStatus {
    InProgress,
    Review,
    Done,
}

impl fmt::Display for SprintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InProgress => "in-progress",
            Self::Review => "review",
            Self::Done => "done",
        };
        write!(f, "{}", s)
    }
}

/// CI status summary carried on the workflow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiStatus {
    Pending,
    Running,
    Passed,
    Failed,
}

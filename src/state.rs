//! Persisted workflow state: the unit of progress for one story.
//!
//! `WorkflowState` is the only entity written to durable storage. It is
//! checkpointed after every step via [`StateStore`] using a
//! write-temp-then-rename strategy, so a concurrent reader never observes a
//! partially written file. Reloading the state and re-entering the pipeline
//! skips every step below `current_step`; that field is the sole resume
//! marker and only ever increases.

use crate::models::{
    CiStatus, ImplementationArtifact, PrResult, PrState, StoryContext, TestArtifact,
    TestRunSummary, Worktree,
};
use crate::review::decision::GateDecision;
use crate::review::report::{IndependentReviewReport, SelfReviewReport};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Overall status of one story's pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    #[default]
    Running,
    /// Parked by the host process; the core never sets this itself.
    Paused,
    Completed,
    Error,
}

/// Agent roles the pipeline tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Implementer,
    Reviewer,
}

/// Lifecycle status of one agent role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    #[default]
    Idle,
    Implementing,
    Testing,
    Reviewing,
    Completed,
    Failed,
}

impl AgentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Per-role lifecycle tracker. Transitions are forward-only; the end
/// timestamp is set exactly once, by [`AgentActivity::finish`], which the
/// pipeline calls on a path that always runs regardless of step success.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentActivity {
    pub status: AgentState,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Opaque pool-issued handle, kept for later reference only; teardown
    /// belongs to the pool's own lifecycle.
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AgentActivity {
    pub fn idle() -> Self {
        Self::default()
    }

    /// Mark the role active, recording the start timestamp on first call.
    pub fn begin(&mut self, state: AgentState, agent_id: Option<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = state;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if agent_id.is_some() {
            self.agent_id = agent_id;
        }
    }

    /// Move the role forward to a new active state.
    pub fn advance(&mut self, state: AgentState) {
        if !self.status.is_terminal() {
            self.status = state;
        }
    }

    /// Terminate the activity. The end timestamp is set exactly once;
    /// repeated calls are no-ops.
    pub fn finish(&mut self, success: bool, error: Option<String>) {
        if self.ended_at.is_some() {
            return;
        }
        self.ended_at = Some(Utc::now());
        self.status = if success {
            AgentState::Completed
        } else {
            AgentState::Failed
        };
        self.error = error;
    }
}

/// Activity records for the two agent roles.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentActivitySet {
    pub implementer: AgentActivity,
    pub reviewer: AgentActivity,
}

/// Aggregate of both review passes. Mutated only by the review phase (via
/// the decision step output); never read before that phase runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReviewStatus {
    pub self_review_passed: bool,
    pub independent_review_passed: bool,
    pub combined_confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_issues: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixable_issues: Option<Vec<String>>,
}

/// Typed step outputs, one optional field per pipeline phase.
///
/// This replaces the original free-form variable bag with a closed set of
/// typed slots; a step closure returns [`StepOutput`] values and the merge
/// routes each into its slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepOutputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<StoryContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<ImplementationArtifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<TestArtifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_run: Option<TestRunSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_review: Option<SelfReviewReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub independent_review: Option<IndependentReviewReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<GateDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr: Option<PrResult>,
}

/// One result produced by a step closure, merged into the state by
/// [`WorkflowState::apply`]. Agent lifecycle markers travel the same channel
/// so that resume skips the bookkeeping together with the step that
/// produced it.
#[derive(Debug, Clone)]
pub enum StepOutput {
    Context(StoryContext),
    Worktree(Worktree),
    ImplementerStarted { agent_id: String },
    ImplementerTesting,
    Implementation(ImplementationArtifact),
    Tests(TestArtifact),
    TestRun(TestRunSummary),
    SelfReview(SelfReviewReport),
    IndependentReview {
        report: IndependentReviewReport,
        activity: AgentActivity,
    },
    Decision(GateDecision),
    Pr(PrResult),
    CiResult { status: CiStatus, merged: bool },
}

/// The persisted unit of progress for one story.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowState {
    pub story_id: String,
    /// 1-based number of the next step to run; the sole resume marker.
    pub current_step: u32,
    pub status: WorkflowStatus,
    pub outputs: StepOutputs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub agents: AgentActivitySet,
    pub review_status: ReviewStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_status: Option<CiStatus>,
    /// Named step durations in milliseconds.
    #[serde(default)]
    pub metrics: BTreeMap<String, u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    /// Fresh state at step 1 with both agent roles idle.
    pub fn new(story_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            story_id: story_id.into(),
            current_step: 1,
            status: WorkflowStatus::Running,
            outputs: StepOutputs::default(),
            worktree_path: None,
            branch: None,
            agents: AgentActivitySet::default(),
            review_status: ReviewStatus::default(),
            pr_url: None,
            ci_status: None,
            metrics: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn record_metric(&mut self, name: &str, millis: u64) {
        self.metrics.insert(name.to_string(), millis);
    }

    /// Merge one step output into the state.
    pub fn apply(&mut self, output: StepOutput) {
        match output {
            StepOutput::Context(ctx) => self.outputs.context = Some(ctx),
            StepOutput::Worktree(wt) => {
                self.worktree_path = Some(wt.path);
                self.branch = Some(wt.branch);
            }
            StepOutput::ImplementerStarted { agent_id } => {
                self.agents
                    .implementer
                    .begin(AgentState::Implementing, Some(agent_id));
            }
            StepOutput::ImplementerTesting => {
                self.agents.implementer.advance(AgentState::Testing);
            }
            StepOutput::Implementation(artifact) => self.outputs.implementation = Some(artifact),
            StepOutput::Tests(artifact) => self.outputs.tests = Some(artifact),
            StepOutput::TestRun(summary) => self.outputs.test_run = Some(summary),
            StepOutput::SelfReview(report) => {
                self.agents.implementer.advance(AgentState::Reviewing);
                self.outputs.self_review = Some(report);
            }
            StepOutput::IndependentReview { report, activity } => {
                self.agents.reviewer = activity;
                self.outputs.independent_review = Some(report);
            }
            StepOutput::Decision(gate) => {
                self.review_status = ReviewStatus {
                    self_review_passed: gate.self_review_passed,
                    independent_review_passed: gate.independent_review_passed,
                    combined_confidence: gate.combined_confidence,
                    critical_issues: if gate.critical_issues.is_empty() {
                        None
                    } else {
                        Some(gate.critical_issues.clone())
                    },
                    fixable_issues: if gate.fixable_issues.is_empty() {
                        None
                    } else {
                        Some(gate.fixable_issues.clone())
                    },
                };
                self.outputs.decision = Some(gate);
            }
            StepOutput::Pr(pr) => {
                self.pr_url = Some(pr.url.clone());
                self.outputs.pr = Some(pr);
            }
            StepOutput::CiResult { status, merged } => {
                self.ci_status = Some(status);
                if merged && let Some(pr) = self.outputs.pr.as_mut() {
                    pr.state = PrState::Merged;
                }
            }
        }
    }
}

/// Durable storage for workflow state, one JSON file per story.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    pub fn state_path(&self, story_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", story_id))
    }

    /// Serialize the state atomically: write `<path>.tmp`, then rename over
    /// `<path>`, so a concurrent reader sees either the fully-old or the
    /// fully-new content.
    pub fn checkpoint(&self, state: &WorkflowState) -> Result<()> {
        fs::create_dir_all(&self.dir).context("Failed to create state directory")?;
        let path = self.state_path(&state.story_id);
        let tmp = path.with_extension("json.tmp");
        let json =
            serde_json::to_vec_pretty(state).context("Failed to serialize workflow state")?;
        fs::write(&tmp, json).context("Failed to write state temp file")?;
        fs::rename(&tmp, &path).context("Failed to rename state temp file into place")?;
        debug!(
            target: "conveyor::state",
            story_id = %state.story_id,
            step = state.current_step,
            "checkpointed"
        );
        Ok(())
    }

    /// Load a persisted state by story id.
    pub fn load(&self, story_id: &str) -> Result<WorkflowState> {
        let path = self.state_path(story_id);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read state file {}", path.display()))?;
        serde_json::from_str(&json).context("Failed to parse workflow state")
    }

    /// Load the persisted state, or construct a fresh one on any read or
    /// parse failure (including "not found").
    pub fn load_or_init(&self, story_id: &str) -> WorkflowState {
        match self.load(story_id) {
            Ok(state) => {
                info!(
                    target: "conveyor::state",
                    story_id,
                    step = state.current_step,
                    "resuming from checkpoint"
                );
                state
            }
            Err(err) => {
                debug!(target: "conveyor::state", story_id, %err, "no resumable state, starting fresh");
                WorkflowState::new(story_id)
            }
        }
    }

    /// Remove the state file. Best-effort: failures are logged, not raised.
    pub fn delete(&self, story_id: &str) {
        let path = self.state_path(story_id);
        if path.exists()
            && let Err(err) = fs::remove_file(&path)
        {
            warn!(target: "conveyor::state", story_id, %err, "failed to delete state file");
        }
    }

    /// Externally reset a story, clearing its persisted state so a halted
    /// pipeline can run again from step 1.
    pub fn reset(&self, story_id: &str) -> Result<()> {
        let path = self.state_path(story_id);
        if path.exists() {
            fs::remove_file(&path).context("Failed to remove state file")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_store() -> (StateStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        (StateStore::new(dir.path()), dir)
    }

    // ── AgentActivity lifecycle ──────────────────────────────────────

    #[test]
    fn test_activity_begin_sets_start_once() {
        let mut activity = AgentActivity::idle();
        activity.begin(AgentState::Implementing, Some("agent-1".to_string()));
        let first_start = activity.started_at;
        assert!(first_start.is_some());
        assert_eq!(activity.agent_id.as_deref(), Some("agent-1"));

        activity.begin(AgentState::Testing, None);
        assert_eq!(activity.started_at, first_start);
        assert_eq!(activity.status, AgentState::Testing);
    }

    #[test]
    fn test_activity_finish_sets_end_exactly_once() {
        let mut activity = AgentActivity::idle();
        activity.begin(AgentState::Reviewing, None);
        activity.finish(true, None);
        let first_end = activity.ended_at;
        assert!(first_end.is_some());
        assert_eq!(activity.status, AgentState::Completed);

        // Second finish must be a no-op, even with different arguments.
        activity.finish(false, Some("late error".to_string()));
        assert_eq!(activity.ended_at, first_end);
        assert_eq!(activity.status, AgentState::Completed);
        assert!(activity.error.is_none());
    }

    #[test]
    fn test_activity_finish_failure_records_error() {
        let mut activity = AgentActivity::idle();
        activity.begin(AgentState::Implementing, None);
        activity.finish(false, Some("model call failed".to_string()));
        assert_eq!(activity.status, AgentState::Failed);
        assert_eq!(activity.error.as_deref(), Some("model call failed"));
    }

    #[test]
    fn test_activity_no_advance_past_terminal() {
        let mut activity = AgentActivity::idle();
        activity.begin(AgentState::Implementing, None);
        activity.finish(true, None);
        activity.advance(AgentState::Testing);
        assert_eq!(activity.status, AgentState::Completed);
    }

    // ── WorkflowState::apply ─────────────────────────────────────────

    #[test]
    fn test_apply_worktree_sets_fields() {
        let mut state = WorkflowState::new("story-1");
        state.apply(StepOutput::Worktree(Worktree {
            path: PathBuf::from("/tmp/wt"),
            branch: "conveyor/story-1".to_string(),
        }));
        assert_eq!(state.worktree_path.as_deref(), Some(std::path::Path::new("/tmp/wt")));
        assert_eq!(state.branch.as_deref(), Some("conveyor/story-1"));
    }

    #[test]
    fn test_apply_implementer_lifecycle_markers() {
        let mut state = WorkflowState::new("story-1");
        state.apply(StepOutput::ImplementerStarted {
            agent_id: "agent-9".to_string(),
        });
        assert_eq!(state.agents.implementer.status, AgentState::Implementing);
        assert_eq!(state.agents.implementer.agent_id.as_deref(), Some("agent-9"));

        state.apply(StepOutput::ImplementerTesting);
        assert_eq!(state.agents.implementer.status, AgentState::Testing);
    }

    #[test]
    fn test_apply_ci_result_marks_pr_merged() {
        let mut state = WorkflowState::new("story-1");
        state.apply(StepOutput::Pr(PrResult {
            url: "https://github.com/o/r/pull/3".to_string(),
            number: 3,
            title: "t".to_string(),
            body: "b".to_string(),
            base_branch: "main".to_string(),
            head_branch: "conveyor/story-1".to_string(),
            head_sha: "sha".to_string(),
            state: PrState::Open,
            auto_merge: true,
        }));
        assert_eq!(state.pr_url.as_deref(), Some("https://github.com/o/r/pull/3"));

        state.apply(StepOutput::CiResult {
            status: CiStatus::Passed,
            merged: true,
        });
        assert_eq!(state.ci_status, Some(CiStatus::Passed));
        assert_eq!(state.outputs.pr.as_ref().unwrap().state, PrState::Merged);
    }

    // ── StateStore ───────────────────────────────────────────────────

    #[test]
    fn test_checkpoint_and_load_roundtrip() {
        let (store, _dir) = make_store();
        let mut state = WorkflowState::new("story-7");
        state.current_step = 5;
        state.record_metric("implementation", 1234);
        store.checkpoint(&state).unwrap();

        let loaded = store.load("story-7").unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_load_or_init_fresh_when_missing() {
        let (store, _dir) = make_store();
        let state = store.load_or_init("new-story");
        assert_eq!(state.current_step, 1);
        assert_eq!(state.status, WorkflowStatus::Running);
        assert_eq!(state.agents.implementer.status, AgentState::Idle);
        assert_eq!(state.agents.reviewer.status, AgentState::Idle);
        assert!(state.metrics.is_empty());
    }

    #[test]
    fn test_load_or_init_fresh_on_corrupt_file() {
        let (store, _dir) = make_store();
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.state_path("story-x"), "{not json").unwrap();
        let state = store.load_or_init("story-x");
        assert_eq!(state.current_step, 1);
    }

    #[test]
    fn test_partial_temp_write_never_corrupts_state() {
        let (store, _dir) = make_store();
        let mut state = WorkflowState::new("story-9");
        state.current_step = 8;
        store.checkpoint(&state).unwrap();

        // Simulate a crash mid-write of the temp file.
        let tmp = store.state_path("story-9").with_extension("json.tmp");
        fs::write(&tmp, "{\"story_id\": \"story-9\", \"current").unwrap();

        let loaded = store.load_or_init("story-9");
        assert_eq!(loaded.current_step, 8);
    }

    #[test]
    fn test_delete_is_silent_when_missing() {
        let (store, _dir) = make_store();
        store.delete("ghost");
    }

    #[test]
    fn test_reset_allows_fresh_run() {
        let (store, _dir) = make_store();
        let mut state = WorkflowState::new("story-3");
        state.status = WorkflowStatus::Error;
        state.current_step = 6;
        store.checkpoint(&state).unwrap();

        store.reset("story-3").unwrap();
        let fresh = store.load_or_init("story-3");
        assert_eq!(fresh.current_step, 1);
        assert_eq!(fresh.status, WorkflowStatus::Running);
    }

    #[test]
    fn test_recovery_after_restart() {
        let dir = tempdir().unwrap();
        {
            let store = StateStore::new(dir.path());
            let mut state = WorkflowState::new("story-5");
            state.current_step = 10;
            store.checkpoint(&state).unwrap();
        }
        {
            let store = StateStore::new(dir.path());
            let state = store.load_or_init("story-5");
            assert_eq!(state.current_step, 10);
        }
    }
}

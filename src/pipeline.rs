//! Top-level workflow orchestration: the fixed 14-step story pipeline.
//!
//! Step topology:
//!
//! 1. context-generation
//! 2. worktree-creation
//! 3. implement, 4. apply-code, 5. write-tests, 6. apply-tests
//! 7. run-tests, 8. fix-failing-tests (only if step 7 reported failures)
//! 9. self-review, 10. independent-review, 11. review-decision
//! 12. create-PR
//! 13. monitor-CI-and-merge (only if auto-merge is configured)
//! 14. cleanup
//!
//! Every step runs under the resume guard of [`StepExecutor`], so a
//! restarted process re-enters the pipeline exactly where the last
//! checkpoint left it. Step 11 is the sole branch point: a non-pass verdict
//! records an escalation and halts the pipeline before PR creation.

use crate::ci::CiMonitor;
use crate::collaborators::{
    AgentPool, ContextProvider, Implementer, PrProvider, ReviewerFactory, TestRunner,
    WorktreeProvider,
};
use crate::config::PipelineConfig;
use crate::errors::{CiError, PipelineError};
use crate::escalation::{EscalationHandler, EscalationReason};
use crate::models::{CiStatus, FileChange, SprintStatus, StoryRef};
use crate::review::ReviewCoordinator;
use crate::sprint::SprintTracker;
use crate::state::{
    AgentActivity, AgentRole, StateStore, StepOutput, WorkflowState, WorkflowStatus,
};
use crate::step::StepExecutor;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// The external collaborators one orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub context: Arc<dyn ContextProvider>,
    pub worktrees: Arc<dyn WorktreeProvider>,
    pub agents: Arc<dyn AgentPool>,
    pub implementer: Arc<dyn Implementer>,
    pub reviewer_factory: Arc<dyn ReviewerFactory>,
    pub test_runner: Arc<dyn TestRunner>,
    pub prs: Arc<dyn PrProvider>,
}

/// Sequences the full delivery pipeline for single stories.
///
/// One orchestrator can run many stories; each story's run owns its
/// [`WorkflowState`] exclusively and the only shared mutable artifact is the
/// sprint-status file.
pub struct WorkflowOrchestrator {
    config: PipelineConfig,
    store: StateStore,
    steps: StepExecutor,
    sprint: SprintTracker,
    escalations: EscalationHandler,
    coordinator: ReviewCoordinator,
    ci: CiMonitor,
    collab: Collaborators,
}

impl WorkflowOrchestrator {
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> Self {
        let store = StateStore::new(&config.state_dir);
        let steps = StepExecutor::new(store.clone())
            .with_bottleneck_threshold(config.bottleneck_threshold);
        let sprint = SprintTracker::new(&config.sprint_file);
        let escalations = EscalationHandler::new(&config.state_dir);
        let coordinator = ReviewCoordinator::new(
            config.agent_retry.clone(),
            config.reviewer_retry.clone(),
            config.confidence_threshold,
            config.graceful_degradation,
        );
        let ci = CiMonitor::new(config.ci_poll_interval, config.ci_max_polls)
            .with_retry(config.agent_retry.clone());
        Self {
            config,
            store,
            steps,
            sprint,
            escalations,
            coordinator,
            ci,
            collab: collaborators,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Run one story end-to-end, resuming from its last checkpoint if one
    /// exists.
    ///
    /// Returns the final state on success. On failure the error is raised
    /// after the state (with `status = error`) has been checkpointed, so
    /// the run can be diagnosed and resumed.
    pub async fn run_story(&self, story: &StoryRef) -> Result<WorkflowState> {
        let mut state = self.store.load_or_init(&story.id);
        if state.status == WorkflowStatus::Error {
            return Err(PipelineError::HaltedInError {
                story_id: story.id.clone(),
            }
            .into());
        }

        self.sprint
            .set_status(&story.id, SprintStatus::InProgress)?;
        info!(
            target: "conveyor::pipeline",
            story_id = %story.id,
            step = state.current_step,
            "pipeline started"
        );

        self.drive(&mut state, story).await?;

        state.status = WorkflowStatus::Completed;
        state.touch();
        self.sprint.set_status(&story.id, SprintStatus::Done)?;
        self.store.delete(&story.id);
        info!(
            target: "conveyor::pipeline",
            story_id = %story.id,
            pr = state.pr_url.as_deref().unwrap_or("none"),
            "pipeline completed"
        );
        Ok(state)
    }

    async fn drive(&self, state: &mut WorkflowState, story: &StoryRef) -> Result<()> {
        // Step 1: context generation
        {
            let provider = Arc::clone(&self.collab.context);
            let story = story.clone();
            self.steps
                .run(state, 1, "context-generation", move || async move {
                    let context = provider.generate_context(&story).await?;
                    Ok(vec![StepOutput::Context(context)])
                })
                .await?;
        }

        // Step 2: worktree creation
        {
            let provider = Arc::clone(&self.collab.worktrees);
            let story_id = story.id.clone();
            self.steps
                .run(state, 2, "worktree-creation", move || async move {
                    let worktree = provider.create(&story_id).await?;
                    Ok(vec![StepOutput::Worktree(worktree)])
                })
                .await?;
        }

        // Steps 3..9: the implementer's span. Its activity record is closed
        // out on a path that runs regardless of step success.
        let implement_outcome = self.implement_and_verify(state, story).await;
        let error_text = implement_outcome.as_ref().err().map(|e| format!("{:#}", e));
        state
            .agents
            .implementer
            .finish(implement_outcome.is_ok(), error_text);
        self.steps.checkpoint_best_effort(state);
        implement_outcome?;

        // Step 10: independent review
        {
            let coordinator = self.coordinator.clone();
            let factory = Arc::clone(&self.collab.reviewer_factory);
            let implementation =
                required(state.outputs.implementation.clone(), 10, "implementation")?;
            let tests = required(state.outputs.tests.clone(), 10, "tests")?;
            let context = required(state.outputs.context.clone(), 10, "context")?;
            let self_review = required(state.outputs.self_review.clone(), 10, "self_review")?;

            // Shared so the reviewer activity survives even when the step
            // fails (its end timestamp must always be recorded).
            let shared_activity = Arc::new(Mutex::new(AgentActivity::idle()));
            let activity_in = Arc::clone(&shared_activity);
            let result = self
                .steps
                .run(state, 10, "independent-review", move || async move {
                    let mut activity = activity_in.lock().unwrap().clone();
                    let report = coordinator
                        .run_independent_review(
                            factory.as_ref(),
                            &implementation,
                            &tests,
                            &context,
                            &self_review,
                            &mut activity,
                        )
                        .await;
                    *activity_in.lock().unwrap() = activity.clone();
                    let report = report?;
                    Ok(vec![StepOutput::IndependentReview { report, activity }])
                })
                .await;
            if result.is_err() {
                state.agents.reviewer = shared_activity.lock().unwrap().clone();
                self.steps.checkpoint_best_effort(state);
            }
            result?;
        }

        // Step 11: review decision. The sole branch point: a non-pass
        // verdict records an escalation, then raises.
        {
            let coordinator = self.coordinator.clone();
            let escalations = self.escalations.clone();
            let self_review = required(state.outputs.self_review.clone(), 11, "self_review")?;
            let independent = required(
                state.outputs.independent_review.clone(),
                11,
                "independent_review",
            )?;
            let snapshot = state.clone();
            self.steps
                .run(state, 11, "review-decision", move || async move {
                    let result =
                        coordinator.conclude(self_review.clone(), independent.clone());
                    if !result.decision.passed() {
                        escalations
                            .escalate(
                                &snapshot,
                                Some(&self_review),
                                Some(&independent),
                                &result.decision.rationale,
                            )
                            .context("Failed to record review escalation")?;
                        return Err(PipelineError::ReviewRejected {
                            rationale: result.decision.rationale,
                        }
                        .into());
                    }
                    info!(
                        target: "conveyor::pipeline",
                        combined_score = result.decision.combined_score,
                        findings = result.findings.len(),
                        recommendations = result.recommendations.len(),
                        "review gate passed"
                    );
                    Ok(vec![StepOutput::Decision(result.decision)])
                })
                .await?;
        }

        // Step 12: create the pull request
        {
            let prs = Arc::clone(&self.collab.prs);
            let sprint = self.sprint.clone();
            let story = story.clone();
            let branch = required(state.branch.clone(), 12, "branch")?;
            let context = required(state.outputs.context.clone(), 12, "context")?;
            let implementation =
                required(state.outputs.implementation.clone(), 12, "implementation")?;
            let auto_merge = self.config.auto_merge;
            self.steps
                .run(state, 12, "create-pr", move || async move {
                    let body =
                        build_pr_body(&story, &context.description, &implementation.summary);
                    let mut pr = prs.create_pr(&branch, &story.title, &body).await?;
                    pr.auto_merge = auto_merge;
                    sprint.set_status(&story.id, SprintStatus::Review)?;
                    Ok(vec![StepOutput::Pr(pr)])
                })
                .await?;
        }

        // Step 13: CI monitoring, only when auto-merge is configured
        if self.config.auto_merge {
            let monitor = self.ci.clone();
            let prs = Arc::clone(&self.collab.prs);
            let pr = required(state.outputs.pr.clone(), 13, "pr")?;
            let result = self
                .steps
                .run(state, 13, "monitor-ci-and-merge", move || async move {
                    let outcome = monitor.monitor_and_merge(prs.as_ref(), &pr, true).await?;
                    Ok(vec![StepOutput::CiResult {
                        status: outcome.status,
                        merged: outcome.merged,
                    }])
                })
                .await;
            if let Err(err) = result {
                self.record_ci_failure(state, &err);
                return Err(err);
            }
        }

        // Step 14: cleanup. Teardown is best-effort by design.
        {
            let worktrees = Arc::clone(&self.collab.worktrees);
            let story_id = story.id.clone();
            self.steps
                .run(state, 14, "cleanup", move || async move {
                    if let Err(err) = worktrees.destroy(&story_id).await {
                        warn!(
                            target: "conveyor::pipeline",
                            story_id = %story_id,
                            %err,
                            "worktree teardown failed (non-fatal)"
                        );
                    }
                    Ok(vec![])
                })
                .await?;
        }

        Ok(())
    }

    /// Steps 3 through 9: implement, apply, generate and run tests, fix
    /// failures within budget, then self-review.
    async fn implement_and_verify(
        &self,
        state: &mut WorkflowState,
        story: &StoryRef,
    ) -> Result<()> {
        let context = required(state.outputs.context.clone(), 3, "context")?;

        // Step 3: implement
        {
            let pool = Arc::clone(&self.collab.agents);
            let implementer = Arc::clone(&self.collab.implementer);
            let retry = self.config.agent_retry.clone();
            let ctx = context.clone();
            let title = story.title.clone();
            self.steps
                .run(state, 3, "implement", move || async move {
                    let agent_id = pool.create_agent(AgentRole::Implementer, &title).await?;
                    let artifact = retry
                        .run("implement", || implementer.implement(&ctx))
                        .await
                        .context("Implementation failed after retries")?;
                    Ok(vec![
                        StepOutput::ImplementerStarted { agent_id },
                        StepOutput::Implementation(artifact),
                    ])
                })
                .await?;
        }

        // Step 4: apply the implementation to the worktree
        {
            let worktree = required_worktree(state, 4)?;
            let implementation =
                required(state.outputs.implementation.clone(), 4, "implementation")?;
            self.steps
                .run(state, 4, "apply-code", move || async move {
                    apply_files(&worktree, &implementation.files)?;
                    Ok(vec![])
                })
                .await?;
        }

        // Step 5: write tests
        {
            let implementer = Arc::clone(&self.collab.implementer);
            let retry = self.config.agent_retry.clone();
            let ctx = context.clone();
            let implementation =
                required(state.outputs.implementation.clone(), 5, "implementation")?;
            self.steps
                .run(state, 5, "write-tests", move || async move {
                    let tests = retry
                        .run("write-tests", || {
                            implementer.write_tests(&implementation, &ctx)
                        })
                        .await
                        .context("Test generation failed after retries")?;
                    Ok(vec![StepOutput::ImplementerTesting, StepOutput::Tests(tests)])
                })
                .await?;
        }

        // Step 6: apply the tests to the worktree
        {
            let worktree = required_worktree(state, 6)?;
            let tests = required(state.outputs.tests.clone(), 6, "tests")?;
            self.steps
                .run(state, 6, "apply-tests", move || async move {
                    apply_files(&worktree, &tests.files)?;
                    Ok(vec![])
                })
                .await?;
        }

        // Step 7: run the test suite
        {
            let runner = Arc::clone(&self.collab.test_runner);
            let worktree = required_worktree(state, 7)?;
            self.steps
                .run(state, 7, "run-tests", move || async move {
                    let summary = runner.run_tests(&worktree).await?;
                    if !summary.all_passed() {
                        warn!(
                            target: "conveyor::pipeline",
                            failed = summary.failed,
                            "initial test run has failures"
                        );
                    }
                    Ok(vec![StepOutput::TestRun(summary)])
                })
                .await?;
        }

        // Step 8: fix failing tests, only when step 7 reported failures
        let needs_fixes = state
            .outputs
            .test_run
            .as_ref()
            .is_some_and(|summary| !summary.all_passed());
        if needs_fixes {
            let implementer = Arc::clone(&self.collab.implementer);
            let runner = Arc::clone(&self.collab.test_runner);
            let retry = self.config.agent_retry.clone();
            let escalations = self.escalations.clone();
            let ctx = context.clone();
            let worktree = required_worktree(state, 8)?;
            let initial = required(state.outputs.test_run.clone(), 8, "test_run")?;
            let max_attempts = self.config.max_fix_attempts;
            let inter_attempt_delay = self.config.agent_retry.base_delay;
            let snapshot = state.clone();
            self.steps
                .run(state, 8, "fix-failing-tests", move || async move {
                    let mut latest = initial;
                    for attempt in 1..=max_attempts {
                        info!(
                            target: "conveyor::pipeline",
                            attempt,
                            max_attempts,
                            failed = latest.failed,
                            "fixing failing tests"
                        );
                        let fix = retry
                            .run("fix-tests", || {
                                implementer.fix_failing_tests(&ctx, &latest)
                            })
                            .await
                            .context("Test fix failed after retries")?;
                        apply_files(&worktree, &fix.files)?;
                        latest = runner.run_tests(&worktree).await?;
                        if latest.all_passed() {
                            return Ok(vec![StepOutput::TestRun(latest)]);
                        }
                        if attempt < max_attempts {
                            tokio::time::sleep(inter_attempt_delay).await;
                        }
                    }
                    let message = format!(
                        "{} tests still failing after {} fix attempts: {}",
                        latest.failed,
                        max_attempts,
                        latest.failing.join(", ")
                    );
                    escalations
                        .escalate_with_reason(
                            &snapshot,
                            EscalationReason::TestFailures,
                            &message,
                            snapshot.outputs.self_review.as_ref(),
                            None,
                        )
                        .context("Failed to record test-failure escalation")?;
                    Err(PipelineError::FixAttemptsExhausted {
                        attempts: max_attempts,
                    }
                    .into())
                })
                .await?;
        }

        // Step 9: self-review
        {
            let coordinator = self.coordinator.clone();
            let implementer = Arc::clone(&self.collab.implementer);
            let implementation =
                required(state.outputs.implementation.clone(), 9, "implementation")?;
            let tests = required(state.outputs.tests.clone(), 9, "tests")?;
            let ctx = context.clone();
            self.steps
                .run(state, 9, "self-review", move || async move {
                    let report = coordinator
                        .run_self_review(implementer.as_ref(), &implementation, &tests, &ctx)
                        .await?;
                    Ok(vec![StepOutput::SelfReview(report)])
                })
                .await?;
        }

        Ok(())
    }

    /// Record CI failure context before re-raising: mark the CI status,
    /// write a `ci-failures` escalation (best-effort), checkpoint.
    fn record_ci_failure(&self, state: &mut WorkflowState, err: &anyhow::Error) {
        let status = match err.downcast_ref::<CiError>() {
            // A merge failure means the checks themselves passed.
            Some(CiError::MergeFailed { .. }) => Some(CiStatus::Passed),
            Some(_) => Some(CiStatus::Failed),
            None => None,
        };
        if let Some(status) = status {
            state.ci_status = Some(status);
        }
        let self_review = state.outputs.self_review.clone();
        let independent = state.outputs.independent_review.clone();
        if let Err(esc_err) = self.escalations.escalate_with_reason(
            state,
            EscalationReason::CiFailures,
            &format!("{:#}", err),
            self_review.as_ref(),
            independent.as_ref(),
        ) {
            warn!(
                target: "conveyor::pipeline",
                %esc_err,
                "failed to record CI escalation"
            );
        }
        self.steps.checkpoint_best_effort(state);
    }
}

fn required<T>(value: Option<T>, step: u32, output: &'static str) -> Result<T> {
    value.ok_or_else(|| PipelineError::MissingStepOutput { step, output }.into())
}

fn required_worktree(state: &WorkflowState, step: u32) -> Result<PathBuf> {
    required(state.worktree_path.clone(), step, "worktree")
}

/// Write artifact files under the worktree root, creating parents as needed.
fn apply_files(root: &Path, files: &[FileChange]) -> Result<()> {
    for file in files {
        let path = root.join(&file.path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&path, &file.content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}

fn build_pr_body(story: &StoryRef, context_description: &str, implementation_summary: &str) -> String {
    let description = if story.description.is_empty() {
        context_description
    } else {
        &story.description
    };
    format!(
        "## Summary\n\nAutomated implementation for: **{}**\n\n{}\n\n\
         ### Implementation notes\n\n{}\n\n---\n*Created by Conveyor*",
        story.title, description, implementation_summary
    )
}

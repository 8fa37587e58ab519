//! Step-sequenced execution with checkpointing and resume.
//!
//! Each pipeline step runs through [`StepExecutor::run`], which applies the
//! resume guard, merges the step's outputs into the state, advances the
//! resume marker and checkpoints. A checkpoint failure is logged and
//! swallowed: losing a checkpoint is recoverable (the step output is still
//! in memory and the next checkpoint may succeed), whereas aborting a
//! completed step's work is not.

use crate::state::{StateStore, StepOutput, WorkflowState, WorkflowStatus};
use anyhow::{Context, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Steps slower than this emit a non-fatal bottleneck warning.
pub const BOTTLENECK_THRESHOLD: Duration = Duration::from_secs(30 * 60);

/// Named metric for a step number. Unmapped steps contribute no named
/// metric.
pub fn step_metric(step: u32) -> Option<&'static str> {
    match step {
        1 => Some("context_generation"),
        2 => Some("worktree_setup"),
        3 => Some("implementation"),
        5 => Some("test_generation"),
        7 => Some("test_execution"),
        9 => Some("self_review"),
        10 => Some("independent_review"),
        12 => Some("pr_creation"),
        13 => Some("ci_monitoring"),
        _ => None,
    }
}

/// Advances workflow state one step at a time, checkpointing after each.
#[derive(Debug, Clone)]
pub struct StepExecutor {
    store: StateStore,
    bottleneck_threshold: Duration,
}

impl StepExecutor {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            bottleneck_threshold: BOTTLENECK_THRESHOLD,
        }
    }

    pub fn with_bottleneck_threshold(mut self, threshold: Duration) -> Self {
        self.bottleneck_threshold = threshold;
        self
    }

    /// Run one step.
    ///
    /// Skips execution entirely when the state has already progressed past
    /// `number` (resume semantics). On success the returned outputs are
    /// merged, `current_step` becomes `number + 1`, the duration is recorded
    /// under the step's metric name, and the state is checkpointed
    /// unconditionally. On failure the status becomes `error`, a best-effort
    /// checkpoint is taken, and the error is re-raised; no partial merge
    /// occurs.
    pub async fn run<F, Fut>(
        &self,
        state: &mut WorkflowState,
        number: u32,
        name: &str,
        work: F,
    ) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<StepOutput>>>,
    {
        if state.current_step > number {
            debug!(
                target: "conveyor::step",
                story_id = %state.story_id,
                step = number,
                name,
                "step already completed, skipping"
            );
            return Ok(());
        }

        info!(
            target: "conveyor::step",
            story_id = %state.story_id,
            step = number,
            name,
            "starting step"
        );
        let started = Instant::now();
        let result = work().await;

        match result {
            Ok(outputs) => {
                for output in outputs {
                    state.apply(output);
                }
                state.current_step = number + 1;
                state.touch();

                let elapsed = started.elapsed();
                if let Some(metric) = step_metric(number) {
                    state.record_metric(metric, elapsed.as_millis() as u64);
                }
                if elapsed > self.bottleneck_threshold {
                    warn!(
                        target: "conveyor::step",
                        step = number,
                        name,
                        elapsed_secs = elapsed.as_secs(),
                        "step exceeded bottleneck threshold"
                    );
                }
                self.checkpoint_best_effort(state);
                Ok(())
            }
            Err(err) => {
                state.status = WorkflowStatus::Error;
                state.touch();
                self.checkpoint_best_effort(state);
                Err(err).with_context(|| format!("Step {} ({}) failed", number, name))
            }
        }
    }

    /// Checkpoint, logging and swallowing failures.
    pub fn checkpoint_best_effort(&self, state: &WorkflowState) {
        if let Err(err) = self.store.checkpoint(state) {
            warn!(
                target: "conveyor::step",
                story_id = %state.story_id,
                %err,
                "checkpoint failed (step result kept in memory)"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StoryContext;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    fn setup() -> (StepExecutor, StateStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        (StepExecutor::new(store.clone()), store, dir)
    }

    fn context_output() -> Vec<StepOutput> {
        vec![StepOutput::Context(StoryContext {
            description: "ctx".to_string(),
            acceptance_criteria: vec![],
            token_count: 10,
        })]
    }

    #[test]
    fn test_metric_table_covers_mapped_steps() {
        assert_eq!(step_metric(1), Some("context_generation"));
        assert_eq!(step_metric(2), Some("worktree_setup"));
        assert_eq!(step_metric(3), Some("implementation"));
        assert_eq!(step_metric(5), Some("test_generation"));
        assert_eq!(step_metric(7), Some("test_execution"));
        assert_eq!(step_metric(9), Some("self_review"));
        assert_eq!(step_metric(10), Some("independent_review"));
        assert_eq!(step_metric(12), Some("pr_creation"));
        assert_eq!(step_metric(13), Some("ci_monitoring"));
        for unmapped in [4, 6, 8, 11, 14] {
            assert_eq!(step_metric(unmapped), None, "step {} should be unmapped", unmapped);
        }
    }

    #[tokio::test]
    async fn test_successful_step_advances_and_checkpoints() {
        let (executor, store, _dir) = setup();
        let mut state = WorkflowState::new("story-1");

        executor
            .run(&mut state, 1, "context-generation", || async {
                Ok(context_output())
            })
            .await
            .unwrap();

        assert_eq!(state.current_step, 2);
        assert!(state.outputs.context.is_some());
        assert!(state.metrics.contains_key("context_generation"));

        let persisted = store.load("story-1").unwrap();
        assert_eq!(persisted.current_step, 2);
    }

    #[tokio::test]
    async fn test_completed_step_is_skipped() {
        let (executor, _store, _dir) = setup();
        let mut state = WorkflowState::new("story-1");
        state.current_step = 5;

        let calls = AtomicU32::new(0);
        executor
            .run(&mut state, 3, "implement", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(vec![]) }
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0, "skipped step must not run");
        assert_eq!(state.current_step, 5);
    }

    #[tokio::test]
    async fn test_current_step_only_increases() {
        let (executor, _store, _dir) = setup();
        let mut state = WorkflowState::new("story-1");
        state.current_step = 9;

        // Re-running earlier steps never moves the marker backwards.
        for number in 1..9 {
            executor
                .run(&mut state, number, "earlier", || async { Ok(vec![]) })
                .await
                .unwrap();
            assert_eq!(state.current_step, 9);
        }
    }

    #[tokio::test]
    async fn test_failure_sets_error_status_and_checkpoints() {
        let (executor, store, _dir) = setup();
        let mut state = WorkflowState::new("story-1");

        let err = executor
            .run(&mut state, 3, "implement", || async {
                anyhow::bail!("model call failed")
            })
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Step 3 (implement) failed"));
        assert_eq!(state.status, WorkflowStatus::Error);
        // No partial merge, no step advance.
        assert_eq!(state.current_step, 3);

        let persisted = store.load("story-1").unwrap();
        assert_eq!(persisted.status, WorkflowStatus::Error);
    }

    #[tokio::test]
    async fn test_unmapped_step_records_no_metric() {
        let (executor, _store, _dir) = setup();
        let mut state = WorkflowState::new("story-1");
        state.current_step = 4;

        executor
            .run(&mut state, 4, "apply-code", || async { Ok(vec![]) })
            .await
            .unwrap();

        assert_eq!(state.current_step, 5);
        assert!(state.metrics.is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_failure_does_not_fail_step() {
        let dir = tempdir().unwrap();
        // Point the store at a path that cannot be a directory.
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file in the way").unwrap();
        let store = StateStore::new(blocker.join("states"));
        let executor = StepExecutor::new(store);

        let mut state = WorkflowState::new("story-1");
        executor
            .run(&mut state, 1, "context-generation", || async {
                Ok(context_output())
            })
            .await
            .unwrap();

        // The step result survives in memory even though persisting failed.
        assert_eq!(state.current_step, 2);
        assert!(state.outputs.context.is_some());
    }
}

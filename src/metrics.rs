//! Phase timing for pipeline observability.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::warn;

/// Timing record for one named phase.
#[derive(Debug, Clone)]
struct PhaseTiming {
    started_at: DateTime<Utc>,
    started: Instant,
    ended_at: Option<DateTime<Utc>>,
    duration: Option<Duration>,
}

/// Records phase start/end timestamps and derives a duration-keyed summary.
///
/// Phases are keyed by name; re-starting a finished phase restarts its
/// timing. Stopping a phase that never started is a logged no-op.
#[derive(Debug, Default)]
pub struct MetricsTracker {
    phases: BTreeMap<String, PhaseTiming>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin timing a phase.
    pub fn start(&mut self, phase: &str) {
        self.phases.insert(
            phase.to_string(),
            PhaseTiming {
                started_at: Utc::now(),
                started: Instant::now(),
                ended_at: None,
                duration: None,
            },
        );
    }

    /// Finish timing a phase, returning its duration.
    pub fn stop(&mut self, phase: &str) -> Option<Duration> {
        match self.phases.get_mut(phase) {
            Some(timing) => {
                let elapsed = timing.started.elapsed();
                timing.ended_at = Some(Utc::now());
                timing.duration = Some(elapsed);
                Some(elapsed)
            }
            None => {
                warn!(target: "conveyor::metrics", phase, "stop called for phase that never started");
                None
            }
        }
    }

    /// Whether a phase has started but not yet stopped.
    pub fn is_running(&self, phase: &str) -> bool {
        self.phases
            .get(phase)
            .is_some_and(|t| t.duration.is_none())
    }

    /// Wall-clock start of a phase, if it started.
    pub fn started_at(&self, phase: &str) -> Option<DateTime<Utc>> {
        self.phases.get(phase).map(|t| t.started_at)
    }

    /// Wall-clock end of a phase, if it finished.
    pub fn ended_at(&self, phase: &str) -> Option<DateTime<Utc>> {
        self.phases.get(phase).and_then(|t| t.ended_at)
    }

    /// Durations of all finished phases, in milliseconds, keyed by phase name.
    pub fn summary(&self) -> BTreeMap<String, u64> {
        self.phases
            .iter()
            .filter_map(|(name, t)| t.duration.map(|d| (name.clone(), d.as_millis() as u64)))
            .collect()
    }
}

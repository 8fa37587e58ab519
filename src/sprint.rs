//! Sprint-board status store.
//!
//! One YAML file shared by all stories; the orchestrator only ever reads its
//! own story's entry and overwrites the `status` field. Updates go through a
//! read-modify-write with a temp-file rename, so readers never observe a
//! torn document. There is no cross-process locking: concurrent stories race
//! on this one shared artifact and last-writer-wins is accepted.

use crate::models::SprintStatus;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

/// Per-story entry in the sprint file. Fields other than `status` belong to
/// the sprint tool that owns the file; they are preserved verbatim on
/// rewrite.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SprintEntry {
    #[serde(default)]
    pub status: String,
    #[serde(flatten)]
    pub rest: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SprintFile {
    #[serde(default)]
    stories: BTreeMap<String, SprintEntry>,
}

/// Reads and rewrites the sprint-status file.
#[derive(Debug, Clone)]
pub struct SprintTracker {
    path: PathBuf,
}

impl SprintTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Overwrite one story's status field.
    ///
    /// If the story id (or the whole file) is absent the update is a no-op
    /// with a warning, not an error.
    pub fn set_status(&self, story_id: &str, status: SprintStatus) -> Result<()> {
        let mut file = match self.read() {
            Some(file) => file,
            None => {
                warn!(
                    target: "conveyor::sprint",
                    story_id,
                    path = %self.path.display(),
                    "sprint file missing or unreadable, skipping status update"
                );
                return Ok(());
            }
        };

        match file.stories.get_mut(story_id) {
            Some(entry) => entry.status = status.to_string(),
            None => {
                warn!(
                    target: "conveyor::sprint",
                    story_id,
                    "story not present in sprint file, skipping status update"
                );
                return Ok(());
            }
        }

        let yaml = serde_yaml::to_string(&file).context("Failed to serialize sprint file")?;
        let tmp = self.path.with_extension("yaml.tmp");
        fs::write(&tmp, yaml).context("Failed to write sprint temp file")?;
        fs::rename(&tmp, &self.path)
            .context("Failed to rename sprint temp file into place")?;
        info!(target: "conveyor::sprint", story_id, %status, "sprint status updated");
        Ok(())
    }

    /// Current status string for a story, if present.
    pub fn status_of(&self, story_id: &str) -> Option<String> {
        self.read()?
            .stories
            .get(story_id)
            .map(|entry| entry.status.clone())
    }

    fn read(&self) -> Option<SprintFile> {
        let content = fs::read_to_string(&self.path).ok()?;
        serde_yaml::from_str(&content).ok()
    }
}

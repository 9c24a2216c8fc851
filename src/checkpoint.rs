//! Resumable snapshots of a session.
//!
//! A checkpoint is a markdown note at
//! `<project_path>/features/<feature-id>/_checkpoint`. The body is a readable
//! summary; the only part read back is the fenced `json` block under
//! `## Checkpoint Data`.

use crate::config::{Model, SessionConfig};
use crate::errors::CheckpointError;
use crate::feature::{Feature, StoryStatus};
use crate::session::{SessionState, SessionStatus};
use crate::store::DocumentStore;
use chrono::{DateTime, Local, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use tracing::debug;

pub const CHECKPOINT_VERSION: &str = "1.0";

// Blocker and question prose above the data may contain fences of its own
static DATA_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)## Checkpoint Data\s*```json\n(.*?)\n```")
        .expect("checkpoint data regex is valid")
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointData {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub feature_id: String,
    pub session_state: CheckpointSession,
    pub config: CheckpointConfig,
    pub story_progress: BTreeMap<String, StoryProgress>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointSession {
    pub start_time: DateTime<Utc>,
    pub stories_completed: u32,
    pub stories_blocked: u32,
    pub total_iterations: u32,
    pub current_story_id: Option<String>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocker_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_question: Option<String>,
}

/// Session settings needed to resume with the same behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointConfig {
    pub max_hours: Option<f64>,
    pub max_stories: Option<u32>,
    pub stop_on_blocker: bool,
    pub pause_between_stories: bool,
    pub model: Model,
    pub iterate_until_green: bool,
    pub max_iterations: u32,
    #[serde(rename = "createPRPerStory")]
    pub create_pr_per_story: bool,
    #[serde(rename = "createPROnComplete")]
    pub create_pr_on_complete: bool,
}

impl CheckpointConfig {
    pub fn from_session(config: &SessionConfig) -> Self {
        Self {
            max_hours: config.max_hours,
            max_stories: config.max_stories,
            stop_on_blocker: config.stop_on_blocker,
            pause_between_stories: config.pause_between_stories,
            model: config.model,
            iterate_until_green: config.iterate_until_green,
            max_iterations: config.max_iterations,
            create_pr_per_story: config.create_pr_per_story,
            create_pr_on_complete: config.create_pr_on_complete,
        }
    }

    /// Restore the saved settings onto `config`. The time budget is left
    /// alone; resume computes it from the remaining time.
    pub fn restore_into(&self, config: &mut SessionConfig) {
        config.max_stories = self.max_stories;
        config.stop_on_blocker = self.stop_on_blocker;
        config.pause_between_stories = self.pause_between_stories;
        config.model = self.model;
        config.iterate_until_green = self.iterate_until_green;
        config.max_iterations = self.max_iterations;
        config.create_pr_per_story = self.create_pr_per_story;
        config.create_pr_on_complete = self.create_pr_on_complete;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryProgress {
    pub status: StoryStatus,
    pub iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr: Option<u64>,
}

impl CheckpointData {
    pub fn capture(feature: &Feature, state: &SessionState, config: &SessionConfig) -> Self {
        let story_progress = feature
            .stories
            .iter()
            .map(|s| {
                (
                    s.id.clone(),
                    StoryProgress {
                        status: s.status,
                        iterations: s.iterations,
                        pr: s.pr,
                    },
                )
            })
            .collect();

        Self {
            version: CHECKPOINT_VERSION.to_string(),
            timestamp: Utc::now(),
            feature_id: feature.id.clone(),
            session_state: CheckpointSession {
                start_time: state.start_time,
                stories_completed: state.stories_completed,
                stories_blocked: state.stories_blocked,
                total_iterations: state.total_iterations,
                current_story_id: state.current_story_id.clone(),
                status: state.status,
                blocker_reason: state.blocker_reason.clone(),
                pending_question: state.pending_question.clone(),
            },
            config: CheckpointConfig::from_session(config),
            story_progress,
        }
    }

    pub fn is_resumable(&self) -> bool {
        self.session_state.status.is_resumable()
    }

    /// Hours left of the original budget at `now`, never negative.
    /// `None` when the checkpointed run had no deadline.
    pub fn remaining_hours(&self, now: DateTime<Utc>) -> Option<f64> {
        let max_hours = self.config.max_hours?;
        let elapsed = (now - self.session_state.start_time).num_milliseconds() as f64 / 3_600_000.0;
        Some((max_hours - elapsed).max(0.0))
    }

    /// Story ids ordered numerically where possible.
    fn ordered_story_ids(&self) -> Vec<&String> {
        let mut ids: Vec<&String> = self.story_progress.keys().collect();
        ids.sort_by(|a, b| match (a.parse::<u64>(), b.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a.cmp(b),
        });
        ids
    }

    pub fn render_markdown(&self) -> Result<String, serde_json::Error> {
        let s = &self.session_state;
        let mut doc = format!(
            "# Session Checkpoint\n\n{} **Status:** {}\n**Last Updated:** {}\n**Stories Completed:** {}\n**Stories Blocked:** {}\n**Total Iterations:** {}\n\n## Story Progress\n\n",
            s.status.icon(),
            s.status,
            self.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            s.stories_completed,
            s.stories_blocked,
            s.total_iterations
        );

        for id in self.ordered_story_ids() {
            let progress = &self.story_progress[id];
            doc.push_str(&format!(
                "- {} Story {}: {}",
                progress.status.icon(),
                id,
                progress.status
            ));
            if progress.iterations > 1 {
                doc.push_str(&format!(" ({} iterations)", progress.iterations));
            }
            doc.push('\n');
        }

        if let Some(ref reason) = s.blocker_reason {
            doc.push_str(&format!("\n## Blocker\n\n{}\n", reason));
        }
        if let Some(ref question) = s.pending_question {
            doc.push_str(&format!("\n## Pending Question\n\n{}\n", question));
        }

        doc.push_str(&format!(
            "\n## Checkpoint Data\n\n```json\n{}\n```\n\n---\n*Resume this session with `claw resume {}`*\n",
            serde_json::to_string_pretty(self)?,
            self.feature_id
        ));
        Ok(doc)
    }

    /// Decode the embedded data block of a checkpoint note.
    pub fn parse_markdown(feature_id: &str, content: &str) -> Result<Self, CheckpointError> {
        let caps = DATA_BLOCK
            .captures_iter(content)
            .last()
            .ok_or_else(|| CheckpointError::MissingDataBlock {
                feature_id: feature_id.to_string(),
            })?;
        let malformed = |source| CheckpointError::MalformedData {
            feature_id: feature_id.to_string(),
            source,
        };

        let value: serde_json::Value = serde_json::from_str(&caps[1]).map_err(malformed)?;
        let version = value
            .get("version")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: version.to_string(),
                expected: CHECKPOINT_VERSION.to_string(),
            });
        }
        serde_json::from_value(value).map_err(malformed)
    }
}

/// Reads and writes checkpoints through the document store.
#[derive(Clone)]
pub struct CheckpointStore {
    store: Arc<dyn DocumentStore>,
    project_path: String,
}

impl CheckpointStore {
    pub fn new(store: Arc<dyn DocumentStore>, project_path: impl Into<String>) -> Self {
        Self {
            store,
            project_path: project_path.into(),
        }
    }

    pub fn path(&self, feature_id: &str) -> String {
        format!("{}/features/{}/_checkpoint", self.project_path, feature_id)
    }

    pub fn save(
        &self,
        feature: &Feature,
        state: &SessionState,
        config: &SessionConfig,
    ) -> Result<CheckpointData, CheckpointError> {
        let data = CheckpointData::capture(feature, state, config);
        let content = data
            .render_markdown()
            .map_err(|source| CheckpointError::MalformedData {
                feature_id: feature.id.clone(),
                source,
            })?;
        self.store.write_note(&self.path(&feature.id), &content, None)?;
        debug!(feature = %feature.id, status = %state.status, "checkpoint saved");
        Ok(data)
    }

    pub fn load(&self, feature_id: &str) -> Result<Option<CheckpointData>, CheckpointError> {
        let Some(note) = self.store.read_note(&self.path(feature_id))? else {
            return Ok(None);
        };
        CheckpointData::parse_markdown(feature_id, &note.content).map(Some)
    }

    pub fn exists(&self, feature_id: &str) -> bool {
        self.store.exists(&self.path(feature_id))
    }

    pub fn delete(&self, feature_id: &str) -> Result<(), CheckpointError> {
        self.store.delete_note(&self.path(feature_id))?;
        Ok(())
    }
}

//! Features and stories, and their persistence in the document store.

use crate::errors::StoreError;
use crate::store::DocumentStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Lifecycle status of a story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    #[default]
    Pending,
    InProgress,
    Complete,
    Blocked,
    Skipped,
}

impl StoryStatus {
    /// Complete or skipped: nothing left to do.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Complete | Self::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Blocked => "blocked",
            Self::Skipped => "skipped",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Self::Pending => "\u{23F3}",
            Self::InProgress => "\u{1F504}",
            Self::Complete => "\u{2705}",
            Self::Blocked => "\u{1F6AB}",
            Self::Skipped => "\u{23ED}\u{FE0F}",
        }
    }
}

impl std::fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub repos: Vec<String>,
    #[serde(default)]
    pub status: StoryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr: Option<u64>,
    #[serde(default)]
    pub blocked_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_hours: Option<f64>,
    #[serde(default)]
    pub iterations: u32,
}

impl Story {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            scope: Vec::new(),
            repos: Vec::new(),
            status: StoryStatus::Pending,
            branch: None,
            pr: None,
            blocked_by: Vec::new(),
            estimated_hours: None,
            actual_hours: None,
            iterations: 0,
        }
    }

    pub fn with_scope(mut self, scope: &[&str]) -> Self {
        self.scope = scope.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_repos(mut self, repos: &[&str]) -> Self {
        self.repos = repos.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_blocked_by(mut self, ids: &[&str]) -> Self {
        self.blocked_by = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_status(mut self, status: StoryStatus) -> Self {
        self.status = status;
        self
    }
}

/// Aggregate status of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    #[default]
    Planning,
    Executing,
    Complete,
    Paused,
}

impl std::fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Planning => write!(f, "planning"),
            Self::Executing => write!(f, "executing"),
            Self::Complete => write!(f, "complete"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// A named collection of stories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: FeatureStatus,
    #[serde(default)]
    pub stories: Vec<Story>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Feature {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            status: FeatureStatus::Planning,
            stories: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn with_stories(mut self, stories: Vec<Story>) -> Self {
        self.stories = stories;
        self
    }

    pub fn story(&self, id: &str) -> Option<&Story> {
        self.stories.iter().find(|s| s.id == id)
    }

    pub fn story_mut(&mut self, id: &str) -> Option<&mut Story> {
        self.stories.iter_mut().find(|s| s.id == id)
    }

    /// Set a story's status. Returns false for an unknown id.
    pub fn set_story_status(&mut self, id: &str, status: StoryStatus) -> bool {
        match self.story_mut(id) {
            Some(story) => {
                story.status = status;
                true
            }
            None => false,
        }
    }

    /// Status implied by the stories alone.
    pub fn derived_status(&self) -> FeatureStatus {
        if self.stories.is_empty() {
            FeatureStatus::Planning
        } else if self.stories.iter().all(|s| s.status.is_done()) {
            FeatureStatus::Complete
        } else if self
            .stories
            .iter()
            .any(|s| s.status != StoryStatus::Pending)
        {
            FeatureStatus::Executing
        } else {
            FeatureStatus::Planning
        }
    }

    pub fn count(&self, status: StoryStatus) -> usize {
        self.stories.iter().filter(|s| s.status == status).count()
    }

    /// Append an operator-added story and return its id.
    ///
    /// Ids are the next integer above every numeric id in use. Fails when
    /// that integer would not fit in a `u64`.
    pub fn add_story(
        &mut self,
        title: &str,
        scope: Vec<String>,
        blocked_by: Vec<String>,
    ) -> anyhow::Result<String> {
        let mut next = self
            .stories
            .iter()
            .filter_map(|s| s.id.parse::<u64>().ok())
            .max()
            .map_or(Some(self.stories.len() as u64 + 1), |n| n.checked_add(1));
        let id = loop {
            let Some(n) = next else {
                anyhow::bail!("No numeric story id left in feature '{}'", self.id);
            };
            let id = n.to_string();
            if self.story(&id).is_none() {
                break id;
            }
            next = n.checked_add(1);
        };

        let mut story = Story::new(id.clone(), title);
        story.scope = scope;
        story.blocked_by = blocked_by;
        self.stories.push(story);
        Ok(id)
    }

    /// Readable story table used as the feature note body.
    pub fn render_body(&self) -> String {
        let mut body = format!("# {}\n\n", self.title);
        if !self.description.is_empty() {
            body.push_str(&self.description);
            body.push_str("\n\n");
        }
        body.push_str("| ID | Story | Status | Blocked by |\n|----|-------|--------|------------|\n");
        for story in &self.stories {
            body.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                story.id,
                story.title.replace('|', "\\|"),
                story.status,
                story.blocked_by.join(", ")
            ));
        }
        body
    }
}

/// Loads and saves features under `<project_path>/features/<id>/_feature`.
#[derive(Clone)]
pub struct FeatureStore {
    store: Arc<dyn DocumentStore>,
    project_path: String,
}

impl FeatureStore {
    pub fn new(store: Arc<dyn DocumentStore>, project_path: impl Into<String>) -> Self {
        Self {
            store,
            project_path: project_path.into(),
        }
    }

    pub fn features_dir(&self) -> String {
        format!("{}/features", self.project_path)
    }

    pub fn feature_dir(&self, feature_id: &str) -> String {
        format!("{}/features/{}", self.project_path, feature_id)
    }

    pub fn note_path(&self, feature_id: &str) -> String {
        format!("{}/_feature", self.feature_dir(feature_id))
    }

    pub fn session_log_path(&self, feature_id: &str) -> String {
        format!("{}/_session-log", self.feature_dir(feature_id))
    }

    pub fn load(&self, feature_id: &str) -> Result<Option<Feature>, StoreError> {
        let path = self.note_path(feature_id);
        let Some(note) = self.store.read_note(&path)? else {
            return Ok(None);
        };
        let Some(frontmatter) = note.frontmatter else {
            return Ok(None);
        };
        serde_yaml::from_value(frontmatter)
            .map(Some)
            .map_err(|source| StoreError::Frontmatter { path, source })
    }

    /// Persist a feature, stamping `updated_at` and `completed_at`.
    pub fn save(&self, feature: &mut Feature) -> Result<(), StoreError> {
        let now = Utc::now();
        feature.updated_at = now;
        if feature.status == FeatureStatus::Complete && feature.completed_at.is_none() {
            feature.completed_at = Some(now);
        }

        let path = self.note_path(&feature.id);
        let frontmatter = serde_yaml::to_value(&*feature).map_err(|source| {
            StoreError::Frontmatter {
                path: path.clone(),
                source,
            }
        })?;
        self.store
            .write_note(&path, &feature.render_body(), Some(&frontmatter))
    }

    /// Ids of all features that have a feature note.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let listing = self.store.list_directory(&self.features_dir())?;
        Ok(listing
            .dirs
            .into_iter()
            .filter(|id| self.store.exists(&self.note_path(id)))
            .collect())
    }
}

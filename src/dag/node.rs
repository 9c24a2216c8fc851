//! Scheduling-time projection of stories.

use crate::feature::StoryStatus;
use serde::{Deserialize, Serialize};

/// Status of a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Waiting on at least one blocker
    #[default]
    Pending,
    /// Every blocker is complete
    Ready,
    InProgress,
    Complete,
    /// Blocked externally; stays put until reset
    Blocked,
}

impl NodeStatus {
    /// Seed a node from the story it projects.
    pub fn seed(status: StoryStatus) -> Self {
        match status {
            StoryStatus::Complete => Self::Complete,
            StoryStatus::InProgress => Self::InProgress,
            StoryStatus::Blocked | StoryStatus::Skipped => Self::Blocked,
            StoryStatus::Pending => Self::Pending,
        }
    }

    /// Statuses that readiness recomputation leaves alone.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Complete | Self::InProgress | Self::Blocked)
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Self::Complete => "\u{2705}",
            Self::InProgress => "\u{1F504}",
            Self::Ready => "\u{1F4CB}",
            Self::Blocked => "\u{1F6AB}",
            Self::Pending => "\u{23F3}",
        }
    }
}

/// A story as the scheduler sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyNode {
    pub id: String,
    pub title: String,
    pub status: NodeStatus,
    /// Ids that must complete before this node is ready
    pub blocked_by: Vec<String>,
    /// Ids this node blocks (inverse of `blocked_by`)
    pub blocks: Vec<String>,
}

impl DependencyNode {
    pub fn new(id: impl Into<String>, title: impl Into<String>, status: NodeStatus) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status,
            blocked_by: Vec::new(),
            blocks: Vec::new(),
        }
    }
}

/// Node counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphProgress {
    pub total: usize,
    pub complete: usize,
    pub in_progress: usize,
    pub ready: usize,
    pub pending: usize,
    pub blocked: usize,
}

impl GraphProgress {
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.complete as f64 / self.total as f64) * 100.0
    }

    pub fn all_complete(&self) -> bool {
        self.complete == self.total
    }
}

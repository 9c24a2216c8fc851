use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Run-loop status.
///
/// `Paused`, `Running` and `Blocked` sessions can be resumed; the rest end
/// the invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Running,
    Paused,
    Completed,
    Blocked,
    Timeout,
    Error,
}

impl SessionStatus {
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::Blocked)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Self::Running => "\u{1F504}",
            Self::Paused => "\u{23F8}\u{FE0F}",
            Self::Completed => "\u{2705}",
            Self::Blocked => "\u{1F6AB}",
            Self::Timeout => "\u{23F0}",
            Self::Error => "\u{274C}",
        }
    }

    /// Process exit code for a session that ended in this status.
    pub fn exit_code(&self) -> i32 {
        if *self == Self::Completed { 0 } else { 1 }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of the active run. This is what gets checkpointed.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub start_time: DateTime<Utc>,
    pub feature_id: String,
    pub stories_completed: u32,
    pub stories_blocked: u32,
    pub total_iterations: u32,
    pub current_story_id: Option<String>,
    pub status: SessionStatus,
    pub blocker_reason: Option<String>,
    pub pending_question: Option<String>,
}

impl SessionState {
    pub fn new(feature_id: impl Into<String>) -> Self {
        Self {
            start_time: Utc::now(),
            feature_id: feature_id.into(),
            stories_completed: 0,
            stories_blocked: 0,
            total_iterations: 0,
            current_story_id: None,
            status: SessionStatus::Running,
            blocker_reason: None,
            pending_question: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    /// Leave `Running` with an optional reason.
    pub fn finish(&mut self, status: SessionStatus, reason: Option<String>) {
        self.status = status;
        if reason.is_some() {
            self.blocker_reason = reason;
        }
    }

    pub fn elapsed(&self) -> Duration {
        (Utc::now() - self.start_time).to_std().unwrap_or_default()
    }
}

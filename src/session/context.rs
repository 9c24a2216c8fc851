use crate::agent::OperatorGuidance;
use crate::dag::DependencyScheduler;
use crate::feature::{Feature, StoryStatus};
use crate::iteration::IterationResult;
use crate::session::{PivotAction, ProgressStats, SessionState, SessionStatus};
use crate::ui::format_duration;
use std::collections::HashMap;
use std::time::Duration;

/// Everything the run-loop and its interrupt handlers mutate.
///
/// Handlers receive this explicitly instead of reaching for shared state,
/// so they can be driven in tests without a terminal.
pub struct SessionContext {
    pub state: SessionState,
    pub feature: Feature,
    pub scheduler: DependencyScheduler,
    /// Operator answers keyed by story id, threaded into the next prompt
    pub guidance: HashMap<String, OperatorGuidance>,
    /// Skip the next story the scheduler hands out
    pub skip_next: bool,
    pub commits: Vec<String>,
    pub prs: Vec<u64>,
    /// Wall-clock time of every story that reached complete or blocked
    pub story_times: Vec<Duration>,
    /// Failed retry-mode results, for the stuck-pattern summary
    pub failed_results: Vec<IterationResult>,
}

impl SessionContext {
    pub fn new(feature: Feature) -> Self {
        let scheduler = DependencyScheduler::from_stories(&feature.stories);
        Self {
            state: SessionState::new(feature.id.clone()),
            feature,
            scheduler,
            guidance: HashMap::new(),
            skip_next: false,
            commits: Vec::new(),
            prs: Vec::new(),
            story_times: Vec::new(),
            failed_results: Vec::new(),
        }
    }

    pub fn stats(&self) -> ProgressStats {
        ProgressStats::compute(&self.feature, self.state.elapsed(), &self.story_times)
    }

    /// Mark a story blocked in both the feature and the scheduler.
    pub fn block_story(&mut self, id: &str) {
        self.scheduler.mark_blocked(id);
        self.feature.set_story_status(id, StoryStatus::Blocked);
        self.state.stories_blocked += 1;
    }

    /// Mark a story skipped without running it.
    pub fn skip_story(&mut self, id: &str) {
        self.scheduler.mark_blocked(id);
        self.feature.set_story_status(id, StoryStatus::Skipped);
        self.state.stories_blocked += 1;
    }

    /// Return a story to pending so the scheduler hands it out again.
    pub fn requeue_story(&mut self, id: &str) {
        self.scheduler.reset_story(id);
        self.feature.set_story_status(id, StoryStatus::Pending);
    }

    /// Apply an operator pivot. Returns a one-line description for the
    /// session log, or `None` when nothing changed.
    pub fn apply_pivot(&mut self, action: PivotAction) -> anyhow::Result<Option<String>> {
        Ok(match action {
            PivotAction::Cancel => None,
            PivotAction::Reprioritize { story_id } => {
                if !self.scheduler.clear_dependencies(&story_id) {
                    return Ok(None);
                }
                if let Some(story) = self.feature.story_mut(&story_id) {
                    story.blocked_by.clear();
                }
                Some(format!("Reprioritized story {} (blockers cleared)", story_id))
            }
            PivotAction::AddStory {
                title,
                scope,
                blocked_by,
            } => {
                let id = self.feature.add_story(&title, scope, blocked_by.clone())?;
                self.scheduler.add_node(&id, &title, blocked_by);
                Some(format!("Added story {}: {}", id, title))
            }
            PivotAction::SkipRemaining => {
                let remaining: Vec<String> = self
                    .feature
                    .stories
                    .iter()
                    .filter(|s| s.status == StoryStatus::Pending)
                    .map(|s| s.id.clone())
                    .collect();
                for id in &remaining {
                    self.scheduler.mark_blocked(id);
                    self.feature.set_story_status(id, StoryStatus::Skipped);
                }
                self.state.finish(
                    SessionStatus::Completed,
                    Some("Remaining stories skipped by operator".to_string()),
                );
                Some(format!("Skipped {} remaining stories", remaining.len()))
            }
            PivotAction::RestartCurrent => {
                let Some(id) = self.state.current_story_id.clone() else {
                    return Ok(None);
                };
                let Some(previous) = self.feature.story(&id).map(|s| s.status) else {
                    return Ok(None);
                };
                match previous {
                    StoryStatus::Complete => {
                        self.state.stories_completed = self.state.stories_completed.saturating_sub(1)
                    }
                    StoryStatus::Blocked | StoryStatus::Skipped => {
                        self.state.stories_blocked = self.state.stories_blocked.saturating_sub(1)
                    }
                    StoryStatus::Pending | StoryStatus::InProgress => {}
                }
                self.requeue_story(&id);
                self.guidance.remove(&id);
                Some(format!("Restarted story {}", id))
            }
        })
    }

    /// Read-only report for the status hotkey and `claw status`.
    pub fn status_report(&self) -> String {
        let stats = self.stats();
        let mut lines = vec![
            format!(
                "Feature {} ({}): {} {}",
                self.feature.id,
                self.feature.title,
                self.state.status.icon(),
                self.state.status
            ),
            format!(
                "Stories: {}/{} complete, {} blocked, {} remaining ({:.0}%)",
                stats.completed, stats.total, stats.blocked, stats.remaining, stats.percent
            ),
            format!(
                "Iterations: {}  Elapsed: {}",
                self.state.total_iterations,
                format_duration(stats.elapsed)
            ),
        ];
        if let Some(eta) = stats.eta {
            lines.push(format!("ETA: {}", format_duration(eta)));
        }
        if let Some(ref id) = self.state.current_story_id {
            lines.push(format!("Current story: {}", id));
        }
        lines.push(String::new());
        lines.push(self.scheduler.visualize());
        lines.join("\n")
    }
}

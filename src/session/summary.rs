//! Progress stats while a session runs, and the summary printed at the end.

use crate::feature::{Feature, StoryStatus};
use crate::iteration::StuckAnalysis;
use crate::session::{SessionContext, SessionStatus};
use crate::ui::format_duration;
use console::style;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressStats {
    pub total: usize,
    pub completed: usize,
    /// Blocked plus skipped
    pub blocked: usize,
    pub remaining: usize,
    pub percent: f64,
    pub elapsed: Duration,
    /// Average time per finished story times the stories left
    pub eta: Option<Duration>,
}

impl ProgressStats {
    pub fn compute(feature: &Feature, elapsed: Duration, story_times: &[Duration]) -> Self {
        let total = feature.stories.len();
        let completed = feature.count(StoryStatus::Complete);
        let blocked = feature.count(StoryStatus::Blocked) + feature.count(StoryStatus::Skipped);
        let remaining = total.saturating_sub(completed + blocked);
        let percent = if total == 0 {
            100.0
        } else {
            completed as f64 / total as f64 * 100.0
        };
        let eta = average(story_times).map(|avg| avg * remaining as u32);

        Self {
            total,
            completed,
            blocked,
            remaining,
            percent,
            elapsed,
            eta,
        }
    }
}

fn average(times: &[Duration]) -> Option<Duration> {
    if times.is_empty() {
        return None;
    }
    Some(times.iter().sum::<Duration>() / times.len() as u32)
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub feature_id: String,
    pub feature_title: String,
    pub status: SessionStatus,
    pub duration: Duration,
    pub stories_completed: u32,
    pub stories_blocked: u32,
    pub total_iterations: u32,
    pub commits: usize,
    pub prs: Vec<u64>,
    pub avg_story_time: Option<Duration>,
    pub blocker_reason: Option<String>,
    /// Only present in retry mode when some story failed
    pub stuck: Option<StuckAnalysis>,
}

impl SessionSummary {
    pub fn from_context(ctx: &SessionContext) -> Self {
        let stuck = (!ctx.failed_results.is_empty())
            .then(|| crate::iteration::analyze_stuck_patterns(&ctx.failed_results))
            .filter(|analysis| !analysis.is_empty());

        Self {
            feature_id: ctx.feature.id.clone(),
            feature_title: ctx.feature.title.clone(),
            status: ctx.state.status,
            duration: ctx.state.elapsed(),
            stories_completed: ctx.state.stories_completed,
            stories_blocked: ctx.state.stories_blocked,
            total_iterations: ctx.state.total_iterations,
            commits: ctx.commits.len(),
            prs: ctx.prs.clone(),
            avg_story_time: average(&ctx.story_times),
            blocker_reason: ctx.state.blocker_reason.clone(),
            stuck,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    pub fn render(&self) -> String {
        let mut out = Vec::new();
        out.push(format!(
            "{}",
            style(format!("Session summary: {} ({})", self.feature_title, self.feature_id)).bold()
        ));
        out.push(format!(
            "  {:<16}{} {}",
            "Status:",
            self.status.icon(),
            self.status
        ));
        out.push(format!("  {:<16}{}", "Duration:", format_duration(self.duration)));
        out.push(format!(
            "  {:<16}{}",
            "Completed:",
            style(self.stories_completed).green()
        ));
        out.push(format!("  {:<16}{}", "Blocked:", style(self.stories_blocked).red()));
        out.push(format!("  {:<16}{}", "Iterations:", self.total_iterations));
        out.push(format!("  {:<16}{}", "Commits:", self.commits));
        if self.prs.is_empty() {
            out.push(format!("  {:<16}0", "Pull requests:"));
        } else {
            let prs: Vec<String> = self.prs.iter().map(|n| format!("#{}", n)).collect();
            out.push(format!("  {:<16}{}", "Pull requests:", prs.join(", ")));
        }
        if let Some(avg) = self.avg_story_time {
            out.push(format!("  {:<16}{}", "Avg per story:", format_duration(avg)));
        }
        if let Some(ref reason) = self.blocker_reason {
            out.push(format!("  {:<16}{}", "Reason:", style(reason).yellow()));
        }
        if let Some(ref stuck) = self.stuck {
            out.push(String::new());
            out.push(format!(
                "{}",
                style(format!("Failure patterns ({} stuck stories):", stuck.total_stuck)).bold()
            ));
            for pattern in &stuck.patterns {
                out.push(format!("  {:<16}{}", format!("{}:", pattern.pattern), pattern.count));
            }
            for rec in &stuck.recommendations {
                out.push(format!("  - {}", rec));
            }
        }
        out.join("\n")
    }
}

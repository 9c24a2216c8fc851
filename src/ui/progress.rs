use crate::ui::icons::{
    BLOCKER, CHECK, CLOCK, CROSS, LINK, PAUSE, PIVOT, PROGRESS, QUESTION, RUNNING, SAVE, SKIP,
    SPARKLE,
};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

/// Format a duration as `Xs`, `Xm Ys` or `Xh Ym`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

/// Terminal UI for a session, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Story bar: stories settled so far out of the feature total
/// - Agent spinner: the running story with live elapsed time and tool use
///
/// All methods coordinate output via `indicatif`'s `MultiProgress` internally.
pub struct SessionUI {
    multi: MultiProgress,
    story_bar: ProgressBar,
    agent_bar: ProgressBar,
    verbose: bool,
    /// Label shown as the spinner prefix, e.g. `2 (iter 1/5)`
    current: Mutex<String>,
}

impl SessionUI {
    /// Create the UI and add both bars to the multiplex renderer.
    ///
    /// # Arguments
    /// * `total_stories` - number of stories in the feature, sizes the story bar
    /// * `verbose` - when `true`, per-step and thinking output is printed
    pub fn new(total_stories: u64, verbose: bool) -> Self {
        Self::with_target(total_stories, verbose, ProgressDrawTarget::stderr())
    }

    /// A UI that draws nothing. Used for headless runs and tests.
    pub fn hidden(total_stories: u64) -> Self {
        Self::with_target(total_stories, false, ProgressDrawTarget::hidden())
    }

    fn with_target(total_stories: u64, verbose: bool, target: ProgressDrawTarget) -> Self {
        let multi = MultiProgress::with_draw_target(target);

        let story_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let story_bar = multi.add(ProgressBar::new(total_stories));
        story_bar.set_style(story_style);
        story_bar.set_prefix("Stories");

        let agent_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let agent_bar = multi.add(ProgressBar::new_spinner());
        agent_bar.set_style(agent_style);
        agent_bar.set_prefix("  Agent");

        Self {
            multi,
            story_bar,
            agent_bar,
            verbose,
            current: Mutex::new(String::new()),
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the rich UI fails.
    pub fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    fn label(&self) -> String {
        self.current
            .lock()
            .map(|label| label.clone())
            .unwrap_or_default()
    }

    fn set_agent_message(&self, detail: impl std::fmt::Display) {
        self.agent_bar
            .set_message(format!("Story {} {}", style(self.label()).cyan(), detail));
    }

    pub fn print_separator(&self) {
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
    }

    /// Header printed once when a session starts or resumes.
    pub fn print_session_header(&self, feature_id: &str, feature_title: &str, budget: &[String]) {
        self.print_line("");
        self.print_separator();
        self.print_line(format!(
            "{} Feature {}: {}",
            style("▶").green().bold(),
            style(feature_id).yellow().bold(),
            feature_title
        ));
        self.print_separator();
        for line in budget {
            self.print_line(format!("{}  {}", style("Budget:").dim(), line));
        }
        self.print_line(format!(
            "{}",
            style("Hotkeys: [p]ause [s]kip [q]uit [?]ask [v]pivot [i]nfo [h]elp").dim()
        ));
        self.print_line("");
    }

    /// Announce the story about to execute.
    pub fn start_story(&self, id: &str, title: &str) {
        if let Ok(mut label) = self.current.lock() {
            *label = id.to_string();
        }
        self.story_bar
            .set_message(format!("{}: {}", style(id).yellow(), title));
        self.print_line(format!(
            "{} Story {}: {}",
            RUNNING,
            style(id).yellow().bold(),
            title
        ));
        self.set_agent_message(style("(starting...)").dim());
        self.agent_bar
            .enable_steady_tick(Duration::from_millis(100));
    }

    /// Record the iteration counter shown next to the story id.
    pub fn start_iteration(&self, id: &str, iter: u32, max: u32) {
        if let Ok(mut label) = self.current.lock() {
            *label = format!("{} (iter {}/{})", id, iter, max);
        }
        self.set_agent_message(style("(starting...)").dim());
    }

    /// Update the spinner with a short status string.
    ///
    /// In verbose mode the message is also printed as a dim indented line.
    pub fn log_step(&self, msg: &str) {
        self.set_agent_message(style(format!("({})", msg)).dim());
        if self.verbose {
            self.print_line(format!("    {} {}", style("→").dim(), style(msg).dim()));
        }
    }

    /// Refresh the spinner with wall-clock time since the agent started.
    pub fn update_elapsed(&self, elapsed: Duration) {
        self.set_agent_message(style(format!("({})", format_duration(elapsed))).dim());
    }

    /// Show a tool use event (Read, Write, Edit, Bash, etc.)
    pub fn show_tool_use(&self, emoji: &str, description: &str) {
        self.set_agent_message(format!("{} {}", emoji, style(description).yellow()));
        self.print_line(format!("    {} {}", emoji, style(description).yellow()));
    }

    /// Show a brief snippet of the agent's reasoning.
    pub fn show_thinking(&self, snippet: &str) {
        self.set_agent_message(style(format!("💭 {}", snippet)).dim());
        if self.verbose {
            self.print_line(format!(
                "    {} {}",
                style("💭").dim(),
                style(snippet).dim()
            ));
        }
    }

    /// A failed attempt that will be retried.
    pub fn iteration_error(&self, iter: u32, msg: &str) {
        self.print_line(format!(
            "    {} Iteration {} failed: {}",
            CROSS,
            iter,
            style(msg).red()
        ));
    }

    fn settle_story(&self) {
        self.story_bar.inc(1);
        self.agent_bar.disable_steady_tick();
        self.agent_bar.set_message(String::new());
    }

    pub fn story_complete(&self, id: &str, iterations: u32) {
        self.settle_story();
        self.print_line(format!(
            "\n{} Story {} complete ({} iteration{})\n",
            SPARKLE,
            style(id).green().bold(),
            iterations,
            if iterations == 1 { "" } else { "s" }
        ));
    }

    pub fn story_blocked(&self, id: &str, reason: &str) {
        self.settle_story();
        self.print_line(format!(
            "\n{} Story {} blocked: {}\n",
            BLOCKER,
            style(id).red().bold(),
            reason
        ));
    }

    pub fn story_skipped(&self, id: &str) {
        self.settle_story();
        self.print_line(format!(
            "{} Story {} skipped",
            SKIP,
            style(id).yellow().bold()
        ));
    }

    /// The story went back to pending and will run again.
    pub fn story_requeued(&self, id: &str, why: &str) {
        self.agent_bar.disable_steady_tick();
        self.print_line(format!(
            "    {} Story {} requeued: {}",
            PIVOT,
            style(id).yellow(),
            style(why).dim()
        ));
    }

    /// Update the story bar message with completion stats and ETA.
    pub fn update_stats(&self, completed: usize, blocked: usize, eta: Option<Duration>) {
        let eta = eta
            .map(|d| format!(" {}ETA {}", CLOCK, format_duration(d)))
            .unwrap_or_default();
        self.story_bar.set_message(format!(
            "{} {} done, {} blocked{}",
            PROGRESS,
            style(completed).green(),
            style(blocked).red(),
            eta
        ));
    }

    pub fn show_checkpoint(&self, path: &str) {
        if self.verbose {
            self.print_line(format!("    {} Checkpoint saved: {}", SAVE, style(path).dim()));
        }
    }

    pub fn show_pr(&self, number: u64, url: &str) {
        self.print_line(format!(
            "    {} Pull request #{}: {}",
            LINK,
            number,
            style(url).cyan()
        ));
    }

    pub fn show_question(&self, story_id: &str, question: &str) {
        self.print_line(format!(
            "\n{} Story {} needs input: {}\n",
            QUESTION,
            style(story_id).yellow().bold(),
            question
        ));
    }

    pub fn show_answer(&self, answer: &str) {
        self.print_line(format!("{} {}", style("Answer:").cyan().bold(), answer));
    }

    pub fn show_paused(&self) {
        self.print_line(format!("\n{} Session paused\n", PAUSE));
    }

    pub fn show_pivot(&self, description: &str) {
        self.print_line(format!(
            "    {} {}",
            PIVOT,
            style(format!("Pivot: {}", description)).yellow()
        ));
    }

    pub fn show_warning(&self, msg: &str) {
        self.print_line(format!("{} {}", style("warning:").yellow().bold(), msg));
    }

    /// Print a multi-line block as-is, e.g. a status report.
    pub fn show_block(&self, text: &str) {
        for line in text.lines() {
            self.print_line(line);
        }
    }

    pub fn session_finished(&self, success: bool, status: &str) {
        if success {
            self.print_line(format!("\n{} Session {}\n", CHECK, style(status).green().bold()));
        } else {
            self.print_line(format!("\n{} Session {}\n", CROSS, style(status).red().bold()));
        }
    }

    /// Stop both bars, leaving the story bar on screen.
    pub fn finish(&self) {
        self.agent_bar.finish_and_clear();
        self.story_bar.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3 * 3600 + 120)), "3h 2m");
    }

    #[test]
    fn test_hidden_ui_tracks_story_bar() {
        let ui = SessionUI::hidden(3);
        ui.start_story("1", "Login form");
        ui.start_iteration("1", 2, 5);
        assert_eq!(ui.label(), "1 (iter 2/5)");
        ui.story_complete("1", 2);
        ui.start_story("2", "Sessions");
        ui.story_blocked("2", "missing schema");
        assert_eq!(ui.story_bar.position(), 2);
        ui.finish();
    }
}

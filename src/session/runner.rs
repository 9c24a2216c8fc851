//! The session run-loop: pick the next ready story, run it, record the
//! outcome, checkpoint, repeat.
//!
//! Stories run one at a time. Operator interrupts are drained from a
//! channel before every pass, which is also right after the previous
//! story's outcome was recorded; a story that is already executing is
//! never preempted.

use crate::agent::prompt::{question_prompt, story_prompt};
use crate::agent::{AgentOptions, AgentOutcome, AgentReport, ExecutionAgent, OperatorGuidance};
use crate::checkpoint::{CheckpointData, CheckpointStore};
use crate::config::{SessionConfig, SessionOverrides};
use crate::errors::SessionError;
use crate::feature::{Feature, FeatureStore, Story, StoryStatus};
use crate::host::{CodeHost, PrRequest, PullRequest};
use crate::iteration::{INVOKE_GRACE, IterationConfig, IterationEngine};
use crate::session::interrupts::{self, HELP_TEXT, Interrupt, InterruptReceiver};
use crate::session::{
    HeadlessOperator, Operator, SessionContext, SessionStatus, SessionSummary,
};
use crate::store::{DocumentStore, LogEntry};
use crate::tracker::{Workspace, coordinated_commit};
use crate::ui::SessionUI;
use crate::validation::{validate_feature, validate_session_config};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What one story execution produced, in either execution mode.
struct StoryRun {
    outcome: AgentOutcome,
    iterations: u32,
    commits: Vec<String>,
    pr: Option<u64>,
    /// Why retrying stopped, when it did
    stuck_reason: Option<String>,
}

impl StoryRun {
    fn from_report(report: AgentReport) -> Self {
        Self {
            outcome: report.outcome,
            iterations: 1,
            commits: report.commits,
            pr: report.pr,
            stuck_reason: None,
        }
    }
}

/// Deadline for an hours budget. A budget too large to represent means no
/// deadline at all.
fn budget_deadline(now: Instant, hours: f64) -> Option<Instant> {
    if hours.is_nan() {
        return None;
    }
    let budget = Duration::try_from_secs_f64(hours.max(0.0) * 3600.0).ok()?;
    now.checked_add(budget)
}

/// Configuration for a resumed run: file settings, then the checkpoint's
/// settings, then CLI overrides.
///
/// The time budget is the override if one was given, else whatever the
/// checkpointed budget has left (unlimited if it had none), never the
/// original full budget.
pub fn resume_config(
    mut base: SessionConfig,
    checkpoint: &CheckpointData,
    overrides: &SessionOverrides,
    now: DateTime<Utc>,
) -> SessionConfig {
    checkpoint.config.restore_into(&mut base);
    base.apply(overrides);
    base.max_hours = overrides
        .max_hours
        .or_else(|| checkpoint.remaining_hours(now));
    base
}

/// Bring a stored feature up to date with a checkpoint before resuming.
///
/// Stories the checkpoint saw finish count as finished. Blocked stories
/// and stories interrupted mid-run go back to pending so the resumed run
/// retries them.
pub fn reconcile_feature(feature: &mut Feature, checkpoint: &CheckpointData) {
    for story in &mut feature.stories {
        if let Some(progress) = checkpoint.story_progress.get(&story.id) {
            if matches!(story.status, StoryStatus::Pending | StoryStatus::InProgress)
                && matches!(progress.status, StoryStatus::Complete | StoryStatus::Skipped)
            {
                story.status = progress.status;
            }
            story.iterations = story.iterations.max(progress.iterations);
            story.pr = story.pr.or(progress.pr);
        }
        if matches!(story.status, StoryStatus::InProgress | StoryStatus::Blocked) {
            story.status = StoryStatus::Pending;
        }
    }
}

pub struct SessionRunner {
    agent: Arc<dyn ExecutionAgent>,
    store: Arc<dyn DocumentStore>,
    features: FeatureStore,
    checkpoints: CheckpointStore,
    config: SessionConfig,
    engine: IterationEngine,
    operator: Arc<dyn Operator>,
    host: Option<Arc<dyn CodeHost>>,
    workspace: Option<Workspace>,
    ui: Arc<SessionUI>,
    interrupts: Option<InterruptReceiver>,
}

impl SessionRunner {
    pub fn new(
        agent: Arc<dyn ExecutionAgent>,
        store: Arc<dyn DocumentStore>,
        project_path: impl Into<String>,
        config: SessionConfig,
    ) -> Self {
        let project_path = project_path.into();
        let engine = IterationEngine::new(agent.clone(), IterationConfig::from_session(&config));
        Self {
            agent,
            features: FeatureStore::new(store.clone(), project_path.clone()),
            checkpoints: CheckpointStore::new(store.clone(), project_path),
            store,
            config,
            engine,
            operator: Arc::new(HeadlessOperator),
            host: None,
            workspace: None,
            ui: Arc::new(SessionUI::hidden(0)),
            interrupts: None,
        }
    }

    pub fn with_operator(mut self, operator: Arc<dyn Operator>) -> Self {
        self.operator = operator;
        self
    }

    /// Enable pull requests and the commits that precede them.
    pub fn with_host(mut self, host: Arc<dyn CodeHost>, workspace: Workspace) -> Self {
        self.host = Some(host);
        self.workspace = Some(workspace);
        self
    }

    pub fn with_ui(mut self, ui: Arc<SessionUI>) -> Self {
        self.ui = ui;
        self
    }

    pub fn with_interrupts(mut self, rx: InterruptReceiver) -> Self {
        self.interrupts = Some(rx);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start a fresh session for a stored feature.
    pub async fn run(&mut self, feature_id: &str) -> Result<SessionSummary, SessionError> {
        let feature = self.load_feature(feature_id)?;
        self.preflight(&feature)?;
        let ctx = SessionContext::new(feature);
        self.log(&ctx, "session_start", &self.budget_line());
        Ok(self.drive(ctx).await)
    }

    /// Continue a checkpointed session. The checkpoint is deleted before the
    /// run starts so a failed resume never leaves stale pre-resume state.
    pub async fn resume(&mut self, checkpoint: CheckpointData) -> Result<SessionSummary, SessionError> {
        let feature_id = checkpoint.feature_id.clone();
        let mut feature = self.load_feature(&feature_id)?;
        self.preflight(&feature)?;

        if let Err(e) = self.checkpoints.delete(&feature_id) {
            warn!(feature = %feature_id, error = %e, "failed to delete checkpoint before resume");
        }
        reconcile_feature(&mut feature, &checkpoint);

        let ctx = SessionContext::new(feature);
        self.log(
            &ctx,
            "session_start",
            &format!(
                "Resumed from {} checkpoint of {}; {}",
                checkpoint.session_state.status,
                checkpoint.timestamp.format("%Y-%m-%d %H:%M"),
                self.budget_line()
            ),
        );
        Ok(self.drive(ctx).await)
    }

    fn load_feature(&self, feature_id: &str) -> Result<Feature, SessionError> {
        self.features
            .load(feature_id)?
            .ok_or_else(|| SessionError::FeatureNotFound {
                id: feature_id.to_string(),
            })
    }

    fn preflight(&self, feature: &Feature) -> Result<(), SessionError> {
        let config_report = validate_session_config(&self.config);
        if !config_report.is_valid() {
            return Err(SessionError::InvalidConfig(config_report.errors.join("\n")));
        }
        let report = validate_feature(feature);
        if !report.is_valid() {
            return Err(SessionError::InvalidFeature {
                id: feature.id.clone(),
                report: report.errors.join("\n"),
            });
        }
        Ok(())
    }

    fn budget_line(&self) -> String {
        let hours = self
            .config
            .max_hours
            .map_or("unlimited hours".to_string(), |h| format!("{:.2}h", h));
        let stories = self
            .config
            .max_stories
            .map_or("all stories".to_string(), |n| format!("max {} stories", n));
        let mode = if self.config.iterate_until_green {
            format!("retry up to {}", self.config.max_iterations)
        } else {
            "single attempt".to_string()
        };
        format!("{}, {}, {}, {}", hours, stories, mode, self.config.model)
    }

    /// Run the loop to a terminal status. Never fails: story failures become
    /// state, and anything unexpected ends the session as `error`.
    async fn drive(&mut self, mut ctx: SessionContext) -> SessionSummary {
        let deadline = self
            .config
            .max_hours
            .and_then(|h| budget_deadline(Instant::now(), h));

        self.ui.print_session_header(&ctx.feature.id, &ctx.feature.title, &[self.budget_line()]);
        self.save_feature(&mut ctx);

        if let Err(e) = self.run_loop(&mut ctx, deadline).await {
            warn!(feature = %ctx.feature.id, error = %format!("{:#}", e), "session failed");
            ctx.state
                .finish(SessionStatus::Error, Some(format!("{:#}", e)));
        }

        self.finish(&mut ctx).await;
        SessionSummary::from_context(&ctx)
    }

    async fn run_loop(
        &mut self,
        ctx: &mut SessionContext,
        deadline: Option<Instant>,
    ) -> anyhow::Result<()> {
        let mut started_any = false;

        loop {
            // Also the yield point right after the previous outcome was recorded
            self.handle_interrupts(ctx).await;
            if !ctx.state.is_running() {
                break;
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                ctx.state
                    .finish(SessionStatus::Timeout, Some("Time budget exhausted".to_string()));
                break;
            }
            if let Some(max) = self.config.max_stories
                && ctx.state.stories_completed >= max
            {
                ctx.state.finish(
                    SessionStatus::Completed,
                    Some(format!("Story limit of {} reached", max)),
                );
                break;
            }

            let Some(next) = ctx.scheduler.get_next_story() else {
                let progress = ctx.scheduler.progress();
                let settled = ctx.feature.stories.iter().all(|s| {
                    matches!(s.status, StoryStatus::Complete | StoryStatus::Skipped)
                });
                if progress.all_complete() || settled {
                    ctx.state.finish(SessionStatus::Completed, None);
                } else {
                    ctx.state.finish(
                        SessionStatus::Blocked,
                        Some(format!(
                            "No ready stories: {} blocked, {} pending",
                            progress.blocked, progress.pending
                        )),
                    );
                }
                break;
            };
            let story_id = next.id.clone();

            if ctx.skip_next {
                ctx.skip_next = false;
                ctx.skip_story(&story_id);
                ctx.state.current_story_id = Some(story_id.clone());
                self.ui.story_skipped(&story_id);
                self.log(ctx, "story_skipped", &format!("Story {} skipped by operator", story_id));
                self.record(ctx);
                continue;
            }

            if started_any && self.config.pause_between_stories {
                let title = ctx.feature.story(&story_id).map(|s| s.title.clone()).unwrap_or_default();
                let go = self
                    .operator
                    .confirm(&format!("Start story {}: {}?", story_id, title), true);
                if !go {
                    ctx.state.finish(SessionStatus::Paused, None);
                    self.ui.show_paused();
                    break;
                }
            }
            started_any = true;

            self.run_story(ctx, &story_id, deadline).await?;
            self.record(ctx);
        }

        Ok(())
    }

    async fn run_story(
        &mut self,
        ctx: &mut SessionContext,
        story_id: &str,
        deadline: Option<Instant>,
    ) -> anyhow::Result<()> {
        ctx.scheduler.mark_in_progress(story_id);
        ctx.feature.set_story_status(story_id, StoryStatus::InProgress);
        ctx.state.current_story_id = Some(story_id.to_string());
        self.save_feature(ctx);

        let Some(story) = ctx.feature.story(story_id).cloned() else {
            anyhow::bail!("Story {} vanished from feature {}", story_id, ctx.feature.id);
        };
        info!(story = %story.id, title = %story.title, "starting story");
        self.ui.start_story(&story.id, &story.title);
        self.log(ctx, "story_start", &format!("Story {}: {}", story.id, story.title));

        let prompt = story_prompt(&ctx.feature.title, &story, ctx.guidance.get(story_id));
        let mut options = AgentOptions::from_session(&self.config);
        if let Some(deadline) = deadline {
            options = options.capped(deadline.saturating_duration_since(Instant::now()));
        }

        let started = Instant::now();
        let run = if self.config.iterate_until_green {
            self.ui.start_iteration(&story.id, 1, self.config.max_iterations);
            let result = self
                .engine
                .execute_until_green(&story, &prompt, &options, deadline)
                .await;
            for attempt in result.attempts.iter().filter(|a| !a.outcome.is_complete()) {
                if let Some(ref error) = attempt.error {
                    self.ui.iteration_error(attempt.iteration, error);
                }
            }
            if !result.success {
                ctx.failed_results.push(result.clone());
            }
            StoryRun {
                outcome: result.final_outcome,
                iterations: result.iterations,
                commits: result.commits,
                pr: result.pr,
                stuck_reason: result.stuck_reason,
            }
        } else {
            let report = match tokio::time::timeout(
                options.timeout + INVOKE_GRACE,
                self.agent.invoke(&prompt, &options),
            )
            .await
            {
                Ok(report) => report,
                Err(_) => AgentReport::new(AgentOutcome::Timeout {
                    limit: options.timeout,
                }),
            };
            StoryRun::from_report(report)
        };
        let elapsed = started.elapsed();

        ctx.state.total_iterations += run.iterations;
        for sha in &run.commits {
            if !ctx.commits.contains(sha) {
                ctx.commits.push(sha.clone());
            }
        }
        if let Some(story) = ctx.feature.story_mut(story_id) {
            story.iterations += run.iterations;
            story.actual_hours =
                Some(story.actual_hours.unwrap_or(0.0) + elapsed.as_secs_f64() / 3600.0);
            if run.pr.is_some() {
                story.pr = run.pr;
            }
        }
        debug!(story = %story_id, outcome = run.outcome.kind(), iterations = run.iterations, "story finished");

        let budget_gone = deadline.is_some_and(|d| Instant::now() >= d);
        match run.outcome {
            AgentOutcome::Complete => {
                self.complete_story(ctx, &story, &run, elapsed).await?;
            }
            AgentOutcome::NeedsInput { ref question } => {
                self.resolve_question(ctx, &story, question);
            }
            _ if budget_gone => {
                ctx.requeue_story(story_id);
                self.ui.story_requeued(story_id, "time budget exhausted");
                ctx.state.finish(
                    SessionStatus::Timeout,
                    Some(format!("Time budget exhausted during story {}", story_id)),
                );
            }
            AgentOutcome::Blocked { ref reason } => {
                let reason = run.stuck_reason.clone().unwrap_or_else(|| reason.clone());
                self.block(ctx, story_id, &reason, elapsed);
            }
            AgentOutcome::Error { .. } | AgentOutcome::Timeout { .. } => {
                let reason = run
                    .stuck_reason
                    .clone()
                    .or_else(|| run.outcome.error_text())
                    .unwrap_or_else(|| "unknown error".to_string());
                self.block(ctx, story_id, &reason, elapsed);
            }
        }

        let stats = ctx.stats();
        self.ui.update_stats(stats.completed, stats.blocked, stats.eta);
        Ok(())
    }

    async fn complete_story(
        &mut self,
        ctx: &mut SessionContext,
        story: &Story,
        run: &StoryRun,
        elapsed: Duration,
    ) -> anyhow::Result<()> {
        let unblocked = ctx.scheduler.mark_complete(&story.id);
        ctx.feature.set_story_status(&story.id, StoryStatus::Complete);
        ctx.state.stories_completed += 1;
        ctx.story_times.push(elapsed);
        ctx.guidance.remove(&story.id);
        if !unblocked.is_empty() {
            debug!(story = %story.id, unblocked = ?unblocked, "stories now ready");
        }

        self.ui.story_complete(&story.id, run.iterations);
        self.log(
            ctx,
            "story_complete",
            &format!(
                "Story {}: {} ({} iterations, {} commits)",
                story.id,
                story.title,
                run.iterations,
                run.commits.len()
            ),
        );

        if self.config.create_pr_per_story {
            self.open_story_pr(ctx, story, run.pr).await?;
        }
        Ok(())
    }

    fn block(&self, ctx: &mut SessionContext, story_id: &str, reason: &str, elapsed: Duration) {
        ctx.block_story(story_id);
        ctx.story_times.push(elapsed);
        ctx.state.blocker_reason = Some(reason.to_string());
        warn!(story = %story_id, reason = %reason, "story blocked");
        self.ui.story_blocked(story_id, reason);
        self.log(ctx, "story_blocked", &format!("Story {}: {}", story_id, reason));

        if self.config.stop_on_blocker {
            ctx.state.finish(
                SessionStatus::Blocked,
                Some(format!("Story {} blocked: {}", story_id, reason)),
            );
        }
    }

    /// Pause on a question, collect an answer, and either requeue the story
    /// with the answer as guidance or block it when no answer comes.
    fn resolve_question(&self, ctx: &mut SessionContext, story: &Story, question: &str) {
        ctx.state.status = SessionStatus::Paused;
        ctx.state.pending_question = Some(question.to_string());
        self.save_checkpoint(ctx);
        self.ui.show_question(&story.id, question);
        self.log(ctx, "needs_input", &format!("Story {}: {}", story.id, question));

        let answer = self.operator.input("Your answer");
        ctx.state.pending_question = None;
        ctx.state.status = SessionStatus::Running;

        if answer.is_empty() {
            self.block(ctx, &story.id, question, Duration::ZERO);
            return;
        }

        self.log(ctx, "operator_answer", &format!("Story {}: {}", story.id, answer));
        ctx.guidance.insert(
            story.id.clone(),
            OperatorGuidance {
                question: question.to_string(),
                answer,
            },
        );
        ctx.requeue_story(&story.id);
        self.ui.story_requeued(&story.id, "operator answered");
    }

    /// Commit what the agent left uncommitted, push, and open (or reuse) a
    /// pull request for one story.
    async fn open_story_pr(
        &self,
        ctx: &mut SessionContext,
        story: &Story,
        reported: Option<u64>,
    ) -> anyhow::Result<()> {
        let (Some(host), Some(workspace)) = (&self.host, &self.workspace) else {
            return Ok(());
        };

        if let Some(number) = reported {
            ctx.prs.push(number);
            return Ok(());
        }

        let targets = workspace.commit_targets(story);
        let report = coordinated_commit(&targets, &format!("Story {}: {}", story.id, story.title))
            .into_result()?;
        if !report.all_succeeded() {
            let failed: Vec<String> = report
                .results
                .iter()
                .filter(|r| !r.success)
                .map(|r| format!("{}: {}", r.repo, r.error.as_deref().unwrap_or("unknown")))
                .collect();
            self.ui
                .show_warning(&format!("Skipping pull request, commit failed ({})", failed.join("; ")));
            return Ok(());
        }
        for sha in report.committed_shas() {
            ctx.commits.push(sha.to_string());
        }

        let body = format!(
            "Story {} of {}.\n\n{}",
            story.id,
            ctx.feature.title,
            story
                .scope
                .iter()
                .map(|s| format!("- {}", s))
                .collect::<Vec<_>>()
                .join("\n")
        );
        let request = PrRequest::new(format!("Story {}: {}", story.id, story.title), body);
        if let Some(pr) = self.publish(host.as_ref(), &request).await {
            if let Some(s) = ctx.feature.story_mut(&story.id) {
                s.pr = Some(pr.number);
                s.branch = Some(pr.branch.clone());
            }
            ctx.prs.push(pr.number);
            self.log(ctx, "pr_created", &format!("Story {}: #{} {}", story.id, pr.number, pr.url));
        }
        Ok(())
    }

    /// Push and create a pull request, reusing an open one for the branch.
    async fn publish(&self, host: &dyn CodeHost, request: &PrRequest) -> Option<PullRequest> {
        if !host.push_branch().await {
            self.ui.show_warning("Push failed; no pull request created");
            return None;
        }
        match host.existing_pr().await {
            Ok(Some(pr)) => {
                self.ui.show_pr(pr.number, &pr.url);
                return Some(pr);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not check for an existing pull request"),
        }
        match host.create_pr(request).await {
            Ok(pr) => {
                info!(number = pr.number, url = %pr.url, "pull request created");
                self.ui.show_pr(pr.number, &pr.url);
                Some(pr)
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "pull request creation failed");
                self.ui.show_warning(&format!("Pull request creation failed: {:#}", e));
                None
            }
        }
    }

    async fn open_feature_pr(&self, ctx: &mut SessionContext) {
        let Some(ref host) = self.host else {
            return;
        };
        let completed: Vec<&Story> = ctx
            .feature
            .stories
            .iter()
            .filter(|s| s.status == StoryStatus::Complete)
            .collect();

        let mut body = format!("## {}\n\n### Stories\n", ctx.feature.title);
        for story in &completed {
            body.push_str(&format!("- [x] {}: {}\n", story.id, story.title));
        }
        if !ctx.commits.is_empty() {
            body.push_str("\n### Commits\n");
            for sha in &ctx.commits {
                body.push_str(&format!("- {}\n", &sha[..sha.len().min(12)]));
            }
        }
        let request = PrRequest::new(ctx.feature.title.clone(), body);

        if let Some(pr) = self.publish(host.as_ref(), &request).await {
            if !ctx.prs.contains(&pr.number) {
                ctx.prs.push(pr.number);
            }
            self.log(ctx, "pr_created", &format!("Feature: #{} {}", pr.number, pr.url));
        }
    }

    async fn handle_interrupts(&mut self, ctx: &mut SessionContext) {
        let pending = match self.interrupts.as_mut() {
            Some(rx) => interrupts::drain(rx),
            None => return,
        };

        for interrupt in pending {
            if !ctx.state.is_running() {
                break;
            }
            debug!(?interrupt, "handling interrupt");
            match interrupt {
                Interrupt::Pause => {
                    ctx.state.status = SessionStatus::Paused;
                    self.save_checkpoint(ctx);
                    self.ui.show_paused();
                    if self.operator.confirm("Session paused. Continue now?", false) {
                        ctx.state.status = SessionStatus::Running;
                    } else {
                        self.log(ctx, "session_paused", "Paused by operator");
                    }
                }
                Interrupt::Skip => {
                    ctx.skip_next = true;
                    self.operator.show("The next story will be skipped");
                }
                Interrupt::Abort => {
                    ctx.state
                        .finish(SessionStatus::Error, Some("Aborted by operator".to_string()));
                    self.save_checkpoint(ctx);
                }
                Interrupt::Ask => {
                    let question = self.operator.input("Question for the agent");
                    if question.is_empty() {
                        continue;
                    }
                    let current = ctx
                        .state
                        .current_story_id
                        .as_deref()
                        .and_then(|id| ctx.feature.story(id));
                    let prompt = question_prompt(&ctx.feature.title, current, &question);
                    match self.agent.ask(&prompt, &AgentOptions::for_question()).await {
                        Ok(answer) => self.operator.show(&answer),
                        Err(e) => self.ui.show_warning(&format!("Question failed: {:#}", e)),
                    }
                }
                Interrupt::Status => self.operator.show(&ctx.status_report()),
                Interrupt::Pivot => {
                    let action = self.operator.choose_pivot(ctx);
                    match ctx.apply_pivot(action) {
                        Ok(Some(description)) => {
                            self.ui.show_pivot(&description);
                            self.log(ctx, "pivot", &description);
                            self.save_feature(ctx);
                            self.save_checkpoint(ctx);
                        }
                        Ok(None) => {}
                        Err(e) => self.ui.show_warning(&format!("Pivot failed: {:#}", e)),
                    }
                }
                Interrupt::Help => self.operator.show(HELP_TEXT),
            }
        }
    }

    /// Persist the feature and a checkpoint after a story outcome.
    fn record(&self, ctx: &mut SessionContext) {
        self.save_feature(ctx);
        self.save_checkpoint(ctx);
    }

    async fn finish(&self, ctx: &mut SessionContext) {
        if ctx.state.is_running() {
            ctx.state.finish(SessionStatus::Completed, None);
        }

        if self.config.create_pr_on_complete && ctx.state.stories_completed > 0 {
            self.open_feature_pr(ctx).await;
        }
        self.save_feature(ctx);

        if ctx.state.status == SessionStatus::Completed {
            if self.checkpoints.exists(&ctx.feature.id)
                && let Err(e) = self.checkpoints.delete(&ctx.feature.id)
            {
                warn!(feature = %ctx.feature.id, error = %e, "failed to delete checkpoint");
            }
        } else {
            self.save_checkpoint(ctx);
        }

        self.log(
            ctx,
            "session_end",
            &format!(
                "{}: {} completed, {} blocked, {} iterations",
                ctx.state.status,
                ctx.state.stories_completed,
                ctx.state.stories_blocked,
                ctx.state.total_iterations
            ),
        );
        info!(
            feature = %ctx.feature.id,
            status = %ctx.state.status,
            completed = ctx.state.stories_completed,
            blocked = ctx.state.stories_blocked,
            "session finished"
        );
        self.ui.finish();
        self.ui
            .session_finished(ctx.state.status == SessionStatus::Completed, ctx.state.status.as_str());
    }

    fn save_feature(&self, ctx: &mut SessionContext) {
        ctx.feature.status = ctx.feature.derived_status();
        if let Err(e) = self.features.save(&mut ctx.feature) {
            warn!(feature = %ctx.feature.id, error = %e, "failed to save feature");
        }
    }

    fn save_checkpoint(&self, ctx: &SessionContext) {
        match self.checkpoints.save(&ctx.feature, &ctx.state, &self.config) {
            Ok(_) => self.ui.show_checkpoint(&self.checkpoints.path(&ctx.feature.id)),
            Err(e) => warn!(feature = %ctx.feature.id, error = %e, "failed to save checkpoint"),
        }
    }

    fn log(&self, ctx: &SessionContext, action: &str, details: &str) {
        let path = self.features.session_log_path(&ctx.feature.id);
        if !self
            .store
            .append_session_log(&path, &LogEntry::now(action, details))
        {
            warn!(path = %path, action, "failed to append session log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::ScriptedAgent;
    use crate::config::RetryPolicy;
    use crate::host::Issue;
    use crate::session::PivotAction;
    use crate::session::interrupts::channel;
    use crate::session::operator::testing::ScriptedOperator;
    use crate::store::MarkdownVault;
    use crate::tracker::git::test_support::{commit_file, init_repo};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::{TempDir, tempdir};

    const PROJECT: &str = "Projects/demo";

    struct Harness {
        _dir: TempDir,
        store: Arc<dyn DocumentStore>,
    }

    impl Harness {
        fn new(feature: Feature) -> Self {
            let dir = tempdir().unwrap();
            let store: Arc<dyn DocumentStore> = Arc::new(MarkdownVault::new(dir.path()));
            let mut feature = feature;
            FeatureStore::new(store.clone(), PROJECT)
                .save(&mut feature)
                .unwrap();
            Self { _dir: dir, store }
        }

        fn runner(&self, agent: Arc<ScriptedAgent>, config: SessionConfig) -> SessionRunner {
            SessionRunner::new(agent, self.store.clone(), PROJECT, config)
        }

        fn feature(&self, id: &str) -> Feature {
            FeatureStore::new(self.store.clone(), PROJECT)
                .load(id)
                .unwrap()
                .unwrap()
        }

        fn checkpoints(&self) -> CheckpointStore {
            CheckpointStore::new(self.store.clone(), PROJECT)
        }

        fn session_log(&self, id: &str) -> String {
            let path = FeatureStore::new(self.store.clone(), PROJECT).session_log_path(id);
            self.store
                .read_note(&path)
                .unwrap()
                .map(|n| n.content)
                .unwrap_or_default()
        }
    }

    fn config() -> SessionConfig {
        SessionConfig::default()
            .with_pause_between_stories(false)
            .with_prs(false, false)
            .with_retry_policy(RetryPolicy {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                multiplier: 2.0,
                fatal_errors: crate::config::default_fatal_errors(),
            })
    }

    fn abc_feature() -> Feature {
        Feature::new("checkout", "Checkout flow").with_stories(vec![
            Story::new("1", "Build the cart page").with_scope(&["cart"]),
            Story::new("2", "Add payment form").with_scope(&["payment"]).with_blocked_by(&["1"]),
            Story::new("3", "Send receipt emails").with_scope(&["email"]).with_blocked_by(&["1"]),
        ])
    }

    fn independent_feature() -> Feature {
        Feature::new("search", "Search").with_stories(vec![
            Story::new("1", "Index product names").with_scope(&["index"]),
            Story::new("2", "Add search endpoint").with_scope(&["api"]),
        ])
    }

    fn story_order(agent: &ScriptedAgent) -> Vec<String> {
        agent
            .prompts()
            .iter()
            .filter_map(|p| {
                p.lines()
                    .find(|l| l.starts_with("## Story "))
                    .map(|l| l.trim_start_matches("## Story ").split(':').next().unwrap().to_string())
            })
            .collect()
    }

    #[tokio::test]
    async fn test_runs_stories_in_dependency_order() {
        let harness = Harness::new(abc_feature());
        let agent = Arc::new(ScriptedAgent::always_complete());
        let mut runner = harness.runner(agent.clone(), config());

        let summary = runner.run("checkout").await.unwrap();

        assert_eq!(summary.status, SessionStatus::Completed);
        assert_eq!(summary.stories_completed, 3);
        assert_eq!(summary.total_iterations, 3);
        assert_eq!(story_order(&agent), vec!["1", "2", "3"]);

        let feature = harness.feature("checkout");
        assert!(feature.stories.iter().all(|s| s.status == StoryStatus::Complete));
        assert!(!harness.checkpoints().exists("checkout"));

        let log = harness.session_log("checkout");
        assert!(log.contains("session_start"));
        assert_eq!(log.matches("story_complete").count(), 3);
        assert!(log.contains("session_end"));
    }

    #[tokio::test]
    async fn test_repeated_blocker_stops_after_three_iterations() {
        let harness = Harness::new(Feature::new("auth", "Authentication").with_stories(vec![
            Story::new("1", "Add login endpoint").with_scope(&["login"]),
        ]));
        let agent = Arc::new(ScriptedAgent::new(vec![AgentReport::blocked(
            "integration tests fail against staging",
        )]));
        let mut runner = harness.runner(agent.clone(), config().with_retry_mode(true, 5));

        let summary = runner.run("auth").await.unwrap();

        assert_eq!(agent.invocations(), 3);
        assert_eq!(summary.status, SessionStatus::Blocked);
        assert_eq!(summary.total_iterations, 3);
        assert!(summary.stuck.is_some());
        assert_eq!(harness.feature("auth").stories[0].status, StoryStatus::Blocked);
        assert!(summary.blocker_reason.unwrap().contains("No ready stories"));
        assert!(harness.checkpoints().exists("auth"));
    }

    #[tokio::test]
    async fn test_deadline_ends_session_as_timeout() {
        let harness = Harness::new(abc_feature());
        let agent = Arc::new(ScriptedAgent::always_complete().with_delay(Duration::from_secs(5)));
        let mut runner = harness.runner(agent.clone(), config().with_max_hours(Some(0.0001)));

        let summary = runner.run("checkout").await.unwrap();

        assert_eq!(summary.status, SessionStatus::Timeout);
        assert_eq!(summary.stories_completed, 0);
        let feature = harness.feature("checkout");
        assert!(feature.stories.iter().all(|s| s.status != StoryStatus::Complete));
        assert_eq!(feature.stories[0].status, StoryStatus::Pending);
        assert!(agent.options.lock().unwrap()[0].timeout < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let harness = Harness::new(Feature::new("auth", "Authentication").with_stories(vec![
            Story::new("1", "Add login endpoint").with_scope(&["login"]),
        ]));
        let agent = Arc::new(ScriptedAgent::new(vec![AgentReport::error(
            "Authentication failed: token expired",
        )]));
        let mut runner = harness.runner(agent.clone(), config().with_retry_mode(true, 5));

        let summary = runner.run("auth").await.unwrap();

        assert_eq!(agent.invocations(), 1);
        assert_eq!(summary.status, SessionStatus::Blocked);
        assert_eq!(harness.feature("auth").stories[0].status, StoryStatus::Blocked);
    }

    #[tokio::test]
    async fn test_stop_on_blocker_halts_loop() {
        let harness = Harness::new(independent_feature());
        let agent = Arc::new(ScriptedAgent::new(vec![AgentReport::blocked("schema missing")]));
        let mut runner = harness.runner(agent.clone(), config().with_stop_on_blocker(true));

        let summary = runner.run("search").await.unwrap();

        assert_eq!(agent.invocations(), 1);
        assert_eq!(summary.status, SessionStatus::Blocked);
        assert_eq!(
            summary.blocker_reason.as_deref(),
            Some("Story 1 blocked: schema missing")
        );
    }

    #[tokio::test]
    async fn test_error_without_stop_continues_to_next_story() {
        let harness = Harness::new(independent_feature());
        let agent = Arc::new(ScriptedAgent::new(vec![
            AgentReport::error("agent exited with code 1"),
            AgentReport::complete(),
        ]));
        let mut runner = harness.runner(agent.clone(), config());

        let summary = runner.run("search").await.unwrap();

        assert_eq!(agent.invocations(), 2);
        assert_eq!(summary.stories_completed, 1);
        assert_eq!(summary.stories_blocked, 1);
        assert_eq!(summary.status, SessionStatus::Blocked);
    }

    #[tokio::test]
    async fn test_operator_answer_is_threaded_into_next_prompt() {
        let harness = Harness::new(Feature::new("auth", "Authentication").with_stories(vec![
            Story::new("1", "Add session storage").with_scope(&["sessions"]),
        ]));
        let agent = Arc::new(ScriptedAgent::new(vec![
            AgentReport::needs_input("Redis or Postgres for sessions?"),
            AgentReport::complete(),
        ]));
        let operator = Arc::new(ScriptedOperator::new().with_answers(&["Postgres"]));
        let mut runner = harness
            .runner(agent.clone(), config())
            .with_operator(operator);

        let summary = runner.run("auth").await.unwrap();

        assert_eq!(summary.status, SessionStatus::Completed);
        let prompts = agent.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(!prompts[0].contains("## Operator Guidance"));
        assert!(prompts[1].contains("You previously asked: Redis or Postgres for sessions?"));
        assert!(prompts[1].contains("The operator answered: Postgres"));
        let log = harness.session_log("auth");
        assert!(log.contains("needs_input"));
        assert!(log.contains("operator_answer"));
    }

    #[tokio::test]
    async fn test_unanswered_question_blocks_story() {
        let harness = Harness::new(Feature::new("auth", "Authentication").with_stories(vec![
            Story::new("1", "Add session storage").with_scope(&["sessions"]),
        ]));
        let agent = Arc::new(ScriptedAgent::new(vec![AgentReport::needs_input(
            "Which session store?",
        )]));
        let mut runner = harness.runner(agent.clone(), config());

        let summary = runner.run("auth").await.unwrap();

        assert_eq!(agent.invocations(), 1);
        assert_eq!(summary.status, SessionStatus::Blocked);
        assert_eq!(harness.feature("auth").stories[0].status, StoryStatus::Blocked);
    }

    #[tokio::test]
    async fn test_max_stories_limits_session() {
        let harness = Harness::new(independent_feature());
        let agent = Arc::new(ScriptedAgent::always_complete());
        let mut runner = harness.runner(agent.clone(), config().with_max_stories(Some(1)));

        let summary = runner.run("search").await.unwrap();

        assert_eq!(agent.invocations(), 1);
        assert_eq!(summary.status, SessionStatus::Completed);
        assert_eq!(harness.feature("search").stories[1].status, StoryStatus::Pending);
    }

    #[tokio::test]
    async fn test_declined_pause_between_stories() {
        let harness = Harness::new(independent_feature());
        let agent = Arc::new(ScriptedAgent::always_complete());
        let operator = Arc::new(ScriptedOperator::new().with_confirms(&[false]));
        let mut runner = harness
            .runner(agent.clone(), config().with_pause_between_stories(true))
            .with_operator(operator);

        let summary = runner.run("search").await.unwrap();

        assert_eq!(agent.invocations(), 1);
        assert_eq!(summary.status, SessionStatus::Paused);
        assert!(harness.checkpoints().load("search").unwrap().unwrap().is_resumable());
    }

    #[tokio::test]
    async fn test_skip_interrupt_skips_next_story() {
        let harness = Harness::new(independent_feature());
        let agent = Arc::new(ScriptedAgent::always_complete());
        let (tx, rx) = channel();
        tx.send(Interrupt::Skip).unwrap();
        let mut runner = harness.runner(agent.clone(), config()).with_interrupts(rx);

        let summary = runner.run("search").await.unwrap();

        assert_eq!(story_order(&agent), vec!["2"]);
        assert_eq!(summary.stories_blocked, 1);
        assert_eq!(summary.status, SessionStatus::Completed);
        assert_eq!(harness.feature("search").stories[0].status, StoryStatus::Skipped);
        assert!(harness.session_log("search").contains("story_skipped"));
    }

    #[tokio::test]
    async fn test_abort_interrupt_checkpoints_and_errors() {
        let harness = Harness::new(independent_feature());
        let agent = Arc::new(ScriptedAgent::always_complete());
        let (tx, rx) = channel();
        tx.send(Interrupt::Abort).unwrap();
        let mut runner = harness.runner(agent.clone(), config()).with_interrupts(rx);

        let summary = runner.run("search").await.unwrap();

        assert_eq!(agent.invocations(), 0);
        assert_eq!(summary.status, SessionStatus::Error);
        assert_eq!(summary.blocker_reason.as_deref(), Some("Aborted by operator"));
        assert_eq!(summary.exit_code(), 1);
        let checkpoint = harness.checkpoints().load("search").unwrap().unwrap();
        assert_eq!(checkpoint.session_state.status, SessionStatus::Error);
    }

    #[tokio::test]
    async fn test_pivot_skip_remaining_completes() {
        let harness = Harness::new(independent_feature());
        let agent = Arc::new(ScriptedAgent::always_complete());
        let (tx, rx) = channel();
        tx.send(Interrupt::Pivot).unwrap();
        let operator = Arc::new(ScriptedOperator::new().with_pivot(PivotAction::SkipRemaining));
        let mut runner = harness
            .runner(agent.clone(), config())
            .with_operator(operator)
            .with_interrupts(rx);

        let summary = runner.run("search").await.unwrap();

        assert_eq!(agent.invocations(), 0);
        assert_eq!(summary.status, SessionStatus::Completed);
        assert!(harness.session_log("search").contains("pivot"));
    }

    #[tokio::test]
    async fn test_ask_and_status_do_not_affect_scheduling() {
        let harness = Harness::new(independent_feature());
        let agent = Arc::new(ScriptedAgent::always_complete().with_answer("Use the trigram index"));
        let (tx, rx) = channel();
        tx.send(Interrupt::Ask).unwrap();
        tx.send(Interrupt::Status).unwrap();
        let operator = Arc::new(ScriptedOperator::new().with_answers(&["Which index type?"]));
        let mut runner = harness
            .runner(agent.clone(), config())
            .with_operator(operator.clone())
            .with_interrupts(rx);

        let summary = runner.run("search").await.unwrap();

        assert_eq!(summary.status, SessionStatus::Completed);
        let shown = operator.shown();
        assert_eq!(shown[0], "Use the trigram index");
        assert!(shown[1].contains("Stories: 0/2 complete"));
        assert!(agent.prompts()[0].contains("Question: Which index type?"));
        assert_eq!(story_order(&agent), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_resume_continues_paused_session() {
        let harness = Harness::new(independent_feature());
        let agent = Arc::new(ScriptedAgent::always_complete());
        let operator = Arc::new(ScriptedOperator::new().with_confirms(&[false]));
        let mut runner = harness
            .runner(agent.clone(), config().with_pause_between_stories(true))
            .with_operator(operator);
        runner.run("search").await.unwrap();

        let checkpoint = harness.checkpoints().load("search").unwrap().unwrap();
        let resumed_config = resume_config(config(), &checkpoint, &SessionOverrides::default(), Utc::now());
        let mut resumed = harness.runner(agent.clone(), resumed_config);
        let summary = resumed.resume(checkpoint).await.unwrap();

        assert_eq!(summary.status, SessionStatus::Completed);
        assert_eq!(summary.stories_completed, 1);
        assert_eq!(agent.invocations(), 2);
        assert!(!harness.checkpoints().exists("search"));
        assert!(harness.session_log("search").contains("Resumed from paused checkpoint"));
    }

    #[test]
    fn test_resume_config_uses_remaining_budget() {
        let feature = independent_feature();
        let mut state = crate::session::SessionState::new("search");
        state.start_time = Utc::now() - chrono::Duration::minutes(30);
        let original = config().with_max_hours(Some(2.0)).with_retry_mode(true, 7);
        let checkpoint = CheckpointData::capture(&feature, &state, &original);

        let resumed = resume_config(config(), &checkpoint, &SessionOverrides::default(), Utc::now());
        let hours = resumed.max_hours.unwrap();
        assert!(hours > 1.49 && hours < 1.51);
        assert!(resumed.iterate_until_green);
        assert_eq!(resumed.max_iterations, 7);

        let overrides = SessionOverrides {
            max_hours: Some(4.0),
            ..SessionOverrides::default()
        };
        let resumed = resume_config(config(), &checkpoint, &overrides, Utc::now());
        assert_eq!(resumed.max_hours, Some(4.0));

        let unlimited = CheckpointData::capture(&feature, &state, &config());
        let resumed = resume_config(
            config().with_max_hours(Some(8.0)),
            &unlimited,
            &SessionOverrides::default(),
            Utc::now(),
        );
        assert_eq!(resumed.max_hours, None);
    }

    #[test]
    fn test_reconcile_feature() {
        let mut feature = Feature::new("search", "Search").with_stories(vec![
            Story::new("1", "Index product names"),
            Story::new("2", "Add search endpoint").with_status(StoryStatus::InProgress),
            Story::new("3", "Rank results").with_status(StoryStatus::Blocked),
        ]);
        let mut progressed = feature.clone();
        progressed.set_story_status("1", StoryStatus::Complete);
        progressed.stories[0].iterations = 2;
        let checkpoint = CheckpointData::capture(
            &progressed,
            &crate::session::SessionState::new("search"),
            &config(),
        );

        reconcile_feature(&mut feature, &checkpoint);
        assert_eq!(feature.stories[0].status, StoryStatus::Complete);
        assert_eq!(feature.stories[0].iterations, 2);
        assert_eq!(feature.stories[1].status, StoryStatus::Pending);
        assert_eq!(feature.stories[2].status, StoryStatus::Pending);
    }

    #[tokio::test]
    async fn test_unknown_feature_is_an_error() {
        let harness = Harness::new(independent_feature());
        let mut runner = harness.runner(Arc::new(ScriptedAgent::always_complete()), config());
        let err = runner.run("missing").await.unwrap_err();
        assert!(matches!(err, SessionError::FeatureNotFound { .. }));
    }

    #[tokio::test]
    async fn test_unrepresentable_budget_is_rejected() {
        for hours in [f64::INFINITY, f64::NAN, 1e16] {
            let harness = Harness::new(independent_feature());
            let mut runner = harness.runner(
                Arc::new(ScriptedAgent::always_complete()),
                config().with_max_hours(Some(hours)),
            );
            let err = runner.run("search").await.unwrap_err();
            assert!(matches!(err, SessionError::InvalidConfig(_)), "{} hours", hours);
        }
    }

    #[test]
    fn test_budget_deadline_overflow_is_unlimited() {
        let now = Instant::now();
        assert_eq!(budget_deadline(now, 1e16), None);
        assert_eq!(budget_deadline(now, f64::INFINITY), None);
        assert_eq!(budget_deadline(now, f64::NAN), None);
        assert_eq!(budget_deadline(now, -1.0), Some(now));
        assert_eq!(
            budget_deadline(now, 0.5),
            Some(now + Duration::from_secs(1800))
        );
    }

    #[tokio::test]
    async fn test_cyclic_feature_is_rejected() {
        let harness = Harness::new(Feature::new("loop", "Loop").with_stories(vec![
            Story::new("1", "First story here").with_blocked_by(&["2"]),
            Story::new("2", "Second story here").with_blocked_by(&["1"]),
        ]));
        let mut runner = harness.runner(Arc::new(ScriptedAgent::always_complete()), config());
        let err = runner.run("loop").await.unwrap_err();
        assert!(err.to_string().contains("Circular dependency"));
    }

    #[derive(Default)]
    struct FakeHost {
        created: Mutex<Vec<PrRequest>>,
    }

    #[async_trait]
    impl CodeHost for FakeHost {
        async fn create_pr(&self, request: &PrRequest) -> Result<PullRequest> {
            let mut created = self.created.lock().unwrap();
            created.push(request.clone());
            let number = 40 + created.len() as u64;
            Ok(PullRequest {
                number,
                url: format!("https://github.com/acme/shop/pull/{}", number),
                branch: "claw/search".to_string(),
            })
        }

        async fn existing_pr(&self) -> Result<Option<PullRequest>> {
            Ok(None)
        }

        async fn push_branch(&self) -> bool {
            true
        }

        async fn default_branch(&self) -> Result<String> {
            Ok("main".to_string())
        }

        async fn create_issue(&self, _title: &str, _body: &str, _labels: &[String]) -> Result<Issue> {
            anyhow::bail!("issues are not used here")
        }

        async fn close_issue(&self, _number: u64) -> Result<()> {
            Ok(())
        }

        async fn list_issues(&self, _labels: &[String]) -> Result<Vec<Issue>> {
            Ok(Vec::new())
        }

        async fn get_issue(&self, _number: u64) -> Result<Option<Issue>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_pull_requests_per_story_and_feature() {
        let harness = Harness::new(independent_feature());
        let repo = tempdir().unwrap();
        init_repo(repo.path());
        commit_file(repo.path(), "README.md", "shop", "init");
        std::fs::write(repo.path().join("search.rs"), "fn search() {}").unwrap();

        let host = Arc::new(FakeHost::default());
        let agent = Arc::new(ScriptedAgent::always_complete());
        let mut runner = harness
            .runner(agent, config().with_prs(true, true))
            .with_host(host.clone(), Workspace::new(repo.path()));

        let summary = runner.run("search").await.unwrap();

        assert_eq!(summary.status, SessionStatus::Completed);
        let created = host.created.lock().unwrap();
        assert_eq!(created.len(), 3);
        assert_eq!(created[0].title, "Story 1: Index product names");
        assert_eq!(created[2].title, "Search");
        assert!(created[2].body.contains("- [x] 2: Add search endpoint"));
        assert_eq!(summary.prs, vec![41, 42, 43]);
        // Leftover working tree changes were committed for the first story
        assert_eq!(summary.commits, 1);
        assert_eq!(harness.feature("search").stories[0].pr, Some(41));
    }
}

//! Retry-until-green execution of a single story.
//!
//! The engine invokes the agent repeatedly, feeding the previous failure into
//! the next prompt, and stops early on:
//! - `needs_input` (a human has to answer first)
//! - fatal errors matched against the configured deny-list
//! - three consecutive identical errors (stuck)
//!
//! Between attempts it sleeps with exponential backoff capped at the
//! configured maximum delay.

mod patterns;

pub use patterns::{PatternCount, StuckAnalysis, analyze_stuck_patterns};

use crate::agent::prompt::with_previous_failure;
use crate::agent::{AgentOptions, AgentOutcome, AgentReport, ExecutionAgent};
use crate::config::{RetryPolicy, SessionConfig};
use crate::feature::Story;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Consecutive identical errors that count as stuck.
const STUCK_THRESHOLD: usize = 3;

/// Extra time allowed past the agent's own timeout before the engine gives up on it.
pub(crate) const INVOKE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct IterationConfig {
    pub max_iterations: u32,
    pub retry: RetryPolicy,
}

impl IterationConfig {
    pub fn from_session(config: &SessionConfig) -> Self {
        Self {
            max_iterations: config.max_iterations.max(1),
            retry: config.retry.clone(),
        }
    }
}

/// One recorded agent invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationAttempt {
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
    pub outcome: AgentOutcome,
    pub error: Option<String>,
    pub duration: Duration,
}

/// Retry bookkeeping for one story.
#[derive(Debug, Clone)]
pub struct IterationState {
    pub story_id: String,
    pub iteration: u32,
    pub start_time: DateTime<Utc>,
    pub last_error: Option<String>,
    pub attempts: Vec<IterationAttempt>,
}

impl IterationState {
    fn new(story_id: &str) -> Self {
        Self {
            story_id: story_id.to_string(),
            iteration: 0,
            start_time: Utc::now(),
            last_error: None,
            attempts: Vec::new(),
        }
    }

    /// The last three attempts failed with the same non-empty error.
    pub fn is_stuck(&self) -> bool {
        if self.attempts.len() < STUCK_THRESHOLD {
            return false;
        }
        let recent = &self.attempts[self.attempts.len() - STUCK_THRESHOLD..];
        let Some(first) = recent[0].error.as_deref().filter(|e| !e.is_empty()) else {
            return false;
        };
        recent
            .iter()
            .all(|a| a.error.as_deref() == Some(first))
    }
}

#[derive(Debug, Clone)]
pub struct IterationResult {
    pub success: bool,
    pub iterations: u32,
    pub final_outcome: AgentOutcome,
    pub stuck_reason: Option<String>,
    pub attempts: Vec<IterationAttempt>,
    /// Commits reported across all attempts
    pub commits: Vec<String>,
    pub pr: Option<u64>,
}

pub struct IterationEngine {
    agent: Arc<dyn ExecutionAgent>,
    config: IterationConfig,
    states: HashMap<String, IterationState>,
}

impl IterationEngine {
    pub fn new(agent: Arc<dyn ExecutionAgent>, config: IterationConfig) -> Self {
        Self {
            agent,
            config,
            states: HashMap::new(),
        }
    }

    pub fn config(&self) -> &IterationConfig {
        &self.config
    }

    /// Drive `story` until the agent reports completion or retrying stops.
    ///
    /// `prompt` is the first-attempt prompt; later attempts append the
    /// previous error. Each attempt's timeout is capped by `deadline`, and no
    /// new attempt starts once it has passed.
    pub async fn execute_until_green(
        &mut self,
        story: &Story,
        prompt: &str,
        options: &AgentOptions,
        deadline: Option<Instant>,
    ) -> IterationResult {
        let mut state = IterationState::new(&story.id);
        let mut delay = self.config.retry.initial_delay;
        let mut commits: Vec<String> = Vec::new();
        let mut pr = None;
        let mut last_outcome = None;
        let max = self.config.max_iterations;

        let stuck_reason = loop {
            if state.iteration >= max {
                break Some(format!(
                    "Max iterations reached: {}",
                    state.last_error.as_deref().unwrap_or("unknown error")
                ));
            }

            let mut attempt_options = options.clone();
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    last_outcome.get_or_insert(AgentOutcome::Timeout {
                        limit: options.timeout,
                    });
                    break Some("Session time budget exhausted".to_string());
                }
                attempt_options = attempt_options.capped(remaining);
            }

            state.iteration += 1;
            let attempt_prompt = match (&state.last_error, state.iteration > 1) {
                (Some(error), true) => with_previous_failure(prompt, state.iteration - 1, error),
                _ => prompt.to_string(),
            };
            info!(story = %story.id, iteration = state.iteration, max, "running iteration");

            let started = Instant::now();
            let report = self.invoke(&attempt_prompt, &attempt_options).await;
            let duration = started.elapsed();

            for sha in &report.commits {
                if !commits.contains(sha) {
                    commits.push(sha.clone());
                }
            }
            if report.pr.is_some() {
                pr = report.pr;
            }

            let error = report.outcome.error_text();
            state.attempts.push(IterationAttempt {
                iteration: state.iteration,
                timestamp: Utc::now(),
                outcome: report.outcome.clone(),
                error: error.clone(),
                duration,
            });
            state.last_error = error;
            let outcome = report.outcome;
            last_outcome = Some(outcome.clone());

            match &outcome {
                AgentOutcome::Complete => {
                    info!(story = %story.id, iterations = state.iteration, "story completed");
                    break None;
                }
                AgentOutcome::NeedsInput { question } => {
                    break Some(format!("Needs input: {}", question));
                }
                _ => {}
            }

            let error_text = state.last_error.clone().unwrap_or_default();
            if self.is_fatal(&error_text) {
                warn!(story = %story.id, error = %error_text, "fatal error, not retrying");
                break Some(format!("Fatal error: {}", error_text));
            }
            if state.is_stuck() {
                warn!(story = %story.id, error = %error_text, "same error repeated, giving up");
                break Some(format!("Stuck: same error repeated ({})", error_text));
            }

            if state.iteration < max {
                let mut wait = delay;
                if let Some(deadline) = deadline {
                    wait = wait.min(deadline.saturating_duration_since(Instant::now()));
                }
                debug!(story = %story.id, delay_ms = wait.as_millis() as u64, "backing off");
                tokio::time::sleep(wait).await;
                let next = delay.as_secs_f64() * self.config.retry.multiplier.max(0.0);
                delay = Duration::from_secs_f64(
                    next.min(self.config.retry.max_delay.as_secs_f64()),
                );
            }
        };

        let final_outcome = last_outcome.unwrap_or(AgentOutcome::Error {
            message: "no iterations attempted".to_string(),
        });
        let result = IterationResult {
            success: final_outcome.is_complete() && stuck_reason.is_none(),
            iterations: state.iteration,
            final_outcome,
            stuck_reason,
            attempts: state.attempts.clone(),
            commits,
            pr,
        };
        self.states.insert(story.id.clone(), state);
        result
    }

    async fn invoke(&self, prompt: &str, options: &AgentOptions) -> AgentReport {
        match tokio::time::timeout(
            options.timeout + INVOKE_GRACE,
            self.agent.invoke(prompt, options),
        )
        .await
        {
            Ok(report) => report,
            Err(_) => AgentReport::new(AgentOutcome::Timeout {
                limit: options.timeout,
            }),
        }
    }

    fn is_fatal(&self, error: &str) -> bool {
        let error = error.to_lowercase();
        self.config
            .retry
            .fatal_errors
            .iter()
            .any(|fatal| error.contains(&fatal.to_lowercase()))
    }

    /// Retry history of the most recent run of `story_id`.
    pub fn state(&self, story_id: &str) -> Option<&IterationState> {
        self.states.get(story_id)
    }

    pub fn clear_state(&mut self, story_id: &str) {
        self.states.remove(story_id);
    }
}

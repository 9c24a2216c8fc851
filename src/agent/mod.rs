//! Execution agent abstraction.
//!
//! An [`ExecutionAgent`] turns a story prompt into an [`AgentReport`]. The
//! run-loop and the iteration engine only see this trait; [`ClaudeAgent`]
//! drives the agent CLI as a child process.
//!
//! Invocations never fail with an error: spawn failures, crashes and
//! timeouts are reported as [`AgentOutcome::Error`] or
//! [`AgentOutcome::Timeout`] so the caller can treat them like any other
//! story outcome.

mod claude;
pub mod markers;
pub mod prompt;
pub mod stream;
#[cfg(test)]
pub(crate) mod testing;

pub use claude::ClaudeAgent;
pub use prompt::OperatorGuidance;

use crate::config::{Model, PermissionMode, SessionConfig};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// How a single agent invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutcome {
    Complete,
    Blocked { reason: String },
    NeedsInput { question: String },
    Error { message: String },
    Timeout { limit: Duration },
}

impl AgentOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, AgentOutcome::Complete)
    }

    /// Short name used in logs and iteration history.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentOutcome::Complete => "complete",
            AgentOutcome::Blocked { .. } => "blocked",
            AgentOutcome::NeedsInput { .. } => "needs_input",
            AgentOutcome::Error { .. } => "error",
            AgentOutcome::Timeout { .. } => "timeout",
        }
    }

    /// Text describing why the invocation did not complete.
    pub fn error_text(&self) -> Option<String> {
        match self {
            AgentOutcome::Complete => None,
            AgentOutcome::Blocked { reason } => Some(reason.clone()),
            AgentOutcome::NeedsInput { question } => Some(question.clone()),
            AgentOutcome::Error { message } => Some(message.clone()),
            AgentOutcome::Timeout { limit } => Some(format!(
                "Timeout: agent exceeded {}s",
                limit.as_secs()
            )),
        }
    }
}

/// Result of one agent invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentReport {
    pub outcome: AgentOutcome,
    /// Commit shas the agent reported
    pub commits: Vec<String>,
    /// Pull request number the agent reported
    pub pr: Option<u64>,
    pub output: String,
}

impl AgentReport {
    pub fn new(outcome: AgentOutcome) -> Self {
        Self {
            outcome,
            commits: Vec::new(),
            pr: None,
            output: String::new(),
        }
    }

    pub fn complete() -> Self {
        Self::new(AgentOutcome::Complete)
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self::new(AgentOutcome::Blocked {
            reason: reason.into(),
        })
    }

    pub fn needs_input(question: impl Into<String>) -> Self {
        Self::new(AgentOutcome::NeedsInput {
            question: question.into(),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(AgentOutcome::Error {
            message: message.into(),
        })
    }

    pub fn with_commits(mut self, commits: Vec<String>) -> Self {
        self.commits = commits;
        self
    }

    pub fn with_pr(mut self, pr: Option<u64>) -> Self {
        self.pr = pr;
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }
}

/// Per-invocation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOptions {
    pub model: Model,
    pub max_turns: u32,
    pub timeout: Duration,
    pub permission_mode: PermissionMode,
}

impl AgentOptions {
    pub fn from_session(config: &SessionConfig) -> Self {
        Self {
            model: config.model,
            max_turns: config.max_turns,
            timeout: config.agent_timeout,
            permission_mode: config.permission_mode,
        }
    }

    /// Cheap read-only settings for answering operator questions.
    pub fn for_question() -> Self {
        Self {
            model: Model::Haiku,
            max_turns: 3,
            timeout: Duration::from_secs(120),
            permission_mode: PermissionMode::Readonly,
        }
    }

    /// Cap the timeout at `limit`.
    pub fn capped(mut self, limit: Duration) -> Self {
        self.timeout = self.timeout.min(limit);
        self
    }

    /// Flags passed to the agent CLI after the permission flags.
    pub fn cli_args(&self) -> Vec<String> {
        let mut args = self.permission_mode.agent_flags();
        args.extend([
            "--print".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--model".to_string(),
            self.model.as_str().to_string(),
            "--max-turns".to_string(),
            self.max_turns.to_string(),
        ]);
        args
    }
}

#[async_trait]
pub trait ExecutionAgent: Send + Sync {
    /// Run one story prompt to completion.
    async fn invoke(&self, prompt: &str, options: &AgentOptions) -> AgentReport;

    /// Ask a free-form question and return the answer text.
    async fn ask(&self, prompt: &str, options: &AgentOptions) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_text_per_outcome() {
        assert_eq!(AgentOutcome::Complete.error_text(), None);
        assert_eq!(
            AgentReport::blocked("tests fail").outcome.error_text().as_deref(),
            Some("tests fail")
        );
        assert_eq!(
            AgentOutcome::Timeout {
                limit: Duration::from_secs(90)
            }
            .error_text()
            .as_deref(),
            Some("Timeout: agent exceeded 90s")
        );
        assert_eq!(AgentReport::needs_input("which db?").outcome.kind(), "needs_input");
    }

    #[test]
    fn test_options_from_session_and_capped() {
        let config = SessionConfig::default().with_agent_timeout(Duration::from_secs(600));
        let options = AgentOptions::from_session(&config).capped(Duration::from_secs(60));
        assert_eq!(options.timeout, Duration::from_secs(60));
        assert_eq!(options.max_turns, 50);

        let uncapped = AgentOptions::from_session(&config).capped(Duration::from_secs(6000));
        assert_eq!(uncapped.timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_cli_args() {
        let args = AgentOptions::for_question().cli_args();
        assert_eq!(args[0], "--allowedTools");
        let joined = args.join(" ");
        assert!(joined.contains("--print --output-format stream-json --verbose"));
        assert!(joined.ends_with("--model haiku --max-turns 3"));
    }
}

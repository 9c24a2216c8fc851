use crate::agent::markers::parse_markers;
use crate::agent::stream::{ContentBlock, StreamEvent, describe_tool_use, snippet, tool_emoji};
use crate::agent::{AgentOptions, AgentOutcome, AgentReport, ExecutionAgent};
use crate::errors::AgentError;
use crate::ui::SessionUI;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Drives the agent CLI as a child process speaking `stream-json`.
pub struct ClaudeAgent {
    claude_cmd: String,
    working_dir: PathBuf,
    transcript_dir: Option<PathBuf>,
    ui: Option<Arc<SessionUI>>,
}

/// Aborts a background task when dropped, so a timed-out run does not
/// leave it ticking.
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Raw result of one process run.
struct ProcessRun {
    text: String,
    final_result: Option<String>,
    is_error: bool,
    exit_code: i32,
    stderr: String,
}

impl ProcessRun {
    /// Everything the agent said, final result last so its markers win.
    fn combined_output(&self) -> String {
        match &self.final_result {
            Some(result) if !self.text.contains(result.as_str()) => {
                format!("{}\n{}", self.text, result)
            }
            _ => self.text.clone(),
        }
    }

    fn into_report(self) -> AgentReport {
        let output = self.combined_output();
        let markers = parse_markers(&output);

        let outcome = match markers.status {
            Some(status) => status,
            None if self.is_error || self.exit_code != 0 => {
                let detail = self
                    .final_result
                    .as_deref()
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or(self.stderr.trim());
                AgentOutcome::Error {
                    message: format!(
                        "agent exited with code {}: {}",
                        self.exit_code,
                        snippet(detail, 200)
                    ),
                }
            }
            None => AgentOutcome::Error {
                message: "agent finished without reporting CLAW_STATUS".to_string(),
            },
        };

        AgentReport::new(outcome)
            .with_commits(markers.commits)
            .with_pr(markers.pr)
            .with_output(output)
    }
}

impl ClaudeAgent {
    pub fn new(claude_cmd: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            claude_cmd: claude_cmd.into(),
            working_dir: working_dir.into(),
            transcript_dir: None,
            ui: None,
        }
    }

    /// Write each prompt and its output under `dir`.
    pub fn with_transcript_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.transcript_dir = Some(dir.into());
        self
    }

    pub fn with_ui(mut self, ui: Arc<SessionUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    fn log_step(&self, msg: &str) {
        if let Some(ref ui) = self.ui {
            ui.log_step(msg);
        }
    }

    async fn run_process(&self, prompt: &str, options: &AgentOptions) -> Result<ProcessRun> {
        let args = options.cli_args();
        debug!(cmd = %self.claude_cmd, args = ?args, "spawning agent");

        let mut child = Command::new(&self.claude_cmd)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(&self.working_dir)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AgentError::SpawnFailed {
                command: self.claude_cmd.clone(),
                source,
            })?;

        self.log_step(&format!(
            "Process spawned (PID: {})",
            child.id().unwrap_or(0)
        ));

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(AgentError::StdinWrite)?;
            stdin.shutdown().await.map_err(AgentError::StdinWrite)?;
        }

        let stdout = child.stdout.take().ok_or(AgentError::MissingStdout)?;
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let start = Instant::now();
        let ui = self.ui.clone();
        let ticker = AbortOnDrop(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Some(ref ui) = ui {
                    ui.update_elapsed(start.elapsed());
                }
            }
        }));

        let mut text = String::new();
        let mut final_result = None;
        let mut is_error = false;
        let mut reader = BufReader::new(stdout).lines();

        while let Some(line) = reader
            .next_line()
            .await
            .context("Failed to read agent output")?
        {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<StreamEvent>(&line) {
                Ok(StreamEvent::Assistant { message }) => {
                    for block in message.content {
                        match block {
                            ContentBlock::ToolUse { name, input } => {
                                if let Some(ref ui) = self.ui {
                                    ui.show_tool_use(tool_emoji(&name), &describe_tool_use(&name, &input));
                                }
                            }
                            ContentBlock::Text { text: block_text } => {
                                let brief = snippet(&block_text, 60);
                                if let Some(ref ui) = self.ui
                                    && !brief.is_empty()
                                {
                                    ui.show_thinking(&brief);
                                }
                                text.push_str(&block_text);
                                text.push('\n');
                            }
                            ContentBlock::Other => {}
                        }
                    }
                }
                Ok(StreamEvent::Result {
                    result,
                    is_error: err,
                    ..
                }) => {
                    final_result = result;
                    is_error = err;
                }
                Ok(StreamEvent::User {} | StreamEvent::System { .. }) => {}
                Err(_) => {
                    // Plain text output from a non-streaming agent
                    text.push_str(&line);
                    text.push('\n');
                }
            }
        }

        let status = child.wait().await.context("Failed to wait for agent")?;
        drop(ticker);
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        let exit_code = status.code().unwrap_or(-1);
        self.log_step(&format!(
            "Completed in {:.1}s (exit: {})",
            start.elapsed().as_secs_f64(),
            exit_code
        ));

        Ok(ProcessRun {
            text,
            final_result,
            is_error,
            exit_code,
            stderr,
        })
    }

    fn write_transcript(&self, prompt: &str, output: &str) {
        let Some(ref dir) = self.transcript_dir else {
            return;
        };
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S%3f");
        let written = std::fs::create_dir_all(dir)
            .and_then(|_| std::fs::write(dir.join(format!("agent-{}-prompt.md", stamp)), prompt))
            .and_then(|_| std::fs::write(dir.join(format!("agent-{}-output.log", stamp)), output));
        if let Err(e) = written {
            warn!(dir = %dir.display(), error = %e, "failed to write agent transcript");
        }
    }
}

#[async_trait]
impl ExecutionAgent for ClaudeAgent {
    async fn invoke(&self, prompt: &str, options: &AgentOptions) -> AgentReport {
        // Dropping the process future on timeout kills the child
        let report = match tokio::time::timeout(options.timeout, self.run_process(prompt, options))
            .await
        {
            Ok(Ok(run)) => run.into_report(),
            Ok(Err(e)) => {
                warn!(error = %e, "agent invocation failed");
                AgentReport::error(format!("{:#}", e))
            }
            Err(_) => {
                warn!(limit_secs = options.timeout.as_secs(), "agent timed out");
                AgentReport::new(AgentOutcome::Timeout {
                    limit: options.timeout,
                })
            }
        };
        self.write_transcript(prompt, &report.output);
        report
    }

    async fn ask(&self, prompt: &str, options: &AgentOptions) -> Result<String> {
        let run = match tokio::time::timeout(options.timeout, self.run_process(prompt, options))
            .await
        {
            Ok(run) => run?,
            Err(_) => bail!("agent did not answer within {}s", options.timeout.as_secs()),
        };
        if run.is_error || run.exit_code != 0 {
            bail!(
                "agent exited with code {}: {}",
                run.exit_code,
                snippet(run.stderr.trim(), 200)
            );
        }
        let answer = run.final_result.unwrap_or(run.text);
        Ok(answer.trim().to_string())
    }
}

//! Scripted agent for exercising the iteration engine and run-loop.

use crate::agent::{AgentOptions, AgentReport, ExecutionAgent};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Replays queued reports in order, repeating the last one when the queue
/// runs dry. Every prompt and option set is recorded.
pub struct ScriptedAgent {
    reports: Mutex<VecDeque<AgentReport>>,
    last: Mutex<AgentReport>,
    delay: Option<Duration>,
    answer: String,
    pub prompts: Mutex<Vec<String>>,
    pub options: Mutex<Vec<AgentOptions>>,
}

impl ScriptedAgent {
    pub fn new(reports: Vec<AgentReport>) -> Self {
        Self {
            reports: Mutex::new(reports.into()),
            last: Mutex::new(AgentReport::complete()),
            delay: None,
            answer: "No answer scripted".to_string(),
            prompts: Mutex::new(Vec::new()),
            options: Mutex::new(Vec::new()),
        }
    }

    pub fn always_complete() -> Self {
        Self::new(Vec::new())
    }

    /// Sleep before each report, honouring the invocation timeout.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_answer(mut self, answer: &str) -> Self {
        self.answer = answer.to_string();
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn invocations(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl ExecutionAgent for ScriptedAgent {
    async fn invoke(&self, prompt: &str, options: &AgentOptions) -> AgentReport {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.options.lock().unwrap().push(options.clone());

        if let Some(delay) = self.delay
            && delay > options.timeout
        {
            tokio::time::sleep(options.timeout).await;
            return AgentReport::new(crate::agent::AgentOutcome::Timeout {
                limit: options.timeout,
            });
        } else if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.reports.lock().unwrap().pop_front();
        match next {
            Some(report) => {
                *self.last.lock().unwrap() = report.clone();
                report
            }
            None => self.last.lock().unwrap().clone(),
        }
    }

    async fn ask(&self, prompt: &str, _options: &AgentOptions) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.answer.clone())
    }
}

//! The human at the terminal, or a stand-in for unattended runs.

use crate::feature::StoryStatus;
use crate::session::SessionContext;
use crate::session::interrupts::ListenerControl;
use dialoguer::{Confirm, Input, Select, theme::ColorfulTheme};

#[derive(Debug, Clone, PartialEq)]
pub enum PivotAction {
    /// Clear a story's blockers so it can run next
    Reprioritize { story_id: String },
    AddStory {
        title: String,
        scope: Vec<String>,
        blocked_by: Vec<String>,
    },
    /// End the session as completed
    SkipRemaining,
    /// Reset the most recent story's node
    RestartCurrent,
    Cancel,
}

pub trait Operator: Send + Sync {
    fn confirm(&self, prompt: &str, default: bool) -> bool;

    /// Free-text answer. Empty when the operator gives none.
    fn input(&self, prompt: &str) -> String;

    fn choose_pivot(&self, ctx: &SessionContext) -> PivotAction;

    fn show(&self, text: &str);
}

/// Prompts on the terminal, suspending the hotkey listener meanwhile.
pub struct TerminalOperator {
    listener: Option<ListenerControl>,
}

impl TerminalOperator {
    pub fn new(listener: Option<ListenerControl>) -> Self {
        Self { listener }
    }

    fn with_terminal<T>(&self, prompt: impl FnOnce(&ColorfulTheme) -> T) -> T {
        if let Some(ref listener) = self.listener {
            listener.suspend();
        }
        let result = prompt(&ColorfulTheme::default());
        if let Some(ref listener) = self.listener {
            listener.resume();
        }
        result
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Operator for TerminalOperator {
    fn confirm(&self, prompt: &str, default: bool) -> bool {
        self.with_terminal(|theme| {
            Confirm::with_theme(theme)
                .with_prompt(prompt)
                .default(default)
                .interact()
                .unwrap_or(default)
        })
    }

    fn input(&self, prompt: &str) -> String {
        self.with_terminal(|theme| {
            Input::<String>::with_theme(theme)
                .with_prompt(prompt)
                .allow_empty(true)
                .interact_text()
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        })
    }

    fn choose_pivot(&self, ctx: &SessionContext) -> PivotAction {
        let open: Vec<(String, String)> = ctx
            .feature
            .stories
            .iter()
            .filter(|s| !matches!(s.status, StoryStatus::Complete | StoryStatus::Skipped))
            .map(|s| (s.id.clone(), format!("{}: {} [{}]", s.id, s.title, s.status)))
            .collect();

        self.with_terminal(|theme| {
            let options = &[
                "Reprioritize a story (clear its blockers)",
                "Add a new story",
                "Skip all remaining stories",
                "Restart the current story",
                "Cancel",
            ];
            let Ok(selection) = Select::with_theme(theme)
                .with_prompt("Pivot")
                .items(options)
                .default(4)
                .interact()
            else {
                return PivotAction::Cancel;
            };

            match selection {
                0 => {
                    if open.is_empty() {
                        return PivotAction::Cancel;
                    }
                    let labels: Vec<&str> = open.iter().map(|(_, label)| label.as_str()).collect();
                    match Select::with_theme(theme)
                        .with_prompt("Which story?")
                        .items(&labels)
                        .default(0)
                        .interact()
                    {
                        Ok(i) => PivotAction::Reprioritize {
                            story_id: open[i].0.clone(),
                        },
                        Err(_) => PivotAction::Cancel,
                    }
                }
                1 => {
                    let title: String = Input::with_theme(theme)
                        .with_prompt("Story title")
                        .interact_text()
                        .unwrap_or_default();
                    if title.trim().is_empty() {
                        return PivotAction::Cancel;
                    }
                    let scope: String = Input::with_theme(theme)
                        .with_prompt("Scope (comma-separated)")
                        .allow_empty(true)
                        .interact_text()
                        .unwrap_or_default();
                    let blocked_by: String = Input::with_theme(theme)
                        .with_prompt("Blocked by story ids (comma-separated)")
                        .allow_empty(true)
                        .interact_text()
                        .unwrap_or_default();
                    PivotAction::AddStory {
                        title: title.trim().to_string(),
                        scope: split_list(&scope),
                        blocked_by: split_list(&blocked_by),
                    }
                }
                2 => PivotAction::SkipRemaining,
                3 => PivotAction::RestartCurrent,
                _ => PivotAction::Cancel,
            }
        })
    }

    fn show(&self, text: &str) {
        println!("{}", text);
    }
}

/// Never blocks: accepts defaults, answers nothing, pivots nowhere.
#[derive(Debug, Default)]
pub struct HeadlessOperator;

impl Operator for HeadlessOperator {
    fn confirm(&self, _prompt: &str, default: bool) -> bool {
        default
    }

    fn input(&self, _prompt: &str) -> String {
        String::new()
    }

    fn choose_pivot(&self, _ctx: &SessionContext) -> PivotAction {
        PivotAction::Cancel
    }

    fn show(&self, text: &str) {
        eprintln!("{}", text);
    }
}

//! Configuration for claw, read from `.claw/claw.toml`.
//!
//! Settings are layered file → environment → CLI. Every section is optional
//! and falls back to defaults.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "shop"
//! claude_cmd = "claude"
//!
//! [notes]
//! vault = "~/Documents/Notes"
//! project_path = "Projects/shop"
//!
//! [session]
//! max_hours = 4.0
//! stop_on_blocker = false
//! pause_between_stories = true
//! model = "sonnet"
//! iterate_until_green = true
//! max_iterations = 5
//! create_pr_per_story = false
//! create_pr_on_complete = true
//! agent_timeout_mins = 30
//! max_turns = 50
//! permission_mode = "autonomous"
//!
//! [retry]
//! initial_delay_ms = 1000
//! max_delay_ms = 30000
//! backoff_multiplier = 2.0
//! fatal_errors = ["Permission denied", "Authentication failed"]
//!
//! [repos]
//! api = "services/api"
//! web = "apps/web"
//! ```

use crate::tracker::Workspace;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Model passed to the execution agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    #[default]
    Sonnet,
    Opus,
    Haiku,
}

impl Model {
    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Sonnet => "sonnet",
            Model::Opus => "opus",
            Model::Haiku => "haiku",
        }
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Model {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sonnet" => Ok(Model::Sonnet),
            "opus" => Ok(Model::Opus),
            "haiku" => Ok(Model::Haiku),
            _ => anyhow::bail!("Invalid model '{}'. Valid values: sonnet, opus, haiku", s),
        }
    }
}

/// Permission modes for agent invocations.
///
/// | Mode         | Agent flags                                  |
/// |--------------|----------------------------------------------|
/// | `Standard`   | `--permission-mode acceptEdits`              |
/// | `Autonomous` | `--dangerously-skip-permissions`             |
/// | `Readonly`   | `--allowedTools` restricted to read-only tools |
///
/// Stories run unattended, so `Autonomous` is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionMode {
    /// Accept file edits, agent CLI decides the rest
    Standard,
    /// Skip all permission prompts
    #[default]
    Autonomous,
    /// Research only, no file modifications
    Readonly,
}

impl PermissionMode {
    /// Flags to pass to the agent CLI for this mode.
    pub fn agent_flags(&self) -> Vec<String> {
        match self {
            PermissionMode::Standard => {
                vec!["--permission-mode".to_string(), "acceptEdits".to_string()]
            }
            PermissionMode::Autonomous => vec!["--dangerously-skip-permissions".to_string()],
            PermissionMode::Readonly => {
                vec!["--allowedTools".to_string(), READONLY_TOOLS.join(",")]
            }
        }
    }
}

const READONLY_TOOLS: &[&str] = &["Read", "Glob", "Grep", "WebSearch", "WebFetch"];

impl std::fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionMode::Standard => write!(f, "standard"),
            PermissionMode::Autonomous => write!(f, "autonomous"),
            PermissionMode::Readonly => write!(f, "readonly"),
        }
    }
}

impl std::str::FromStr for PermissionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(PermissionMode::Standard),
            "autonomous" => Ok(PermissionMode::Autonomous),
            "readonly" => Ok(PermissionMode::Readonly),
            _ => anyhow::bail!(
                "Invalid permission mode '{}'. Valid values: standard, autonomous, readonly",
                s
            ),
        }
    }
}

/// Project-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Project name (optional, defaults to directory name)
    #[serde(default)]
    pub name: Option<String>,
    /// Agent CLI command (default: "claude")
    #[serde(default)]
    pub claude_cmd: Option<String>,
}

/// Where features, session logs and checkpoints are kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotesSection {
    /// Root directory of the markdown vault
    #[serde(default)]
    pub vault: Option<String>,
    /// Logical prefix for this project's notes inside the vault
    #[serde(default)]
    pub project_path: Option<String>,
}

/// Session defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    #[serde(default)]
    pub max_hours: Option<f64>,
    #[serde(default)]
    pub max_stories: Option<u32>,
    #[serde(default)]
    pub stop_on_blocker: bool,
    #[serde(default = "default_true")]
    pub pause_between_stories: bool,
    #[serde(default)]
    pub model: Model,
    #[serde(default)]
    pub iterate_until_green: bool,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub create_pr_per_story: bool,
    #[serde(default = "default_true")]
    pub create_pr_on_complete: bool,
    #[serde(default = "default_agent_timeout_mins")]
    pub agent_timeout_mins: u64,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default)]
    pub permission_mode: PermissionMode,
}

fn default_true() -> bool {
    true
}

fn default_max_iterations() -> u32 {
    5
}

fn default_agent_timeout_mins() -> u64 {
    30
}

fn default_max_turns() -> u32 {
    50
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            max_hours: None,
            max_stories: None,
            stop_on_blocker: false,
            pause_between_stories: true,
            model: Model::default(),
            iterate_until_green: false,
            max_iterations: default_max_iterations(),
            create_pr_per_story: false,
            create_pr_on_complete: true,
            agent_timeout_mins: default_agent_timeout_mins(),
            max_turns: default_max_turns(),
            permission_mode: PermissionMode::default(),
        }
    }
}

/// Retry and backoff settings for the iteration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_fatal_errors")]
    pub fatal_errors: Vec<String>,
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

pub fn default_fatal_errors() -> Vec<String> {
    [
        "Permission denied",
        "Authentication failed",
        "Invalid API key",
        "Rate limit exceeded",
        "User aborted",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            fatal_errors: default_fatal_errors(),
        }
    }
}

/// The complete claw.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClawToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub notes: NotesSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub retry: RetrySection,
    /// Repository name → path relative to the project directory
    #[serde(default)]
    pub repos: BTreeMap<String, String>,
}

impl ClawToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse claw.toml")
    }

    /// Load `.claw/claw.toml`, or defaults when the file doesn't exist.
    pub fn load_or_default(claw_dir: &Path) -> Result<Self> {
        let config_path = claw_dir.join("claw.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    #[cfg(test)]
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize claw.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Agent command: file, then `CLAUDE_CMD`, then "claude".
    pub fn claude_cmd(&self) -> String {
        self.project
            .claude_cmd
            .clone()
            .or_else(|| std::env::var("CLAUDE_CMD").ok())
            .unwrap_or_else(|| "claude".to_string())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.retry.backoff_multiplier < 1.0 {
            warnings.push(format!(
                "backoff_multiplier {} is below 1.0: delays will shrink between retries",
                self.retry.backoff_multiplier
            ));
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            warnings.push(format!(
                "max_delay_ms ({}) is below initial_delay_ms ({})",
                self.retry.max_delay_ms, self.retry.initial_delay_ms
            ));
        }
        if self.session.agent_timeout_mins == 0 {
            warnings.push("agent_timeout_mins is 0: every agent call will time out".to_string());
        }

        warnings
    }
}

/// Backoff policy handed to the iteration engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub fatal_errors: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetrySection::default())
    }
}

impl From<&RetrySection> for RetryPolicy {
    fn from(section: &RetrySection) -> Self {
        Self {
            initial_delay: Duration::from_millis(section.initial_delay_ms),
            max_delay: Duration::from_millis(section.max_delay_ms),
            multiplier: section.backoff_multiplier,
            fatal_errors: section.fatal_errors.clone(),
        }
    }
}

/// Fully resolved settings for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_hours: Option<f64>,
    pub max_stories: Option<u32>,
    pub stop_on_blocker: bool,
    pub pause_between_stories: bool,
    pub model: Model,
    pub iterate_until_green: bool,
    pub max_iterations: u32,
    pub create_pr_per_story: bool,
    pub create_pr_on_complete: bool,
    pub agent_timeout: Duration,
    pub max_turns: u32,
    pub permission_mode: PermissionMode,
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig::from_toml(&ClawToml::default())
    }
}

impl SessionConfig {
    pub fn from_toml(toml: &ClawToml) -> Self {
        let s = &toml.session;
        Self {
            max_hours: s.max_hours,
            max_stories: s.max_stories,
            stop_on_blocker: s.stop_on_blocker,
            pause_between_stories: s.pause_between_stories,
            model: s.model,
            iterate_until_green: s.iterate_until_green,
            max_iterations: s.max_iterations,
            create_pr_per_story: s.create_pr_per_story,
            create_pr_on_complete: s.create_pr_on_complete,
            agent_timeout: Duration::from_secs(s.agent_timeout_mins * 60),
            max_turns: s.max_turns,
            permission_mode: s.permission_mode,
            retry: RetryPolicy::from(&toml.retry),
        }
    }

    /// Apply CLI overrides on top of file settings.
    pub fn apply(&mut self, overrides: &SessionOverrides) {
        if let Some(hours) = overrides.max_hours {
            self.max_hours = Some(hours);
        }
        if let Some(stories) = overrides.max_stories {
            self.max_stories = Some(stories);
        }
        if overrides.stop_on_blocker {
            self.stop_on_blocker = true;
        }
        if let Some(model) = overrides.model {
            self.model = model;
        }
        if overrides.retry {
            self.iterate_until_green = true;
        }
        if let Some(max) = overrides.max_retries {
            self.max_iterations = max;
        }
        if overrides.pr_per_story {
            self.create_pr_per_story = true;
        }
        if overrides.no_pr_on_complete {
            self.create_pr_on_complete = false;
        }
        if overrides.no_pause {
            self.pause_between_stories = false;
        }
    }

    pub fn with_max_hours(mut self, hours: Option<f64>) -> Self {
        self.max_hours = hours;
        self
    }

    pub fn with_max_stories(mut self, stories: Option<u32>) -> Self {
        self.max_stories = stories;
        self
    }

    pub fn with_retry_mode(mut self, enabled: bool, max_iterations: u32) -> Self {
        self.iterate_until_green = enabled;
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_stop_on_blocker(mut self, stop: bool) -> Self {
        self.stop_on_blocker = stop;
        self
    }

    pub fn with_pause_between_stories(mut self, pause: bool) -> Self {
        self.pause_between_stories = pause;
        self
    }

    pub fn with_prs(mut self, per_story: bool, on_complete: bool) -> Self {
        self.create_pr_per_story = per_story;
        self.create_pr_on_complete = on_complete;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = timeout;
        self
    }
}

/// Budget and behaviour flags from `run`/`resume`.
#[derive(Debug, Clone, Default)]
pub struct SessionOverrides {
    pub max_hours: Option<f64>,
    pub max_stories: Option<u32>,
    pub stop_on_blocker: bool,
    pub model: Option<Model>,
    pub retry: bool,
    pub max_retries: Option<u32>,
    pub pr_per_story: bool,
    pub no_pr_on_complete: bool,
    pub no_pause: bool,
}

/// Runtime configuration for a claw workspace.
#[derive(Debug, Clone)]
pub struct ClawConfig {
    pub project_dir: PathBuf,
    pub claw_dir: PathBuf,
    pub toml: ClawToml,
    pub verbose: bool,
    pub yes: bool,
}

impl ClawConfig {
    /// Load configuration for a project directory.
    ///
    /// A `.env` file in the project directory is loaded first so it can
    /// supply `CLAUDE_CMD` and `CLAW_VAULT`.
    pub fn load(project_dir: &Path, verbose: bool, yes: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let _ = dotenvy::from_path(project_dir.join(".env"));

        let claw_dir = project_dir.join(".claw");
        let toml = ClawToml::load_or_default(&claw_dir)?;

        Ok(Self {
            project_dir,
            claw_dir,
            toml,
            verbose,
            yes,
        })
    }

    pub fn project_name(&self) -> String {
        self.toml.project.name.clone().unwrap_or_else(|| {
            self.project_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "project".to_string())
        })
    }

    pub fn claude_cmd(&self) -> String {
        self.toml.claude_cmd()
    }

    /// Vault root: `CLAW_VAULT`, then the file setting, then `.claw/notes`.
    pub fn vault_dir(&self) -> PathBuf {
        if let Ok(vault) = std::env::var("CLAW_VAULT") {
            return expand_home(&vault);
        }
        match &self.toml.notes.vault {
            Some(vault) => {
                let path = expand_home(vault);
                if path.is_absolute() {
                    path
                } else {
                    self.project_dir.join(path)
                }
            }
            None => self.claw_dir.join("notes"),
        }
    }

    /// Logical prefix for this project's notes.
    pub fn notes_project_path(&self) -> String {
        self.toml
            .notes
            .project_path
            .clone()
            .unwrap_or_else(|| format!("Projects/{}", self.project_name()))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.claw_dir.join("logs")
    }

    /// Story repositories: the `[repos]` table resolved against the project.
    pub fn workspace(&self) -> Workspace {
        self.toml
            .repos
            .iter()
            .fold(Workspace::new(&self.project_dir), |ws, (name, rel)| {
                ws.with_repo(name, self.project_dir.join(rel))
            })
    }

    /// Resolve a story repository name to a working tree.
    pub fn repo_path(&self, name: &str) -> PathBuf {
        self.workspace().resolve(name)
    }

    pub fn session_config(&self, overrides: &SessionOverrides) -> SessionConfig {
        let mut config = SessionConfig::from_toml(&self.toml);
        config.apply(overrides);
        config
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

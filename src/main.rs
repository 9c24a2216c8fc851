use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use claw::config::{Model, SessionOverrides};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "claw")]
#[command(version, about = "Autonomous story orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Never prompt: accept defaults and leave questions unanswered
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a feature's stories in dependency order
    Run {
        feature: String,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Continue a session from its checkpoint
    Resume {
        feature: String,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Show feature progress and checkpoint state
    Status { feature: Option<String> },
    /// List features
    List,
    /// Check a feature for structural problems
    Validate { feature: String },
    /// Show a feature's dependency graph
    Graph { feature: String },
}

/// Flags that override `[session]` settings for one run.
#[derive(Args, Clone, Debug, Default)]
pub struct SessionArgs {
    /// Wall-clock budget in hours
    #[arg(long)]
    pub hours: Option<f64>,

    #[arg(long)]
    pub max_stories: Option<u32>,

    /// End the session at the first blocked story
    #[arg(long)]
    pub stop_on_blocker: bool,

    /// sonnet, opus or haiku
    #[arg(long)]
    pub model: Option<Model>,

    /// Retry each story until it completes
    #[arg(long)]
    pub retry: bool,

    #[arg(long)]
    pub max_retries: Option<u32>,

    #[arg(long)]
    pub pr_per_story: bool,

    #[arg(long)]
    pub no_pr_on_complete: bool,

    /// Do not ask for confirmation between stories
    #[arg(long)]
    pub no_pause: bool,
}

impl SessionArgs {
    pub fn overrides(&self) -> SessionOverrides {
        SessionOverrides {
            max_hours: self.hours,
            max_stories: self.max_stories,
            stop_on_blocker: self.stop_on_blocker,
            model: self.model,
            retry: self.retry,
            max_retries: self.max_retries,
            pr_per_story: self.pr_per_story,
            no_pr_on_complete: self.no_pr_on_complete,
            no_pause: self.no_pause,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let claw_dir = project_dir.join(".claw");
    let log_dir = claw_dir.is_dir().then(|| claw_dir.join("logs"));
    let guard = claw::logging::init(cli.verbose, log_dir.as_deref())?;

    let code = match &cli.command {
        Commands::Run { feature, session } => {
            cmd::cmd_run(&cli, &project_dir, feature, session).await?
        }
        Commands::Resume { feature, session } => {
            cmd::cmd_resume(&cli, &project_dir, feature, session).await?
        }
        Commands::Status { feature } => cmd::cmd_status(&cli, &project_dir, feature.as_deref())?,
        Commands::List => cmd::cmd_list(&cli, &project_dir)?,
        Commands::Validate { feature } => cmd::cmd_validate(&cli, &project_dir, feature)?,
        Commands::Graph { feature } => cmd::cmd_graph(&cli, &project_dir, feature)?,
    };

    drop(guard);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

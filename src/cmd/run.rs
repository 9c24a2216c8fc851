//! Session execution: `claw run` and `claw resume`.

use anyhow::{Result, bail};
use chrono::Utc;
use claw::agent::ClaudeAgent;
use claw::checkpoint::CheckpointStore;
use claw::config::SessionConfig;
use claw::errors::SessionError;
use claw::host::GhCli;
use claw::session::interrupts::{self, HotkeyListener};
use claw::session::{
    HeadlessOperator, Operator, SessionRunner, SessionSummary, TerminalOperator, resume_config,
};
use claw::ui::SessionUI;
use claw::validation::validate_session_config;
use console::style;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;

use super::super::{Cli, SessionArgs};
use super::Project;

pub async fn cmd_run(
    cli: &Cli,
    project_dir: &Path,
    feature_id: &str,
    args: &SessionArgs,
) -> Result<i32> {
    let project = Project::open(cli, project_dir)?;
    let session = project.config.session_config(&args.overrides());

    let (mut runner, listener) = build_runner(cli, &project, feature_id, session)?;
    let result = runner.run(feature_id).await;
    finish(listener, result).await
}

pub async fn cmd_resume(
    cli: &Cli,
    project_dir: &Path,
    feature_id: &str,
    args: &SessionArgs,
) -> Result<i32> {
    let project = Project::open(cli, project_dir)?;
    let checkpoints = CheckpointStore::new(project.store.clone(), project.config.notes_project_path());
    let Some(checkpoint) = checkpoints.load(feature_id)? else {
        return Err(SessionError::NoCheckpoint {
            feature_id: feature_id.to_string(),
        }
        .into());
    };

    if !checkpoint.is_resumable() {
        eprintln!(
            "{} Checkpoint ended {}; resuming anyway",
            style("!").yellow(),
            checkpoint.session_state.status
        );
    }

    let session = resume_config(
        SessionConfig::from_toml(&project.config.toml),
        &checkpoint,
        &args.overrides(),
        Utc::now(),
    );
    if session.max_hours.is_some_and(|h| h <= 0.0) {
        bail!("No time budget left for '{}'; pass --hours to extend it", feature_id);
    }

    let (mut runner, listener) = build_runner(cli, &project, feature_id, session)?;
    let result = runner.resume(checkpoint).await;
    finish(listener, result).await
}

fn build_runner(
    cli: &Cli,
    project: &Project,
    feature_id: &str,
    session: SessionConfig,
) -> Result<(SessionRunner, Option<HotkeyListener>)> {
    let config = &project.config;
    for warning in config.validate() {
        eprintln!("{} {}", style("!").yellow(), warning);
    }
    for warning in validate_session_config(&session).warnings {
        eprintln!("{} {}", style("!").yellow(), warning);
    }

    let total = project
        .features()
        .load(feature_id)?
        .map_or(0, |f| f.stories.len() as u64);
    let ui = Arc::new(SessionUI::new(total, cli.verbose));

    let agent = ClaudeAgent::new(config.claude_cmd(), &config.project_dir)
        .with_transcript_dir(config.claw_dir.join("transcripts"))
        .with_ui(ui.clone());

    let wants_prs = session.create_pr_per_story || session.create_pr_on_complete;
    let mut runner = SessionRunner::new(
        Arc::new(agent),
        project.store.clone(),
        config.notes_project_path(),
        session,
    )
    .with_ui(ui);

    if wants_prs {
        runner = runner.with_host(Arc::new(GhCli::new(&config.project_dir)), config.workspace());
    }

    let interactive = !cli.yes && std::io::stdin().is_terminal();
    if !interactive {
        let operator: Arc<dyn Operator> = Arc::new(HeadlessOperator);
        return Ok((runner.with_operator(operator), None));
    }

    let (tx, rx) = interrupts::channel();
    let listener = HotkeyListener::start(tx)?;
    let operator: Arc<dyn Operator> = Arc::new(TerminalOperator::new(Some(listener.control())));
    Ok((
        runner.with_operator(operator).with_interrupts(rx),
        Some(listener),
    ))
}

async fn finish(
    listener: Option<HotkeyListener>,
    result: Result<SessionSummary, SessionError>,
) -> Result<i32> {
    if let Some(listener) = listener {
        listener.stop().await;
    }
    let summary = result?;
    println!();
    println!("{}", summary.render());
    Ok(summary.exit_code())
}

//! Read-only feature commands: status, list, validate and graph.

use anyhow::Result;
use chrono::Utc;
use claw::checkpoint::CheckpointStore;
use claw::dag::DependencyScheduler;
use claw::errors::SessionError;
use claw::feature::{Feature, StoryStatus};
use claw::validation::validate_feature;
use console::style;
use std::path::Path;

use super::super::Cli;
use super::Project;

fn load(project: &Project, feature_id: &str) -> Result<Feature> {
    project
        .features()
        .load(feature_id)?
        .ok_or_else(|| {
            SessionError::FeatureNotFound {
                id: feature_id.to_string(),
            }
            .into()
        })
}

pub fn cmd_status(cli: &Cli, project_dir: &Path, feature_id: Option<&str>) -> Result<i32> {
    let project = Project::open(cli, project_dir)?;
    let ids = match feature_id {
        Some(id) => vec![id.to_string()],
        None => project.features().list()?,
    };

    if ids.is_empty() {
        println!();
        println!(
            "No features found under {}/features.",
            project.config.notes_project_path()
        );
        println!();
        return Ok(0);
    }

    let checkpoints = CheckpointStore::new(project.store.clone(), project.config.notes_project_path());
    for id in ids {
        let feature = load(&project, &id)?;
        print_feature_status(&feature);

        match checkpoints.load(&id) {
            Ok(Some(cp)) => {
                let mut line = format!(
                    "Checkpoint: {} {} at {}",
                    cp.session_state.status.icon(),
                    cp.session_state.status,
                    cp.timestamp.format("%Y-%m-%d %H:%M UTC")
                );
                if let Some(hours) = cp.remaining_hours(Utc::now()) {
                    line.push_str(&format!(", {:.2}h budget left", hours));
                }
                println!("{}", line);
                if let Some(ref reason) = cp.session_state.blocker_reason {
                    println!("  {}", style(reason).yellow());
                }
                if cp.is_resumable() {
                    println!("  Resume with: claw resume {}", id);
                }
            }
            Ok(None) => println!("Checkpoint: none"),
            Err(e) => println!("Checkpoint: {} {}", style("unreadable").red(), e),
        }
        println!();
    }
    Ok(0)
}

fn print_feature_status(feature: &Feature) {
    let total = feature.stories.len();
    let complete = feature.count(StoryStatus::Complete);
    let percent = if total == 0 {
        100.0
    } else {
        complete as f64 / total as f64 * 100.0
    };

    println!();
    println!("{}", style(format!("{} ({})", feature.title, feature.id)).bold());
    println!("Status:  {}", feature.derived_status());
    println!(
        "Stories: {}/{} complete ({:.0}%), {} in progress, {} blocked, {} skipped",
        complete,
        total,
        percent,
        feature.count(StoryStatus::InProgress),
        feature.count(StoryStatus::Blocked),
        feature.count(StoryStatus::Skipped)
    );
    println!();
    println!("{}", DependencyScheduler::from_stories(&feature.stories).visualize());
    println!();
}

pub fn cmd_list(cli: &Cli, project_dir: &Path) -> Result<i32> {
    let project = Project::open(cli, project_dir)?;
    let store = project.features();
    let ids = store.list()?;

    if ids.is_empty() {
        println!();
        println!("No features found.");
        println!();
        return Ok(0);
    }

    println!();
    println!("{:<24} {:<10} {:<10} Title", "Feature", "Status", "Stories");
    println!("{:<24} {:<10} {:<10} -----", "-------", "------", "-------");
    for id in ids {
        match store.load(&id) {
            Ok(Some(feature)) => {
                let progress = format!(
                    "{}/{}",
                    feature.count(StoryStatus::Complete),
                    feature.stories.len()
                );
                println!(
                    "{:<24} {:<10} {:<10} {}",
                    feature.id,
                    feature.derived_status().to_string(),
                    progress,
                    feature.title
                );
            }
            Ok(None) => {}
            Err(e) => println!("{:<24} {}", id, style(e).red()),
        }
    }
    println!();
    Ok(0)
}

pub fn cmd_validate(cli: &Cli, project_dir: &Path, feature_id: &str) -> Result<i32> {
    let project = Project::open(cli, project_dir)?;
    let feature = load(&project, feature_id)?;
    let report = validate_feature(&feature);

    println!("{}", report.format());
    Ok(if report.is_valid() { 0 } else { 1 })
}

pub fn cmd_graph(cli: &Cli, project_dir: &Path, feature_id: &str) -> Result<i32> {
    let project = Project::open(cli, project_dir)?;
    let feature = load(&project, feature_id)?;
    let scheduler = DependencyScheduler::from_stories(&feature.stories);

    let cycles = scheduler.detect_circular_dependencies();
    if !cycles.is_empty() {
        for cycle in &cycles {
            println!(
                "{} Circular dependency: {}",
                style("✗").red(),
                claw::dag::format_cycle(cycle)
            );
        }
        return Ok(1);
    }

    println!("{}", scheduler.visualize());
    println!();
    println!("Order: {}", scheduler.topological_order().join(" \u{2192} "));

    let ready: Vec<&str> = scheduler.ready_stories().iter().map(|n| n.id.as_str()).collect();
    if !ready.is_empty() {
        println!("Ready: {}", ready.join(", "));
    }
    Ok(0)
}

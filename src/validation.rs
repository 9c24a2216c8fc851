//! Pre-flight checks for session settings and feature definitions.

use crate::config::SessionConfig;
use crate::dag::{DependencyScheduler, format_cycle};
use crate::feature::{Feature, Story};
use console::style;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static FEATURE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9-]+$").expect("feature id regex is valid"));

/// Errors block a run; warnings are shown and ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Render for the terminal.
    pub fn format(&self) -> String {
        let mut lines = Vec::new();
        if !self.errors.is_empty() {
            lines.push(format!("{}", style("Errors:").red().bold()));
            for e in &self.errors {
                lines.push(format!("  {} {}", style("✗").red(), e));
            }
        }
        if !self.warnings.is_empty() {
            lines.push(format!("{}", style("Warnings:").yellow().bold()));
            for w in &self.warnings {
                lines.push(format!("  {} {}", style("!").yellow(), w));
            }
        }
        if lines.is_empty() {
            lines.push(format!("{} Validation passed", style("✓").green()));
        }
        lines.join("\n")
    }
}

/// Longest budget accepted: one year.
pub const MAX_SESSION_HOURS: f64 = 24.0 * 365.0;

pub fn validate_session_config(config: &SessionConfig) -> ValidationReport {
    let mut report = ValidationReport::default();

    if let Some(hours) = config.max_hours {
        if !hours.is_finite() {
            report.error(format!("max hours must be a finite number, got {}", hours));
        } else if hours <= 0.0 {
            report.error("max hours must be greater than 0");
        } else if hours > MAX_SESSION_HOURS {
            report.error(format!(
                "max hours is {}: at most {} hours are allowed",
                hours, MAX_SESSION_HOURS
            ));
        } else if hours > 24.0 {
            report.warn(format!(
                "max hours is {}: sessions longer than 24 hours are unusual",
                hours
            ));
        }
    }
    if config.max_stories == Some(0) {
        report.error("max stories must be greater than 0");
    }
    if config.max_iterations == 0 {
        report.error("max iterations must be greater than 0");
    } else if config.max_iterations > 10 {
        report.warn(format!(
            "max iterations is {}: high values may burn budget on a stuck story",
            config.max_iterations
        ));
    }

    report
}

pub fn validate_story(story: &Story) -> ValidationReport {
    let mut report = ValidationReport::default();
    let title = story.title.trim();

    if title.is_empty() {
        report.error(format!("Story {}: title is required", story.id));
    } else if title.chars().count() < 10 {
        report.warn(format!(
            "Story {}: title '{}' is very short",
            story.id, title
        ));
    }
    if story.scope.is_empty() {
        report.warn(format!("Story {}: no scope defined", story.id));
    }

    report
}

pub fn validate_feature(feature: &Feature) -> ValidationReport {
    let mut report = ValidationReport::default();

    if !FEATURE_ID.is_match(&feature.id) {
        report.error(format!(
            "Feature id '{}' must contain only lowercase letters, digits and hyphens",
            feature.id
        ));
    }
    if feature.title.trim().is_empty() {
        report.error("Feature title is required");
    }
    if feature.stories.is_empty() {
        report.warn("Feature has no stories");
    }

    let mut ids = HashSet::new();
    for story in &feature.stories {
        if !ids.insert(story.id.as_str()) {
            report.error(format!("Duplicate story id '{}'", story.id));
        }
    }

    for story in &feature.stories {
        report.merge(validate_story(story));
        for blocker in &story.blocked_by {
            if !ids.contains(blocker.as_str()) {
                report.warn(format!(
                    "Story {}: blocked by unknown story '{}' and can never run",
                    story.id, blocker
                ));
            }
        }
    }

    let scheduler = DependencyScheduler::from_stories(&feature.stories);
    for cycle in scheduler.detect_circular_dependencies() {
        report.error(format!("Circular dependency: {}", format_cycle(&cycle)));
    }

    report
}

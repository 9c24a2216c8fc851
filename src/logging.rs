//! Diagnostic tracing.
//!
//! Tracing is for diagnosing claw itself: compact lines on stderr filtered by
//! `RUST_LOG`, plus a JSON file under `.claw/logs/` when a log directory is
//! given. Session progress shown to the operator goes through `ui`, and the
//! per-feature session log goes through the document store; neither depends
//! on the filter here.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE: &str = "claw.log";

fn default_directive(verbose: bool) -> &'static str {
    if verbose { "warn,claw=debug" } else { "warn" }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the default filter. The returned guard flushes the
/// file writer on drop and must live as long as the process.
pub fn init(verbose: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let stderr = fmt::layer().with_writer(std::io::stderr).compact();

    let Some(dir) = log_dir else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr)
            .try_init()
            .context("Failed to install tracing subscriber")?;
        return Ok(None);
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, LOG_FILE));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(fmt::layer().json().with_writer(writer))
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(Some(guard))
}

//! Status lines the agent prints to report how a story went.
//!
//! ```text
//! CLAW_STATUS: COMPLETE
//! CLAW_STATUS: BLOCKED <reason>
//! CLAW_STATUS: NEEDS_INPUT <question>
//! CLAW_COMMIT: <sha> <message>
//! CLAW_PR: <number or url>
//! ```

use crate::agent::AgentOutcome;
use regex::Regex;
use std::sync::LazyLock;

static STATUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*CLAW_STATUS:\s*(COMPLETE|BLOCKED|NEEDS_INPUT)\b[ \t:]*(.*?)\s*$")
        .expect("status marker regex is valid")
});

static COMMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*CLAW_COMMIT:\s*([0-9a-fA-F]{7,40})\b").expect("commit marker regex is valid")
});

static PR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*CLAW_PR:\s*(?:\S*/pull/)?#?(\d+)").expect("pr marker regex is valid")
});

/// Everything the agent reported through markers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Markers {
    /// Last status marker in the output
    pub status: Option<AgentOutcome>,
    /// Commit shas in order of first appearance
    pub commits: Vec<String>,
    /// Last pull request marker
    pub pr: Option<u64>,
}

pub fn parse_markers(output: &str) -> Markers {
    let status = STATUS.captures_iter(output).last().map(|caps| {
        let detail = caps.get(2).map_or("", |m| m.as_str()).trim().to_string();
        match &caps[1] {
            "COMPLETE" => AgentOutcome::Complete,
            "BLOCKED" => AgentOutcome::Blocked {
                reason: non_empty(detail, "no reason given"),
            },
            _ => AgentOutcome::NeedsInput {
                question: non_empty(detail, "agent requested input without a question"),
            },
        }
    });

    let mut commits: Vec<String> = Vec::new();
    for caps in COMMIT.captures_iter(output) {
        let sha = caps[1].to_lowercase();
        if !commits.contains(&sha) {
            commits.push(sha);
        }
    }

    let pr = PR
        .captures_iter(output)
        .last()
        .and_then(|caps| caps[1].parse().ok());

    Markers {
        status,
        commits,
        pr,
    }
}

fn non_empty(detail: String, fallback: &str) -> String {
    if detail.is_empty() {
        fallback.to_string()
    } else {
        detail
    }
}

//! Advisory analysis of why stories failed to go green.

use crate::iteration::IterationResult;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct PatternCount {
    pub pattern: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StuckAnalysis {
    pub total_stuck: usize,
    /// Most frequent first
    pub patterns: Vec<PatternCount>,
    pub recommendations: Vec<&'static str>,
}

impl StuckAnalysis {
    pub fn is_empty(&self) -> bool {
        self.total_stuck == 0
    }
}

/// Bucket order doubles as match priority.
const BUCKETS: &[(&str, &[&str], &str)] = &[
    (
        "test_failure",
        &["test", "Test"],
        "Consider reviewing test setup and mocking strategies",
    ),
    (
        "import_error",
        &["import", "module"],
        "Check module resolution and dependencies",
    ),
    (
        "type_error",
        &["type", "Type"],
        "Review type definitions and compiler configuration",
    ),
    (
        "permission_error",
        &["permission", "Permission"],
        "Check file permissions and agent permission mode",
    ),
    (
        "timeout",
        &["timeout", "Timeout"],
        "Increase timeout limits or simplify story scope",
    ),
    (
        "needs_input",
        &["needs input", "Needs input"],
        "Provide more context in story scope or add default values",
    ),
];

const OTHER: &str = "other";
const OTHER_RECOMMENDATION: &str = "Review agent output for the remaining failures";

fn classify(reason: &str) -> &'static str {
    BUCKETS
        .iter()
        .find(|(_, needles, _)| needles.iter().any(|n| reason.contains(n)))
        .map_or(OTHER, |(name, _, _)| *name)
}

/// Bucket failed results by their stuck reason.
pub fn analyze_stuck_patterns(results: &[IterationResult]) -> StuckAnalysis {
    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    let mut total_stuck = 0;

    for reason in results
        .iter()
        .filter(|r| !r.success)
        .filter_map(|r| r.stuck_reason.as_deref())
    {
        total_stuck += 1;
        *counts.entry(classify(reason)).or_default() += 1;
    }

    let mut patterns: Vec<PatternCount> = counts
        .iter()
        .map(|(pattern, count)| PatternCount {
            pattern: *pattern,
            count: *count,
        })
        .collect();
    patterns.sort_by(|a, b| b.count.cmp(&a.count).then(a.pattern.cmp(b.pattern)));

    let mut recommendations: Vec<&'static str> = BUCKETS
        .iter()
        .filter(|(name, _, _)| counts.contains_key(name))
        .map(|(_, _, rec)| *rec)
        .collect();
    if counts.contains_key(OTHER) {
        recommendations.push(OTHER_RECOMMENDATION);
    }

    StuckAnalysis {
        total_stuck,
        patterns,
        recommendations,
    }
}

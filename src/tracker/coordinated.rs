//! Best-effort all-or-nothing commits across several repositories.
//!
//! Every repository is attempted; if any fails after another has committed,
//! the committed ones are soft-reset by one commit. This is not atomic: a
//! crash during rollback, or a reset that fails, leaves commits behind.
//! Those repositories are listed in `rollback_failures` so callers can
//! surface [`CommitError::PartialRollback`].

use crate::errors::CommitError;
use crate::tracker::GitTracker;
use std::path::PathBuf;
use tracing::{info, warn};

pub const ROLLED_BACK: &str = "rolled back due to failure in another repository";

#[derive(Debug, Clone)]
pub struct CommitTarget {
    pub name: String,
    pub path: PathBuf,
    /// Workdir-relative paths; empty stages everything
    pub files: Vec<String>,
}

impl CommitTarget {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            files: Vec::new(),
        }
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepoCommitResult {
    pub repo: String,
    pub success: bool,
    pub sha: Option<String>,
    /// Nothing was staged, so nothing was committed
    pub no_changes: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CoordinatedCommitReport {
    pub results: Vec<RepoCommitResult>,
    pub rollback_failures: Vec<String>,
}

impl CoordinatedCommitReport {
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    pub fn committed_shas(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| r.sha.as_deref())
            .collect()
    }

    /// Fail when a rollback left commits behind.
    pub fn into_result(self) -> Result<Self, CommitError> {
        if self.rollback_failures.is_empty() {
            Ok(self)
        } else {
            Err(CommitError::PartialRollback {
                repos: self.rollback_failures,
            })
        }
    }
}

fn commit_one(target: &CommitTarget, message: &str) -> Result<Option<String>, CommitError> {
    let tracker = GitTracker::open(&target.name, &target.path)?;
    tracker.stage(&target.files)?;
    if !tracker.has_staged_changes()? {
        return Ok(None);
    }
    tracker.commit(message).map(Some)
}

pub fn coordinated_commit(targets: &[CommitTarget], message: &str) -> CoordinatedCommitReport {
    let mut report = CoordinatedCommitReport::default();

    for target in targets {
        let result = match commit_one(target, message) {
            Ok(Some(sha)) => RepoCommitResult {
                repo: target.name.clone(),
                success: true,
                sha: Some(sha),
                no_changes: false,
                error: None,
            },
            Ok(None) => RepoCommitResult {
                repo: target.name.clone(),
                success: true,
                sha: None,
                no_changes: true,
                error: None,
            },
            Err(e) => {
                warn!(repo = %target.name, error = %e, "commit failed");
                RepoCommitResult {
                    repo: target.name.clone(),
                    success: false,
                    sha: None,
                    no_changes: false,
                    error: Some(e.to_string()),
                }
            }
        };
        report.results.push(result);
    }

    let any_failed = report.results.iter().any(|r| !r.success);
    let any_committed = report.results.iter().any(|r| r.sha.is_some());
    if !(any_failed && any_committed) {
        return report;
    }

    for (target, result) in targets.iter().zip(report.results.iter_mut()) {
        if result.sha.is_some() {
            let reset = GitTracker::open(&target.name, &target.path).and_then(|t| t.reset_soft_one());
            match reset {
                Ok(()) => info!(repo = %target.name, "rolled back commit"),
                Err(e) => {
                    warn!(repo = %target.name, error = %e, "rollback failed");
                    report.rollback_failures.push(target.name.clone());
                }
            }
        }
        if result.success {
            result.success = false;
            result.error = Some(ROLLED_BACK.to_string());
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::git::test_support::{commit_file, init_repo};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_commits_every_repo() {
        let api = tempdir().unwrap();
        let web = tempdir().unwrap();
        init_repo(api.path());
        init_repo(web.path());
        commit_file(api.path(), "a.txt", "1", "init");
        commit_file(web.path(), "w.txt", "1", "init");
        fs::write(api.path().join("a.txt"), "2").unwrap();

        let report = coordinated_commit(
            &[
                CommitTarget::new("api", api.path()),
                CommitTarget::new("web", web.path()),
            ],
            "Story 1: login",
        );
        assert!(report.all_succeeded());
        assert_eq!(report.committed_shas().len(), 1);
        assert!(report.results[1].no_changes);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_explicit_files_limit_what_is_committed() {
        let api = tempdir().unwrap();
        init_repo(api.path());
        commit_file(api.path(), "a.txt", "1", "init");
        commit_file(api.path(), "b.txt", "1", "add b");
        commit_file(api.path(), "c.txt", "1", "add c");
        fs::write(api.path().join("a.txt"), "2").unwrap();
        fs::write(api.path().join("b.txt"), "2").unwrap();
        fs::remove_file(api.path().join("c.txt")).unwrap();

        let report = coordinated_commit(
            &[CommitTarget::new("api", api.path())
                .with_files(vec!["a.txt".to_string(), "c.txt".to_string()])],
            "Story 5: only a and c",
        );
        assert!(report.all_succeeded());
        assert_eq!(report.committed_shas().len(), 1);

        let repo = git2::Repository::open(api.path()).unwrap();
        let tree = repo.head().unwrap().peel_to_tree().unwrap();
        let content = |name: &str| {
            let entry = tree.get_path(std::path::Path::new(name)).unwrap();
            let blob = repo.find_blob(entry.id()).unwrap();
            String::from_utf8(blob.content().to_vec()).unwrap()
        };
        assert_eq!(content("a.txt"), "2");
        assert_eq!(content("b.txt"), "1");
        assert!(tree.get_path(std::path::Path::new("c.txt")).is_err());
    }

    #[test]
    fn test_failure_rolls_back_committed_repos() {
        let api = tempdir().unwrap();
        let web = tempdir().unwrap();
        let docs = tempdir().unwrap();
        init_repo(api.path());
        init_repo(web.path());
        let api_initial = commit_file(api.path(), "a.txt", "1", "init");
        let web_initial = commit_file(web.path(), "w.txt", "1", "init");
        fs::write(api.path().join("a.txt"), "2").unwrap();
        fs::write(web.path().join("w.txt"), "2").unwrap();

        let report = coordinated_commit(
            &[
                CommitTarget::new("api", api.path()),
                CommitTarget::new("web", web.path()),
                CommitTarget::new("docs", docs.path()),
            ],
            "Story 2: sessions",
        );

        assert!(report.results.iter().all(|r| !r.success));
        assert_eq!(report.results[0].error.as_deref(), Some(ROLLED_BACK));
        assert_eq!(report.results[1].error.as_deref(), Some(ROLLED_BACK));
        assert!(report.results[2].error.as_deref().unwrap().contains("docs"));
        assert!(report.rollback_failures.is_empty());

        let api_head = GitTracker::open("api", api.path()).unwrap().head_sha();
        let web_head = GitTracker::open("web", web.path()).unwrap().head_sha();
        assert_eq!(api_head, Some(api_initial));
        assert_eq!(web_head, Some(web_initial));
    }

    #[test]
    fn test_rollback_failure_is_reported() {
        let api = tempdir().unwrap();
        let docs = tempdir().unwrap();
        init_repo(api.path());
        fs::write(api.path().join("a.txt"), "root").unwrap();

        // A root commit has no parent to reset to
        let report = coordinated_commit(
            &[
                CommitTarget::new("api", api.path()),
                CommitTarget::new("docs", docs.path()),
            ],
            "Story 3",
        );
        assert_eq!(report.rollback_failures, vec!["api"]);
        let err = report.into_result().unwrap_err();
        assert_eq!(err.to_string(), "Partial rollback: failed to reset api");
    }

    #[test]
    fn test_failure_without_commits_needs_no_rollback() {
        let api = tempdir().unwrap();
        let docs = tempdir().unwrap();
        init_repo(api.path());
        commit_file(api.path(), "a.txt", "1", "init");

        let report = coordinated_commit(
            &[
                CommitTarget::new("api", api.path()),
                CommitTarget::new("docs", docs.path()),
            ],
            "Story 4",
        );
        assert!(report.results[0].success);
        assert!(report.results[0].no_changes);
        assert!(!report.results[1].success);
    }
}

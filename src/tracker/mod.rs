pub mod coordinated;
pub mod git;

pub use coordinated::{CommitTarget, CoordinatedCommitReport, RepoCommitResult, coordinated_commit};
pub use git::GitTracker;

use crate::feature::Story;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Where story repositories live on disk.
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    root: PathBuf,
    repos: BTreeMap<String, PathBuf>,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            repos: BTreeMap::new(),
        }
    }

    pub fn with_repo(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.repos.insert(name.into(), path.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mapped path, else `<root>/<name>` when that is a directory, else the root.
    pub fn resolve(&self, name: &str) -> PathBuf {
        if let Some(path) = self.repos.get(name) {
            return path.clone();
        }
        let candidate = self.root.join(name);
        if candidate.is_dir() {
            candidate
        } else {
            self.root.clone()
        }
    }

    /// One commit target per distinct working tree a story touches.
    pub fn commit_targets(&self, story: &Story) -> Vec<CommitTarget> {
        if story.repos.is_empty() {
            return vec![CommitTarget::new("project", &self.root)];
        }
        let mut targets: Vec<CommitTarget> = Vec::new();
        for name in &story.repos {
            let path = self.resolve(name);
            if targets.iter().all(|t| t.path != path) {
                targets.push(CommitTarget::new(name, path));
            }
        }
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_resolve_and_targets() {
        let root = tempdir().unwrap();
        std::fs::create_dir(root.path().join("web")).unwrap();
        let ws = Workspace::new(root.path()).with_repo("api", root.path().join("services/api"));

        assert_eq!(ws.resolve("api"), root.path().join("services/api"));
        assert_eq!(ws.resolve("web"), root.path().join("web"));
        assert_eq!(ws.resolve("docs"), root.path());

        let story = Story::new("1", "Cross-repo change").with_repos(&["api", "web", "docs", "infra"]);
        let targets = ws.commit_targets(&story);
        let names: Vec<&str> = targets.iter().map(|t| t.name.as_str()).collect();
        // docs and infra both fall back to the root
        assert_eq!(names, vec!["api", "web", "docs"]);

        let targets = ws.commit_targets(&Story::new("2", "No repos listed"));
        assert_eq!(targets[0].path, root.path());
    }
}

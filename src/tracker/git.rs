use crate::errors::CommitError;
use git2::{IndexAddOption, Repository, ResetType, Signature};
use std::path::Path;

/// Thin git2 wrapper used for commits outside the agent.
pub struct GitTracker {
    repo: Repository,
    name: String,
}

impl GitTracker {
    /// Open the repository at `path`, naming it `name` in errors.
    pub fn open(name: &str, path: &Path) -> Result<Self, CommitError> {
        let repo = Repository::open(path).map_err(|source| CommitError::Git {
            repo: name.to_string(),
            source,
        })?;
        Ok(Self {
            repo,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn git_err(&self, source: git2::Error) -> CommitError {
        CommitError::Git {
            repo: self.name.clone(),
            source,
        }
    }

    /// Stage `files` (workdir-relative), or every change when empty.
    pub fn stage(&self, files: &[String]) -> Result<(), CommitError> {
        let mut index = self.repo.index().map_err(|e| self.git_err(e))?;
        index.read(false).map_err(|e| self.git_err(e))?;
        if files.is_empty() {
            index
                .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
                .map_err(|e| self.git_err(e))?;
            index
                .update_all(["*"].iter(), None)
                .map_err(|e| self.git_err(e))?;
        } else {
            let workdir = self.repo.workdir().unwrap_or_else(|| Path::new("."));
            for file in files {
                let path = Path::new(file);
                if workdir.join(path).exists() {
                    index.add_path(path).map_err(|e| self.git_err(e))?;
                } else {
                    index.remove_path(path).map_err(|e| self.git_err(e))?;
                }
            }
        }
        index.write().map_err(|e| self.git_err(e))
    }

    /// Whether the index differs from HEAD.
    pub fn has_staged_changes(&self) -> Result<bool, CommitError> {
        let head_tree = self.head_commit().and_then(|c| c.tree().ok());
        let diff = self
            .repo
            .diff_tree_to_index(head_tree.as_ref(), None, None)
            .map_err(|e| self.git_err(e))?;
        Ok(diff.deltas().len() > 0)
    }

    /// Commit the index and return the new sha.
    pub fn commit(&self, message: &str) -> Result<String, CommitError> {
        let mut index = self.repo.index().map_err(|e| self.git_err(e))?;
        let tree_id = index.write_tree().map_err(|e| self.git_err(e))?;
        let tree = self.repo.find_tree(tree_id).map_err(|e| self.git_err(e))?;
        let sig = self
            .repo
            .signature()
            .or_else(|_| Signature::now("claw", "claw@localhost"))
            .map_err(|e| self.git_err(e))?;

        let parent = self.head_commit();
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .map_err(|e| self.git_err(e))?;
        Ok(oid.to_string())
    }

    /// Move HEAD back one commit, keeping the changes staged.
    pub fn reset_soft_one(&self) -> Result<(), CommitError> {
        let head = self
            .head_commit()
            .ok_or_else(|| self.git_err(git2::Error::from_str("no commit to reset")))?;
        let parent = head.parent(0).map_err(|e| self.git_err(e))?;
        self.repo
            .reset(parent.as_object(), ResetType::Soft, None)
            .map_err(|e| self.git_err(e))
    }

    fn head_commit(&self) -> Option<git2::Commit<'_>> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
    }

    /// HEAD sha, `None` on an unborn branch.
    pub fn head_sha(&self) -> Option<String> {
        self.head_commit().map(|c| c.id().to_string())
    }

    pub fn current_branch(&self) -> Option<String> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.shorthand().map(str::to_string))
    }
}

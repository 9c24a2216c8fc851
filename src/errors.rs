//! Typed error hierarchy for claw.
//!
//! Story-level failures are not errors: they become session state
//! transitions. These enums cover the failures that do propagate:
//! - `SessionError`: run/resume setup and top-level loop failures
//! - `AgentError`: execution agent process plumbing
//! - `StoreError`: document store reads and writes
//! - `CheckpointError`: checkpoint document decoding
//! - `CommitError`: coordinated multi-repository commits

use thiserror::Error;

/// Errors from starting or driving a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Feature '{id}' not found")]
    FeatureNotFound { id: String },

    #[error("No checkpoint found for feature '{feature_id}'")]
    NoCheckpoint { feature_id: String },

    #[error("Feature '{id}' is invalid:\n{report}")]
    InvalidFeature { id: String, report: String },

    #[error("Invalid session configuration:\n{0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from spawning or talking to the execution agent process.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to spawn agent process '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write prompt to agent stdin: {0}")]
    StdinWrite(#[source] std::io::Error),

    #[error("Agent process has no stdout pipe")]
    MissingStdout,
}

/// Errors from the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access note '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed frontmatter in note '{path}': {source}")]
    Frontmatter {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Errors from decoding a checkpoint document.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint for '{feature_id}' has no embedded data block")]
    MissingDataBlock { feature_id: String },

    #[error("Checkpoint for '{feature_id}' has a malformed data block: {source}")]
    MalformedData {
        feature_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Checkpoint version {found} is not supported (expected {expected})")]
    UnsupportedVersion { found: String, expected: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from coordinated commits.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error("Git error in {repo}: {source}")]
    Git {
        repo: String,
        #[source]
        source: git2::Error,
    },

    /// A rollback after partial failure could not reset every repository.
    /// The listed repositories still hold the commit that should have been undone.
    #[error("Partial rollback: failed to reset {}", repos.join(", "))]
    PartialRollback { repos: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_error_feature_not_found_is_matchable() {
        let err = SessionError::FeatureNotFound {
            id: "auth".to_string(),
        };
        match &err {
            SessionError::FeatureNotFound { id } => assert_eq!(id, "auth"),
            _ => panic!("Expected FeatureNotFound variant"),
        }
        assert_eq!(err.to_string(), "Feature 'auth' not found");
    }

    #[test]
    fn agent_error_spawn_failed_carries_command() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err = AgentError::SpawnFailed {
            command: "claude".to_string(),
            source: io_err,
        };
        assert!(err.to_string().contains("'claude'"));
        match err {
            AgentError::SpawnFailed { source, .. } => {
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound)
            }
            _ => panic!("Expected SpawnFailed variant"),
        }
    }

    #[test]
    fn store_error_converts_into_session_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: SessionError = StoreError::Io {
            path: "Projects/demo/features/auth/_feature".to_string(),
            source: io_err,
        }
        .into();
        assert!(matches!(err, SessionError::Store(StoreError::Io { .. })));
    }

    #[test]
    fn partial_rollback_lists_repositories() {
        let err = CommitError::PartialRollback {
            repos: vec!["api".to_string(), "web".to_string()],
        };
        assert_eq!(err.to_string(), "Partial rollback: failed to reset api, web");
    }

    #[test]
    fn anyhow_converts_into_session_error_other() {
        let err: SessionError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, SessionError::Other(_)));
        assert_eq!(err.to_string(), "boom");
    }
}

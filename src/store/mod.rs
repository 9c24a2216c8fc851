//! Document store for features, session logs and checkpoints.
//!
//! Paths are logical, slash-separated and extension-less
//! (`Projects/shop/features/auth/_checkpoint`). The store decides how they
//! map to storage; [`MarkdownVault`] keeps one `.md` file per note.

pub mod vault;

pub use vault::MarkdownVault;

use crate::errors::StoreError;
use chrono::{DateTime, Local};

/// A note's body plus its parsed YAML frontmatter, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub content: String,
    pub frontmatter: Option<serde_yaml::Value>,
}

/// One row of a session log table.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub date: DateTime<Local>,
    pub action: String,
    pub details: String,
}

impl LogEntry {
    /// An entry stamped with the current local time.
    pub fn now(action: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            date: Local::now(),
            action: action.into(),
            details: details.into(),
        }
    }
}

/// Immediate children of a logical directory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirListing {
    pub dirs: Vec<String>,
    pub files: Vec<String>,
}

/// Storage for markdown notes.
pub trait DocumentStore: Send + Sync {
    fn read_note(&self, path: &str) -> Result<Option<Note>, StoreError>;

    fn write_note(
        &self,
        path: &str,
        content: &str,
        frontmatter: Option<&serde_yaml::Value>,
    ) -> Result<(), StoreError>;

    /// Append a row to the log table at `path`, creating the note if needed.
    /// Returns false instead of failing.
    fn append_session_log(&self, path: &str, entry: &LogEntry) -> bool;

    fn exists(&self, path: &str) -> bool;

    fn delete_note(&self, path: &str) -> Result<(), StoreError>;

    fn list_directory(&self, path: &str) -> Result<DirListing, StoreError>;
}

/// Split `---` delimited YAML frontmatter off a note.
pub fn split_frontmatter(raw: &str) -> (Option<&str>, &str) {
    let Some(rest) = raw.strip_prefix("---\n") else {
        return (None, raw);
    };
    if let Some(end) = rest.find("\n---\n") {
        let body = &rest[end + 5..];
        (Some(&rest[..end + 1]), body.strip_prefix('\n').unwrap_or(body))
    } else if let Some(yaml) = rest.strip_suffix("\n---") {
        (Some(yaml), "")
    } else {
        (None, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_frontmatter_present() {
        let raw = "---\nid: auth\ntitle: Auth\n---\n\n# Auth\n";
        let (fm, body) = split_frontmatter(raw);
        assert_eq!(fm, Some("id: auth\ntitle: Auth\n"));
        assert_eq!(body, "# Auth\n");
    }

    #[test]
    fn test_split_frontmatter_absent() {
        let raw = "# Just a note\n---\nnot frontmatter\n";
        let (fm, body) = split_frontmatter(raw);
        assert!(fm.is_none());
        assert_eq!(body, raw);
    }

    #[test]
    fn test_split_frontmatter_unterminated_is_body() {
        let raw = "---\nid: auth\n";
        let (fm, body) = split_frontmatter(raw);
        assert!(fm.is_none());
        assert_eq!(body, raw);
    }
}

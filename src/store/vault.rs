use super::{DirListing, DocumentStore, LogEntry, Note, split_frontmatter};
use crate::errors::StoreError;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

const LOG_HEADER: &str = "# Session Log\n\n| Date | Action | Details |\n|------|--------|---------|\n";

/// Filesystem document store: logical path `a/b/c` is `<root>/a/b/c.md`.
#[derive(Debug, Clone)]
pub struct MarkdownVault {
    root: PathBuf,
}

impl MarkdownVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve_dir(&self, path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(path.trim_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StoreError::Io {
                path: path.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "note paths must be relative and must not contain '..'",
                ),
            });
        }
        Ok(self.root.join(relative))
    }

    fn note_file(&self, path: &str) -> Result<PathBuf, StoreError> {
        let mut file = self.resolve_dir(path)?.into_os_string();
        file.push(".md");
        Ok(PathBuf::from(file))
    }

    fn io_err(path: &str) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            path: path.to_string(),
            source,
        }
    }

    fn try_append_log(&self, path: &str, entry: &LogEntry) -> Result<(), StoreError> {
        let file = self.note_file(path)?;
        let mut content = if file.exists() {
            fs::read_to_string(&file).map_err(Self::io_err(path))?
        } else {
            LOG_HEADER.to_string()
        };
        if !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&format!(
            "| {} | {} | {} |\n",
            entry.date.format("%Y-%m-%d %H:%M"),
            escape_cell(&entry.action),
            escape_cell(&entry.details)
        ));
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).map_err(Self::io_err(path))?;
        }
        fs::write(&file, content).map_err(Self::io_err(path))
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\r', '\n'], " ")
}

impl DocumentStore for MarkdownVault {
    fn read_note(&self, path: &str) -> Result<Option<Note>, StoreError> {
        let file = self.note_file(path)?;
        let raw = match fs::read_to_string(&file) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_err(path)(e)),
        };

        let (yaml, body) = split_frontmatter(&raw);
        let frontmatter = match yaml {
            Some(yaml) => Some(serde_yaml::from_str(yaml).map_err(|source| {
                StoreError::Frontmatter {
                    path: path.to_string(),
                    source,
                }
            })?),
            None => None,
        };

        Ok(Some(Note {
            content: body.to_string(),
            frontmatter,
        }))
    }

    fn write_note(
        &self,
        path: &str,
        content: &str,
        frontmatter: Option<&serde_yaml::Value>,
    ) -> Result<(), StoreError> {
        let file = self.note_file(path)?;
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).map_err(Self::io_err(path))?;
        }

        let mut raw = String::new();
        if let Some(frontmatter) = frontmatter {
            let yaml = serde_yaml::to_string(frontmatter).map_err(|source| {
                StoreError::Frontmatter {
                    path: path.to_string(),
                    source,
                }
            })?;
            raw.push_str("---\n");
            raw.push_str(&yaml);
            if !yaml.ends_with('\n') {
                raw.push('\n');
            }
            raw.push_str("---\n\n");
        }
        raw.push_str(content);

        fs::write(&file, raw).map_err(Self::io_err(path))
    }

    fn append_session_log(&self, path: &str, entry: &LogEntry) -> bool {
        match self.try_append_log(path, entry) {
            Ok(()) => true,
            Err(e) => {
                warn!(path, error = %e, "failed to append session log");
                false
            }
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.note_file(path).map(|f| f.is_file()).unwrap_or(false)
    }

    fn delete_note(&self, path: &str) -> Result<(), StoreError> {
        let file = self.note_file(path)?;
        match fs::remove_file(&file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_err(path)(e)),
        }
    }

    fn list_directory(&self, path: &str) -> Result<DirListing, StoreError> {
        let dir = self.resolve_dir(path)?;
        let mut listing = DirListing::default();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(listing),
            Err(e) => return Err(Self::io_err(path)(e)),
        };

        for entry in entries {
            let entry = entry.map_err(Self::io_err(path))?;
            let name = entry.file_name().to_string_lossy().to_string();
            let file_type = entry.file_type().map_err(Self::io_err(path))?;
            if file_type.is_dir() {
                listing.dirs.push(name);
            } else if let Some(stem) = name.strip_suffix(".md") {
                listing.files.push(stem.to_string());
            }
        }
        listing.dirs.sort();
        listing.files.sort();
        Ok(listing)
    }
}

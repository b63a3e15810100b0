//! Watched root and root-relative entry names

use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::error::SessionError;

/// Canonical absolute path of an existing directory being watched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedRoot(PathBuf);

impl WatchedRoot {
    /// Resolve `path` to its canonical form; it must be a readable directory
    pub async fn open(path: &Path) -> Result<Self, SessionError> {
        let watch_init = |reason: String| SessionError::WatchInit {
            path: path.display().to_string(),
            reason,
        };

        let canonical = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| watch_init(e.to_string()))?;
        let metadata = tokio::fs::metadata(&canonical)
            .await
            .map_err(|e| watch_init(e.to_string()))?;
        if !metadata.is_dir() {
            return Err(watch_init("not a directory".to_string()));
        }
        tokio::fs::read_dir(&canonical)
            .await
            .map_err(|e| watch_init(e.to_string()))?;

        Ok(Self(canonical))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Name of `path` relative to this root, if it lies strictly inside it
    pub fn entry_for(&self, path: &Path) -> Option<RelativeEntry> {
        let relative = path.strip_prefix(&self.0).ok()?;
        RelativeEntry::from_relative_path(relative)
    }

    /// Whether the root still exists as a readable directory
    pub async fn is_accessible(&self) -> bool {
        match tokio::fs::metadata(&self.0).await {
            Ok(metadata) if metadata.is_dir() => tokio::fs::read_dir(&self.0).await.is_ok(),
            _ => false,
        }
    }
}

/// A `/`-separated path relative to the watched root.
///
/// Never empty and never contains `.`, `..`, root or prefix components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelativeEntry(String);

impl RelativeEntry {
    pub fn new(entry: &str) -> Option<Self> {
        if entry.is_empty() {
            return None;
        }
        let valid = entry
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
        valid.then(|| Self(entry.to_string()))
    }

    pub fn from_relative_path(path: &Path) -> Option<Self> {
        let mut segments = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(segment) => segments.push(segment.to_str()?),
                _ => return None,
            }
        }
        if segments.is_empty() {
            return None;
        }
        Some(Self(segments.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelativeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

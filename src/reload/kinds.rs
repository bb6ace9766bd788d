//! File change and file kind types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::HotReloadConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

/// A pending change, collapsed per path before processing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub kind: ChangeKind,
    pub path: PathBuf,
    /// Previous location for renames
    pub old_path: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
}

impl FileChange {
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            old_path: None,
            timestamp: Utc::now(),
        }
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::new(ChangeKind::Modified, path)
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::new(ChangeKind::Deleted, path)
    }

    pub fn renamed(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            old_path: Some(from.into()),
            ..Self::new(ChangeKind::Renamed, to)
        }
    }

    pub fn is_delete(&self) -> bool {
        self.kind == ChangeKind::Deleted
    }
}

/// How a tracked file is reloaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// Compiled, then executed in the interpreter pool
    Script,
    /// Parsed for well-formedness only
    Config,
    /// Probed for readability only
    Other,
}

impl FileKind {
    /// Kind of `path`, or `None` when its extension is not tracked at all
    pub fn classify(path: &Path, config: &HotReloadConfig) -> Option<Self> {
        let extension = extension_of(path)?;
        let listed = |list: &[String]| list.iter().any(|e| e.eq_ignore_ascii_case(&extension));

        if !listed(&config.extensions) {
            return None;
        }
        if listed(&config.script_extensions) {
            Some(FileKind::Script)
        } else if listed(&config.config_extensions) {
            Some(FileKind::Config)
        } else {
            Some(FileKind::Other)
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Script => "script",
            FileKind::Config => "config",
            FileKind::Other => "other",
        }
    }
}

pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

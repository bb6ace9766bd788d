//! OS file watching via `notify`, translated into [`FileChange`]s.

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{trace, warn};

use super::debounce::ChangeIntake;
use super::kinds::{ChangeKind, FileChange};
use crate::error::Result;

/// A registered watch root
#[derive(Debug, Clone, Serialize)]
pub struct WatchedPath {
    pub path: PathBuf,
    pub recursive: bool,
    pub added_at: chrono::DateTime<chrono::Utc>,
}

impl WatchedPath {
    pub(crate) fn mode(&self) -> RecursiveMode {
        if self.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        }
    }
}

/// Create an OS watcher that feeds the intake
pub(crate) fn create_watcher(intake: Arc<ChangeIntake>) -> Result<RecommendedWatcher> {
    let watcher = notify::recommended_watcher(move |event: notify::Result<Event>| match event {
        Ok(event) => {
            for change in translate(&event) {
                trace!(path = %change.path.display(), kind = ?change.kind, "RELOAD: File event");
                intake.enqueue(change);
            }
        }
        Err(e) => warn!("RELOAD: File watcher error: {}", e),
    })?;
    Ok(watcher)
}

/// Map one notify event onto zero or more changes
pub(crate) fn translate(event: &Event) -> Vec<FileChange> {
    let each = |kind: ChangeKind| -> Vec<FileChange> {
        event
            .paths
            .iter()
            .map(|path| FileChange::new(kind, path.clone()))
            .collect()
    };

    match &event.kind {
        EventKind::Create(_) => each(ChangeKind::Created),
        EventKind::Remove(_) => each(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] => vec![FileChange::renamed(from.clone(), to.clone())],
            _ => each(ChangeKind::Modified),
        },
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => each(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => each(ChangeKind::Created),
        EventKind::Modify(_) => each(ChangeKind::Modified),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// Every file under `root` accepted by `keep`
pub(crate) fn index_files(root: &Path, recursive: bool, keep: &dyn Fn(&Path) -> bool) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), "RELOAD: Cannot index directory: {}", e);
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            match entry.file_type() {
                Ok(kind) if kind.is_dir() => {
                    if recursive {
                        pending.push(path);
                    }
                }
                Ok(kind) if kind.is_file() => {
                    if keep(&path) {
                        found.push(path);
                    }
                }
                _ => {}
            }
        }
    }
    found
}

//! Debounce queue: pending changes are held until the event stream has been quiet
//! for one window, then collapsed so the last event per path wins.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::kinds::{FileChange, FileKind};
use super::HotReloadManager;
use crate::config::HotReloadConfig;

/// Shared entry point for every change source
pub(crate) struct ChangeIntake {
    pending: Mutex<Vec<FileChange>>,
    wake: Notify,
    config: Arc<HotReloadConfig>,
    received: AtomicU64,
}

impl ChangeIntake {
    pub(crate) fn new(config: Arc<HotReloadConfig>) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            wake: Notify::new(),
            config,
            received: AtomicU64::new(0),
        }
    }

    /// Queue a change and re-arm the debounce timer; untracked files are ignored
    pub(crate) fn enqueue(&self, change: FileChange) -> bool {
        let tracked = FileKind::classify(&change.path, &self.config).is_some()
            || change
                .old_path
                .as_deref()
                .is_some_and(|old| FileKind::classify(old, &self.config).is_some());
        if !tracked {
            return false;
        }

        self.pending.lock().push(change);
        self.received.fetch_add(1, Ordering::Relaxed);
        self.wake.notify_one();
        true
    }

    pub(crate) fn drain(&self) -> Vec<FileChange> {
        std::mem::take(&mut *self.pending.lock())
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    pub(crate) fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub(crate) fn wake(&self) {
        self.wake.notify_one();
    }
}

/// Keep only the latest change per path, ordered by when that change arrived.
///
/// A rename also supersedes earlier changes to its old path.
pub fn collapse(changes: Vec<FileChange>) -> Vec<FileChange> {
    let mut latest: HashMap<PathBuf, usize> = HashMap::with_capacity(changes.len());
    for (index, change) in changes.iter().enumerate() {
        latest.insert(change.path.clone(), index);
        if let Some(old) = &change.old_path {
            latest.insert(old.clone(), index);
        }
    }

    changes
        .into_iter()
        .enumerate()
        .filter(|(index, change)| latest.get(&change.path) == Some(index))
        .map(|(_, change)| change)
        .collect()
}

/// Process the queue once it has been quiet for the debounce window
pub(crate) async fn run(manager: HotReloadManager, token: CancellationToken) {
    let window = manager.config().debounce_window();
    let intake = manager.intake();
    let mut deadline: Option<Instant> = None;

    loop {
        let timer = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = token.cancelled() => break,
            _ = intake.wake.notified() => {
                deadline = Some(Instant::now() + window);
            }
            _ = timer => {
                deadline = None;
                manager.process_pending_changes().await;
            }
        }
    }
    debug!("RELOAD: Debounce loop exited");
}

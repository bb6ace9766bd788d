//! # Hot-Reload Manager
//!
//! Watches directories for script and configuration changes and reloads them
//! with minimal latency while coalescing bursts of writes.
//!
//! File events from the OS watcher (or any other source through
//! [`HotReloadManager::enqueue_change`]) land in a pending queue. Every event
//! re-arms a debounce timer; once the stream has been quiet for one window the
//! queue is drained, collapsed so the last event per path wins, and each
//! surviving change is reloaded concurrently:
//!
//! - **Scripts** are compiled first and only executed when compilation succeeds
//! - **Configuration files** are parsed for well-formedness
//! - **Anything else** is probed for readability
//!
//! A failed reload never aborts its batch. Every outcome is counted and
//! announced on the notification sink.

pub mod debounce;
pub mod kinds;
pub mod stats;
pub mod watcher;

use dashmap::DashMap;
use notify::{RecommendedWatcher, Watcher};
use parking_lot::Mutex;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::HotReloadConfig;
use crate::constants::events;
use crate::error::{HostError, Result};
use crate::integrations::{notification, InterpreterPool, NotificationSink};
use crate::logging::log_reload_outcome;

pub use debounce::collapse;
pub use kinds::{ChangeKind, FileChange, FileKind};
pub use stats::{BatchReloadResult, HotReloadStats, ReloadOutcome, ReloadStatus};
pub use watcher::WatchedPath;

use debounce::ChangeIntake;

struct DebounceTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Clone)]
pub struct HotReloadManager {
    config: Arc<HotReloadConfig>,
    intake: Arc<ChangeIntake>,
    interpreter: Option<Arc<dyn InterpreterPool>>,
    sink: Option<Arc<dyn NotificationSink>>,
    watched: Arc<DashMap<PathBuf, WatchedPath>>,
    tracked: Arc<DashMap<PathBuf, FileKind>>,
    watcher: Arc<Mutex<Option<RecommendedWatcher>>>,
    stats: Arc<Mutex<HotReloadStats>>,
    task: Arc<Mutex<Option<DebounceTask>>>,
    batch_lock: Arc<tokio::sync::Mutex<()>>,
}

impl std::fmt::Debug for HotReloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotReloadManager")
            .field("watched", &self.watched.len())
            .field("tracked", &self.tracked.len())
            .field("pending", &self.intake.pending_len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl HotReloadManager {
    pub fn new(config: HotReloadConfig) -> Self {
        let config = Arc::new(config);
        Self {
            intake: Arc::new(ChangeIntake::new(config.clone())),
            config,
            interpreter: None,
            sink: None,
            watched: Arc::new(DashMap::new()),
            tracked: Arc::new(DashMap::new()),
            watcher: Arc::new(Mutex::new(None)),
            stats: Arc::new(Mutex::new(HotReloadStats::default())),
            task: Arc::new(Mutex::new(None)),
            batch_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Interpreter pool used to compile and execute reloaded scripts
    pub fn with_interpreter_pool(mut self, pool: Arc<dyn InterpreterPool>) -> Self {
        self.interpreter = Some(pool);
        self
    }

    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &HotReloadConfig {
        &self.config
    }

    pub(crate) fn intake(&self) -> Arc<ChangeIntake> {
        self.intake.clone()
    }

    /// Watch a directory and index the tracked files already inside it.
    ///
    /// Returns the number of files indexed. Re-adding a watched path re-indexes it.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub async fn add_watch_path(&self, path: impl AsRef<Path>, recursive: bool) -> Result<usize> {
        let root = tokio::fs::canonicalize(path.as_ref()).await?;
        if !tokio::fs::metadata(&root).await?.is_dir() {
            return Err(HostError::Watch(format!(
                "not a directory: {}",
                root.display()
            )));
        }

        let config = self.config.clone();
        let scan_root = root.clone();
        let files = tokio::task::spawn_blocking(move || {
            watcher::index_files(&scan_root, recursive, &|file| {
                FileKind::classify(file, &config).is_some()
            })
        })
        .await
        .map_err(|e| HostError::Worker(e.to_string()))?;

        for file in &files {
            if let Some(kind) = FileKind::classify(file, &self.config) {
                self.tracked.insert(file.clone(), kind);
            }
        }

        let entry = WatchedPath {
            path: root.clone(),
            recursive,
            added_at: chrono::Utc::now(),
        };
        if let Some(watcher) = self.watcher.lock().as_mut() {
            watcher.watch(&root, entry.mode())?;
        }
        self.watched.insert(root.clone(), entry);

        info!(
            path = %root.display(),
            recursive,
            indexed = files.len(),
            "RELOAD: Watching directory"
        );
        Ok(files.len())
    }

    /// Stop watching a directory and forget every tracked file under it
    pub fn remove_watch_path(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let root = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if self.watched.remove(&root).is_none() {
            return false;
        }

        if let Some(watcher) = self.watcher.lock().as_mut() {
            if let Err(e) = watcher.unwatch(&root) {
                warn!(path = %root.display(), "RELOAD: Failed to unwatch directory: {}", e);
            }
        }

        let before = self.tracked.len();
        self.tracked.retain(|file, _| !file.starts_with(&root));
        info!(
            path = %root.display(),
            purged = before - self.tracked.len(),
            "RELOAD: Stopped watching directory"
        );
        true
    }

    /// Feed a change into the debounce queue; returns false for untracked files
    pub fn enqueue_change(&self, change: FileChange) -> bool {
        self.intake.enqueue(change)
    }

    pub fn pending_changes(&self) -> usize {
        self.intake.pending_len()
    }

    /// Drain the queue, collapse it per path, and reload what survives
    #[instrument(skip(self))]
    pub async fn process_pending_changes(&self) -> BatchReloadResult {
        let _batch = self.batch_lock.lock().await;
        let drained = self.intake.drain();
        if drained.is_empty() {
            return BatchReloadResult::default();
        }

        let started = Instant::now();
        let received = drained.len();
        let changes = collapse(drained);
        let coalesced = received - changes.len();

        let mut deleted = 0;
        let mut to_reload = Vec::new();
        for change in changes {
            if let Some(old) = &change.old_path {
                if self.tracked.remove(old).is_some() {
                    deleted += 1;
                    self.announce_deleted(old);
                }
            }
            if change.is_delete() {
                if self.tracked.remove(&change.path).is_some() {
                    deleted += 1;
                    self.announce_deleted(&change.path);
                }
            } else if FileKind::classify(&change.path, &self.config).is_some() {
                to_reload.push(change.path);
            }
        }

        let outcomes =
            futures::future::join_all(to_reload.iter().map(|path| self.reload_file(path))).await;
        let result = BatchReloadResult::from_outcomes(outcomes, deleted, started.elapsed());

        {
            let mut stats = self.stats.lock();
            stats.batches_processed += 1;
            stats.events_coalesced += coalesced as u64;
            stats.deleted_files += deleted as u64;
        }

        info!(
            received,
            coalesced,
            reloaded = result.total,
            succeeded = result.succeeded,
            failed = result.failed,
            deleted,
            duration_ms = result.duration.as_millis() as u64,
            "RELOAD: Processed change batch"
        );
        result
    }

    fn announce_deleted(&self, path: &Path) {
        info!(path = %path.display(), "RELOAD: Tracked file deleted");
        if let Some(sink) = &self.sink {
            notification::publish(
                sink.as_ref(),
                events::FILE_DELETED,
                json!({ "path": path.display().to_string() }),
            );
        }
    }

    /// Reload one file according to its kind
    pub async fn reload_file(&self, path: &Path) -> ReloadOutcome {
        let started = Instant::now();
        let kind = FileKind::classify(path, &self.config).unwrap_or(FileKind::Other);

        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            warn!(path = %path.display(), "RELOAD: File no longer exists, skipping reload");
            let outcome = ReloadOutcome {
                path: path.to_path_buf(),
                kind,
                status: ReloadStatus::Skipped,
                duration: started.elapsed(),
                message: Some("file no longer exists".to_string()),
            };
            self.stats.lock().record(&outcome);
            return outcome;
        }

        let result = match kind {
            FileKind::Script => self.reload_script(path).await,
            FileKind::Config => validate_config(path).await,
            FileKind::Other => probe_readable(path).await,
        };

        let (status, message) = match result {
            Ok(message) => (ReloadStatus::Succeeded, message),
            Err(message) => (ReloadStatus::Failed, message),
        };
        let outcome = ReloadOutcome {
            path: path.to_path_buf(),
            kind,
            status,
            duration: started.elapsed(),
            message: Some(message),
        };

        if FileKind::classify(path, &self.config).is_some() {
            self.tracked.insert(path.to_path_buf(), kind);
        }
        self.stats.lock().record(&outcome);

        let path_display = path.display().to_string();
        log_reload_outcome(
            &path_display,
            kind.as_str(),
            status.as_str(),
            outcome.duration,
            outcome.message.as_deref(),
        );
        if let Some(sink) = &self.sink {
            notification::publish(
                sink.as_ref(),
                events::FILE_RELOADED,
                json!({
                    "path": path_display,
                    "kind": kind.as_str(),
                    "success": outcome.is_success(),
                    "duration_ms": outcome.duration.as_millis() as u64,
                    "message": outcome.message,
                }),
            );
        }
        outcome
    }

    async fn reload_script(&self, path: &Path) -> std::result::Result<String, String> {
        let code = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("cannot read script: {e}"))?;
        let pool = self
            .interpreter
            .as_ref()
            .ok_or_else(|| "no interpreter pool available".to_string())?;

        let mut handle = pool
            .acquire(self.config.interpreter_timeout())
            .await
            .map_err(|e| e.to_string())?;

        let origin = path.display().to_string();
        let result = match handle.compile(&code, &origin).await {
            Err(e) => Err(format!("syntax error: {e}")),
            Ok(()) => {
                let output = handle.execute(&code, None, None).await;
                if output.ok {
                    Ok("script reloaded".to_string())
                } else {
                    Err(format!(
                        "execution failed: {}",
                        output.error.unwrap_or_else(|| "unknown error".to_string())
                    ))
                }
            }
        };
        pool.release(handle).await;
        result
    }

    /// Reload every tracked file regardless of change state
    #[instrument(skip(self))]
    pub async fn force_reload(&self) -> BatchReloadResult {
        let _batch = self.batch_lock.lock().await;
        let started = Instant::now();
        let mut paths: Vec<PathBuf> = self.tracked.iter().map(|e| e.key().clone()).collect();
        paths.sort();

        let outcomes =
            futures::future::join_all(paths.iter().map(|path| self.reload_file(path))).await;
        let result = BatchReloadResult::from_outcomes(outcomes, 0, started.elapsed());
        self.stats.lock().forced_reloads += 1;

        info!(
            total = result.total,
            succeeded = result.succeeded,
            failed = result.failed,
            "RELOAD: Forced reload complete"
        );
        if let Some(sink) = &self.sink {
            notification::publish(
                sink.as_ref(),
                events::BATCH_RELOADED,
                json!({
                    "total": result.total,
                    "succeeded": result.succeeded,
                    "failed": result.failed,
                    "skipped": result.skipped,
                    "duration_ms": result.duration.as_millis() as u64,
                }),
            );
        }
        result
    }

    /// Start the OS watcher and the debounce loop, watching every configured path
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            info!("RELOAD: Hot reload disabled by configuration");
            return Ok(());
        }
        if self.is_running() {
            return Ok(());
        }

        for path in &self.config.watch_paths {
            if self.watched.contains_key(path) {
                continue;
            }
            if let Err(e) = self.add_watch_path(path, self.config.recursive).await {
                warn!(path = %path.display(), "RELOAD: Skipping configured watch path: {}", e);
            }
        }

        let mut os_watcher = watcher::create_watcher(self.intake.clone())?;
        for entry in self.watched.iter() {
            os_watcher.watch(&entry.path, entry.mode())?;
        }

        let mut task = self.task.lock();
        if task.is_some() {
            return Ok(());
        }
        *self.watcher.lock() = Some(os_watcher);

        let token = CancellationToken::new();
        let handle = tokio::spawn(debounce::run(self.clone(), token.clone()));
        *task = Some(DebounceTask { token, handle });

        if self.intake.pending_len() > 0 {
            self.intake.wake();
        }
        info!(
            watched = self.watched.len(),
            tracked = self.tracked.len(),
            debounce_ms = self.config.debounce_ms,
            "RELOAD: Hot reload started"
        );
        Ok(())
    }

    /// Stop watching; queued changes are discarded without processing
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        let task = self.task.lock().take();
        let Some(task) = task else {
            return Ok(());
        };

        task.token.cancel();
        if let Err(e) = task.handle.await {
            warn!("RELOAD: Debounce loop ended abnormally: {}", e);
        }
        self.watcher.lock().take();
        let discarded = self.intake.drain().len();

        info!(discarded, "RELOAD: Hot reload stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    pub fn tracked_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.tracked.iter().map(|e| e.key().clone()).collect();
        files.sort();
        files
    }

    pub fn watched_paths(&self) -> Vec<WatchedPath> {
        let mut paths: Vec<WatchedPath> = self.watched.iter().map(|e| e.value().clone()).collect();
        paths.sort_by(|a, b| a.path.cmp(&b.path));
        paths
    }

    pub fn stats(&self) -> HotReloadStats {
        let mut stats = self.stats.lock().clone();
        stats.events_received = self.intake.received();
        stats
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = HotReloadStats::default();
    }
}

async fn validate_config(path: &Path) -> std::result::Result<String, String> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("cannot read configuration: {e}"))?;

    let format = match kinds::extension_of(path).as_deref() {
        Some("json") => {
            return serde_json::from_str::<serde_json::Value>(&text)
                .map(|_| "configuration is well-formed JSON".to_string())
                .map_err(|e| format!("invalid JSON: {e}"));
        }
        Some("yaml") | Some("yml") => config::FileFormat::Yaml,
        Some("toml") => config::FileFormat::Toml,
        _ => return Ok("configuration is readable".to_string()),
    };

    config::Config::builder()
        .add_source(config::File::from_str(&text, format))
        .build()
        .map(|_| "configuration is well-formed".to_string())
        .map_err(|e| format!("invalid configuration: {e}"))
}

async fn probe_readable(path: &Path) -> std::result::Result<String, String> {
    tokio::fs::read(path)
        .await
        .map(|bytes| format!("{} bytes readable", bytes.len()))
        .map_err(|e| format!("file is not readable: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> HotReloadManager {
        HotReloadManager::new(HotReloadConfig {
            debounce_ms: 50,
            ..HotReloadConfig::default()
        })
    }

    #[tokio::test]
    async fn test_add_and_remove_watch_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), "{}").unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();

        let manager = manager();
        assert_eq!(manager.add_watch_path(dir.path(), true).await.unwrap(), 1);
        assert_eq!(manager.watched_paths().len(), 1);
        assert_eq!(manager.tracked_files().len(), 1);

        assert!(manager.remove_watch_path(dir.path()));
        assert!(manager.tracked_files().is_empty());
        assert!(!manager.remove_watch_path(dir.path()));
    }

    #[tokio::test]
    async fn test_add_watch_path_rejects_missing_directory() {
        let manager = manager();
        assert!(manager.add_watch_path("/no/such/dir", true).await.is_err());
    }

    #[tokio::test]
    async fn test_config_files_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.json");
        let bad = dir.path().join("bad.json");
        let yaml = dir.path().join("settings.yaml");
        std::fs::write(&good, r#"{"a": 1}"#).unwrap();
        std::fs::write(&bad, r#"{"a": "#).unwrap();
        std::fs::write(&yaml, "a: 1\nb: [1, 2]\n").unwrap();

        let manager = manager();
        assert!(manager.reload_file(&good).await.is_success());
        let failed = manager.reload_file(&bad).await;
        assert_eq!(failed.status, ReloadStatus::Failed);
        assert!(failed.message.unwrap().contains("invalid JSON"));
        assert!(manager.reload_file(&yaml).await.is_success());

        let stats = manager.stats();
        assert_eq!(stats.total_reloads, 3);
        assert_eq!(stats.failed_reloads, 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_skipped() {
        let manager = manager();
        let outcome = manager.reload_file(Path::new("/no/such/file.json")).await;
        assert_eq!(outcome.status, ReloadStatus::Skipped);
        assert_eq!(manager.stats().total_reloads, 0);
        assert_eq!(manager.stats().skipped_reloads, 1);
    }

    #[tokio::test]
    async fn test_script_without_interpreter_fails() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("a.py");
        std::fs::write(&script, "print('hi')").unwrap();

        let outcome = manager().reload_file(&script).await;
        assert_eq!(outcome.status, ReloadStatus::Failed);
    }

    #[tokio::test]
    async fn test_pending_changes_collapse_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let kept = dir.path().join("kept.json");
        let gone = dir.path().join("gone.json");
        std::fs::write(&kept, "{}").unwrap();
        std::fs::write(&gone, "{}").unwrap();

        let manager = manager();
        manager.add_watch_path(dir.path(), false).await.unwrap();
        std::fs::remove_file(&gone).unwrap();
        let kept = std::fs::canonicalize(&kept).unwrap();
        let gone = dir.path().canonicalize().unwrap().join("gone.json");

        for _ in 0..3 {
            assert!(manager.enqueue_change(FileChange::modified(&kept)));
        }
        manager.enqueue_change(FileChange::modified(&gone));
        manager.enqueue_change(FileChange::deleted(&gone));

        let batch = manager.process_pending_changes().await;
        assert_eq!(batch.total, 1);
        assert_eq!(batch.succeeded, 1);
        assert_eq!(batch.deleted, 1);
        assert_eq!(manager.tracked_files(), vec![kept]);

        let stats = manager.stats();
        assert_eq!(stats.events_received, 5);
        assert_eq!(stats.events_coalesced, 3);
        assert_eq!(manager.process_pending_changes().await.total, 0);
    }

    #[tokio::test]
    async fn test_untracked_delete_is_not_announced() {
        let sink = Arc::new(crate::test_utils::RecordingSink::new());
        let manager = manager().with_notification_sink(sink.clone());

        manager.enqueue_change(FileChange::deleted("never-tracked.json"));
        manager.enqueue_change(FileChange::deleted("scratch.tmp"));
        let batch = manager.process_pending_changes().await;

        assert_eq!(batch.deleted, 0);
        assert!(sink.messages_of(events::FILE_DELETED).is_empty());
    }

    #[tokio::test]
    async fn test_stop_discards_pending_changes() {
        let manager = HotReloadManager::new(HotReloadConfig {
            debounce_ms: 60_000,
            ..HotReloadConfig::default()
        });
        manager.start().await.unwrap();
        assert!(manager.is_running());
        manager.stop().await.unwrap();
        manager.enqueue_change(FileChange::modified("x.json"));
        manager.start().await.unwrap();
        manager.stop().await.unwrap();
        assert_eq!(manager.pending_changes(), 0);
        assert!(!manager.is_running());
    }
}

//! Integration tests for the hot-reload manager: per-kind reload, batch
//! isolation, renames, forced reload, and the OS watcher.

use scripthost_core::config::HotReloadConfig;
use scripthost_core::integrations::InterpreterPool;
use scripthost_core::notification_events;
use scripthost_core::reload::{FileChange, HotReloadManager, ReloadStatus};
use scripthost_core::test_utils::{MockInterpreterPool, RecordingSink, SYNTAX_ERROR_MARKER};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    pool: Arc<MockInterpreterPool>,
    sink: Arc<RecordingSink>,
    manager: HotReloadManager,
}

fn fixture(debounce_ms: u64) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let pool = Arc::new(MockInterpreterPool::new(2));
    let sink = Arc::new(RecordingSink::new());
    let manager = HotReloadManager::new(HotReloadConfig {
        debounce_ms,
        interpreter_timeout_ms: 200,
        ..HotReloadConfig::default()
    })
    .with_interpreter_pool(pool.clone())
    .with_notification_sink(sink.clone());

    Fixture {
        _dir: dir,
        root,
        pool,
        sink,
        manager,
    }
}

#[tokio::test]
async fn test_script_is_compiled_before_execution() {
    let f = fixture(50);
    let good = f.root.join("good.py");
    let broken = f.root.join("broken.py");
    std::fs::write(&good, "x = 1").unwrap();
    std::fs::write(&broken, format!("def {SYNTAX_ERROR_MARKER}(")).unwrap();

    let ok = f.manager.reload_file(&good).await;
    assert!(ok.is_success(), "{:?}", ok.message);

    let failed = f.manager.reload_file(&broken).await;
    assert_eq!(failed.status, ReloadStatus::Failed);
    assert!(failed.message.unwrap().contains("syntax error"));

    assert_eq!(f.pool.compile_count(), 2);
    assert_eq!(f.pool.executed(), vec!["x = 1".to_string()]);
    assert_eq!(f.pool.available(), 2);

    let reloaded = f.sink.messages_of(notification_events::FILE_RELOADED);
    assert_eq!(reloaded.len(), 2);
    assert_eq!(reloaded[1]["payload"]["success"], false);
}

#[tokio::test]
async fn test_batch_failures_are_isolated() {
    let f = fixture(50);
    f.manager.add_watch_path(&f.root, true).await.unwrap();

    let files = [
        ("a.py", "a = 1".to_string()),
        ("b.py", format!("{SYNTAX_ERROR_MARKER} here")),
        ("c.json", r#"{"ok": true}"#.to_string()),
        ("d.toml", "name = \"demo\"\n".to_string()),
        ("e.yaml", "key: [unclosed\n".to_string()),
    ];
    for (name, body) in &files {
        let path = f.root.join(name);
        std::fs::write(&path, body).unwrap();
        assert!(f.manager.enqueue_change(FileChange::modified(path)));
    }

    let batch = f.manager.process_pending_changes().await;
    assert_eq!(batch.total, 5);
    assert_eq!(batch.succeeded, 3);
    assert_eq!(batch.failed, 2);
    assert!(batch.outcome_for(&f.root.join("b.py")).is_some_and(|o| !o.is_success()));
    assert!(batch.outcome_for(&f.root.join("e.yaml")).is_some_and(|o| !o.is_success()));

    let stats = f.manager.stats();
    assert_eq!(stats.total_reloads, 5);
    assert_eq!(stats.failed_reloads, 2);
    assert_eq!(stats.batches_processed, 1);
}

#[tokio::test]
async fn test_rename_moves_tracking() {
    let f = fixture(50);
    let old = f.root.join("old.json");
    std::fs::write(&old, "{}").unwrap();
    f.manager.add_watch_path(&f.root, false).await.unwrap();
    assert_eq!(f.manager.tracked_files(), vec![old.clone()]);

    let new = f.root.join("new.json");
    std::fs::rename(&old, &new).unwrap();
    f.manager.enqueue_change(FileChange::renamed(&old, &new));

    let batch = f.manager.process_pending_changes().await;
    assert_eq!(batch.total, 1);
    assert_eq!(batch.deleted, 1);
    assert_eq!(f.manager.tracked_files(), vec![new]);
    assert_eq!(f.sink.messages_of(notification_events::FILE_DELETED).len(), 1);
}

#[tokio::test]
async fn test_force_reload_covers_every_tracked_file() {
    let f = fixture(50);
    std::fs::create_dir(f.root.join("nested")).unwrap();
    std::fs::write(f.root.join("main.py"), "main = True").unwrap();
    std::fs::write(f.root.join("nested/settings.json"), "{}").unwrap();
    std::fs::write(f.root.join("notes.txt"), "ignored").unwrap();

    assert_eq!(f.manager.add_watch_path(&f.root, true).await.unwrap(), 2);
    let batch = f.manager.force_reload().await;
    assert_eq!(batch.total, 2);
    assert_eq!(batch.succeeded, 2);

    let batches = f.sink.messages_of(notification_events::BATCH_RELOADED);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0]["payload"]["total"], 2);
    assert_eq!(f.manager.stats().forced_reloads, 1);
}

#[tokio::test]
async fn test_remove_watch_path_purges_nested_files() {
    let f = fixture(50);
    let nested = f.root.join("nested");
    std::fs::create_dir(&nested).unwrap();
    std::fs::write(f.root.join("top.py"), "").unwrap();
    std::fs::write(nested.join("inner.py"), "").unwrap();

    f.manager.add_watch_path(&f.root, true).await.unwrap();
    f.manager.add_watch_path(&nested, false).await.unwrap();
    assert_eq!(f.manager.watched_paths().len(), 2);

    assert!(f.manager.remove_watch_path(&nested));
    assert_eq!(f.manager.tracked_files(), vec![f.root.join("top.py")]);
}

#[tokio::test]
async fn test_watcher_reloads_new_file() {
    let f = fixture(100);
    f.manager.add_watch_path(&f.root, true).await.unwrap();
    f.manager.start().await.unwrap();

    let path = f.root.join("fresh.json");
    std::fs::write(&path, r#"{"fresh": true}"#).unwrap();

    let mut reloaded = Vec::new();
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        reloaded = f.sink.messages_of(notification_events::FILE_RELOADED);
        if !reloaded.is_empty() {
            break;
        }
    }
    f.manager.stop().await.unwrap();

    assert!(!reloaded.is_empty(), "no reload notification arrived");
    assert_eq!(reloaded[0]["payload"]["path"], path.display().to_string());
    assert!(f.manager.tracked_files().contains(&path));
}

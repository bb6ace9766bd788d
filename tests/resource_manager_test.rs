//! Integration tests for the resource manager: pooling, concurrency cap,
//! worker slots, managed processes, and optimization.

use scripthost_core::config::ResourceConfig;
use scripthost_core::resources::{ReleaseOutcome, ResourceManager};
use scripthost_core::test_utils::FixedMemoryProbe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn manager(permits: usize, used_mb: u64) -> (ResourceManager, Arc<FixedMemoryProbe>) {
    let probe = Arc::new(FixedMemoryProbe::from_mb(used_mb));
    let config = ResourceConfig {
        max_concurrent_operations: Some(permits),
        max_concurrent_ceiling: Some(permits),
        max_memory_mb: 1000,
        ..ResourceConfig::default()
    };
    (ResourceManager::with_memory_probe(config, probe.clone()), probe)
}

#[tokio::test]
async fn test_concurrent_acquires_share_one_instance() -> Result<(), Box<dyn std::error::Error>> {
    let (manager, _) = manager(8, 100);
    let created = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..6 {
        let manager = manager.clone();
        let created = created.clone();
        handles.push(tokio::spawn(async move {
            manager
                .acquire_resource(
                    "shared",
                    move || async move {
                        created.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, String>(String::from("connection"))
                    },
                    Duration::from_secs(2),
                )
                .await
        }));
    }

    let mut resources = Vec::new();
    for handle in handles {
        resources.push(handle.await??);
    }
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert!(resources.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));

    let stats = manager.stats();
    assert_eq!(stats.resources_created, 1);
    assert_eq!(stats.pool_hits, 5);
    Ok(())
}

#[tokio::test]
async fn test_release_keeps_or_disposes() {
    let (manager, _) = manager(4, 100);
    let timeout = Duration::from_secs(1);

    assert_ok!(
        manager
            .acquire_resource("k", || async { Ok::<_, String>(1u64) }, timeout)
            .await
    );
    assert_eq!(manager.release_resource("k", false).await, ReleaseOutcome::Retained);
    assert_eq!(manager.pooled_resources().len(), 1);

    assert_eq!(manager.release_resource("k", true).await, ReleaseOutcome::Disposed);
    assert!(manager.pooled_resources().is_empty());
    assert_eq!(manager.release_resource("k", true).await, ReleaseOutcome::NotFound);
}

#[tokio::test]
async fn test_expired_entry_is_recreated() {
    let (manager, _) = manager(4, 100);
    let timeout = Duration::from_secs(1);

    let first = manager
        .acquire_resource_with_ttl(
            "short",
            || async { Ok::<_, String>(1u32) },
            timeout,
            Duration::from_millis(10),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    let second = manager
        .acquire_resource("short", || async { Ok::<_, String>(2u32) }, timeout)
        .await
        .unwrap();

    assert_eq!((*first, *second), (1, 2));
    assert_eq!(manager.stats().resources_created, 2);
}

#[tokio::test]
async fn test_type_mismatch_is_reported() {
    let (manager, _) = manager(4, 100);
    let timeout = Duration::from_secs(1);

    assert_ok!(
        manager
            .acquire_resource("typed", || async { Ok::<_, String>(1u32) }, timeout)
            .await
    );
    let err = manager
        .acquire_resource("typed", || async { Ok::<_, String>(String::new()) }, timeout)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        scripthost_core::HostError::ResourceTypeMismatch { .. }
    ));
}

#[tokio::test]
async fn test_ceiling_plus_one_caller_times_out() {
    let (manager, _) = manager(3, 100);

    let mut holders = Vec::new();
    for i in 0..3 {
        let manager = manager.clone();
        holders.push(tokio::spawn(async move {
            manager
                .acquire_resource(
                    &format!("slow-{i}"),
                    || async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok::<_, String>(i)
                    },
                    Duration::from_secs(1),
                )
                .await
        }));
    }
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(manager.available_permits(), 0);

    let extra = manager
        .acquire_resource("extra", || async { Ok::<_, String>(99) }, Duration::from_millis(40))
        .await;
    assert!(assert_err!(extra).is_timeout());

    for holder in holders {
        assert_ok!(holder.await.unwrap());
    }
    assert_eq!(manager.available_permits(), 3);
    assert!(manager.stats().peak_concurrent_acquisitions <= 3);
}

#[tokio::test]
async fn test_worker_slots_are_bounded() {
    let (manager, _) = manager(2, 100);
    let limit = manager.config().max_pooled_worker_slots;

    let slots: Vec<_> = (0..limit + 3).map(|_| manager.get_thread_from_pool()).collect();
    let kept = slots
        .into_iter()
        .map(|slot| manager.return_thread_to_pool(slot))
        .filter(|kept| *kept)
        .count();

    assert_eq!(kept, limit);
    assert_eq!(manager.create_resource_snapshot().pooled_worker_slots, limit);
    assert_eq!(manager.stats().worker_slots_discarded, 3);
}

#[tokio::test]
async fn test_collect_garbage_reports_reclaimed_memory() {
    let (manager, probe) = manager(2, 950);
    assert!(manager.memory_ratio() > 0.9);

    let report = manager.collect_garbage();
    assert_eq!(report.bytes_reclaimed, 0);
    assert_eq!(probe.collections(), 1);

    let probe = Arc::new(FixedMemoryProbe::from_mb(950).with_floor(100 * 1024 * 1024));
    let manager = ResourceManager::with_memory_probe(
        ResourceConfig {
            max_memory_mb: 1000,
            ..ResourceConfig::default()
        },
        probe,
    );
    let report = manager.collect_garbage();
    assert_eq!(report.bytes_reclaimed, 850 * 1024 * 1024);
    assert!(manager.memory_ratio() < 0.2);
}

#[cfg(unix)]
#[tokio::test]
async fn test_managed_process_lifecycle() {
    use scripthost_core::resources::{ProcessSpec, ProcessState};

    let (manager, _) = manager(2, 100);
    let info = manager
        .start_managed_process(&ProcessSpec::new("sleep").arg("30"), None)
        .unwrap();
    assert_eq!(info.state, ProcessState::Running);
    assert_eq!(manager.list_processes().len(), 1);

    let state = manager.stop_managed_process(&info.id, true).await.unwrap();
    assert_eq!(state, ProcessState::Killed);

    let timed = manager
        .start_managed_process(
            &ProcessSpec::new("sleep").arg("30"),
            Some(Duration::from_millis(100)),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        manager.managed_process(&timed.id).map(|p| p.state),
        Some(ProcessState::TimedOut)
    );

    let snapshot = manager.create_resource_snapshot();
    assert_eq!(snapshot.running_processes, 0);
    manager.stop().await.unwrap();
}

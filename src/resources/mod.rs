//! # Resource Manager
//!
//! Brokers expensive, reusable resources under a global concurrency cap:
//!
//! - **Keyed pooling** of arbitrary values with a TTL and a use-count ceiling
//! - **Worker slots**, a bounded free-list of execution descriptors for blocking work
//! - **Managed processes** with timeout enforcement and graceful-then-forced stop
//! - **Optimization passes** on a timer and under memory pressure
//!
//! Every acquisition first takes a permit from a bounded semaphore. A caller that
//! cannot get a permit within its timeout receives [`HostError::Timeout`]; factory
//! failures propagate unchanged and are never retried here.
//!
//! ```rust,no_run
//! use scripthost_core::config::ResourceConfig;
//! use scripthost_core::resources::ResourceManager;
//! use std::time::Duration;
//!
//! # async fn example() -> scripthost_core::error::Result<()> {
//! let manager = ResourceManager::new(ResourceConfig::default());
//! let conn = manager
//!     .acquire_resource("db:primary", || async { Ok::<_, std::io::Error>(String::from("conn")) }, Duration::from_secs(1))
//!     .await?;
//! manager.release_resource("db:primary", false).await;
//! # Ok(())
//! # }
//! ```

pub mod memory;
pub mod pool;
pub mod process;
pub mod stats;
pub mod worker_slots;

use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ResourceConfig;
use crate::error::{HostError, Result};

pub use memory::{MemoryProbe, ProcessMemoryProbe};
pub use pool::{AcquireKind, PooledResource, PooledResourceInfo, ReleaseOutcome};
pub use process::{ManagedProcessInfo, ProcessSpec, ProcessState};
pub use stats::{ResourceManagerStats, ResourceSnapshot};
pub use worker_slots::WorkerSlot;

use pool::ResourcePool;
use process::ProcessRegistry;
use stats::ResourceCounters;
use worker_slots::WorkerSlotPool;

/// Minimum spacing between memory-pressure probes on the acquisition path
const PRESSURE_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Result of one optimization pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct OptimizationReport {
    pub expired_disposed: usize,
    pub collected: bool,
    pub bytes_reclaimed: u64,
    pub worker_slots_pruned: usize,
    pub processes_reaped: usize,
    pub memory_before_bytes: u64,
    pub memory_after_bytes: u64,
    pub duration_ms: u64,
}

/// Result of an explicit collection pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionReport {
    pub bytes_reclaimed: u64,
    pub resources_disposed: usize,
    pub worker_slots_pruned: usize,
}

struct SweepTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Pooled resources, worker slots, and child processes behind one concurrency cap
#[derive(Clone)]
pub struct ResourceManager {
    config: Arc<ResourceConfig>,
    pool: Arc<ResourcePool>,
    slots: Arc<WorkerSlotPool>,
    processes: Arc<ProcessRegistry>,
    memory: Arc<dyn MemoryProbe>,
    counters: Arc<ResourceCounters>,
    permits: Arc<Semaphore>,
    limit: Arc<AtomicUsize>,
    ceiling: usize,
    resize_lock: Arc<Mutex<()>>,
    optimizing: Arc<AtomicBool>,
    last_pressure_probe: Arc<Mutex<Option<Instant>>>,
    sweep: Arc<Mutex<Option<SweepTask>>>,
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("pooled", &self.pool.len())
            .field("limit", &self.concurrency_limit())
            .field("ceiling", &self.ceiling)
            .field("running", &self.is_running())
            .finish()
    }
}

impl ResourceManager {
    /// Create a manager that measures the memory of the current process
    pub fn new(config: ResourceConfig) -> Self {
        Self::with_memory_probe(config, Arc::new(ProcessMemoryProbe::new()))
    }

    pub fn with_memory_probe(config: ResourceConfig, memory: Arc<dyn MemoryProbe>) -> Self {
        let counters = Arc::new(ResourceCounters::default());
        let initial = config.initial_concurrency();
        let ceiling = config.concurrency_ceiling();

        debug!(
            initial_permits = initial,
            ceiling = ceiling,
            ttl_seconds = config.default_ttl_seconds,
            "RESOURCES: Creating resource manager"
        );

        Self {
            pool: Arc::new(ResourcePool::new(counters.clone())),
            slots: Arc::new(WorkerSlotPool::new(
                config.max_pooled_worker_slots,
                counters.clone(),
            )),
            processes: Arc::new(ProcessRegistry::new(
                config.process_grace_period(),
                counters.clone(),
            )),
            memory,
            counters,
            permits: Arc::new(Semaphore::new(initial)),
            limit: Arc::new(AtomicUsize::new(initial)),
            ceiling,
            resize_lock: Arc::new(Mutex::new(())),
            optimizing: Arc::new(AtomicBool::new(false)),
            last_pressure_probe: Arc::new(Mutex::new(None)),
            sweep: Arc::new(Mutex::new(None)),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    /// Get or create the resource stored under `key`, using the default TTL
    pub async fn acquire_resource<T, E, F, Fut>(
        &self,
        key: &str,
        factory: F,
        timeout: Duration,
    ) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        E: std::fmt::Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.acquire_resource_with_ttl(key, factory, timeout, self.config.default_ttl())
            .await
    }

    /// Get or create the resource stored under `key`; a newly created entry expires after `ttl`
    #[instrument(skip(self, factory), fields(timeout_ms = timeout.as_millis() as u64))]
    pub async fn acquire_resource_with_ttl<T, E, F, Fut>(
        &self,
        key: &str,
        factory: F,
        timeout: Duration,
        ttl: Duration,
    ) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        E: std::fmt::Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let permit = match tokio::time::timeout(timeout, self.permits.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(HostError::InvalidState(
                    "resource manager semaphore is closed".to_string(),
                ))
            }
            Err(_) => {
                self.counters.record_timeout();
                warn!(
                    key = %key,
                    timeout_ms = timeout.as_millis() as u64,
                    "RESOURCES: Timed out waiting for an acquisition permit"
                );
                return Err(HostError::timeout(
                    format!("resource acquisition for {key}"),
                    timeout.as_millis() as u64,
                ));
            }
        };

        let in_flight = self.counters.begin_acquisition();
        let acquired = self
            .pool
            .acquire(key, factory, ttl, self.config.max_resource_uses)
            .await;
        drop(in_flight);
        drop(permit);

        let (resource, kind) = acquired?;
        debug!(key = %key, kind = ?kind, "RESOURCES: Resource acquired");

        self.check_memory_pressure();
        Ok(resource)
    }

    /// Return a resource to the pool, disposing it when stale or when forced
    pub async fn release_resource(&self, key: &str, force_dispose: bool) -> ReleaseOutcome {
        let outcome = self
            .pool
            .release(key, force_dispose, self.config.max_resource_uses)
            .await;
        debug!(key = %key, force_dispose, outcome = ?outcome, "RESOURCES: Resource released");
        outcome
    }

    pub fn pooled_resources(&self) -> Vec<PooledResourceInfo> {
        self.pool.entries()
    }

    /// Borrow a worker slot, reusing a pooled one when available
    pub fn get_thread_from_pool(&self) -> WorkerSlot {
        self.slots.take()
    }

    /// Give a worker slot back; returns false if the free-list was full and it was discarded
    pub fn return_thread_to_pool(&self, slot: WorkerSlot) -> bool {
        self.slots.give_back(slot)
    }

    /// Run blocking work on the blocking pool while holding a worker slot
    pub async fn run_in_worker_slot<F, R>(&self, work: F) -> Result<R>
    where
        F: FnOnce(&WorkerSlot) -> R + Send + 'static,
        R: Send + 'static,
    {
        let slot = self.get_thread_from_pool();
        let joined = tokio::task::spawn_blocking(move || {
            let output = work(&slot);
            (slot, output)
        })
        .await;

        match joined {
            Ok((slot, output)) => {
                self.return_thread_to_pool(slot);
                Ok(output)
            }
            Err(e) => Err(HostError::Worker(e.to_string())),
        }
    }

    /// Spawn a supervised child process, killed if it outlives `timeout`
    pub fn start_managed_process(
        &self,
        spec: &ProcessSpec,
        timeout: Option<Duration>,
    ) -> Result<ManagedProcessInfo> {
        self.processes.start(spec, timeout)
    }

    /// Stop a managed process; graceful stops escalate to a kill after the grace period
    #[instrument(skip(self))]
    pub async fn stop_managed_process(&self, id: &str, force: bool) -> Result<ProcessState> {
        let state = self.processes.stop(id, force).await?;
        info!(process_id = %id, force, state = ?state, "RESOURCES: Managed process stopped");
        Ok(state)
    }

    pub fn managed_process(&self, id: &str) -> Option<ManagedProcessInfo> {
        self.processes.get(id)
    }

    pub fn list_processes(&self) -> Vec<ManagedProcessInfo> {
        self.processes.list()
    }

    fn memory_ratio_of(&self, used: u64) -> f64 {
        let limit = self.config.max_memory_bytes();
        if limit == 0 {
            0.0
        } else {
            used as f64 / limit as f64
        }
    }

    /// Current memory usage as a fraction of the configured ceiling
    pub fn memory_ratio(&self) -> f64 {
        self.memory_ratio_of(self.memory.used_bytes())
    }

    pub fn memory_used_bytes(&self) -> u64 {
        self.memory.used_bytes()
    }

    fn check_memory_pressure(&self) {
        {
            let mut last = self.last_pressure_probe.lock();
            if matches!(*last, Some(at) if at.elapsed() < PRESSURE_PROBE_INTERVAL) {
                return;
            }
            *last = Some(Instant::now());
        }

        let ratio = self.memory_ratio();
        if ratio < self.config.memory_pressure_ratio {
            return;
        }
        if self.optimizing.swap(true, Ordering::AcqRel) {
            return;
        }

        warn!(
            memory_ratio = ratio,
            threshold = self.config.memory_pressure_ratio,
            "RESOURCES: Memory pressure detected, scheduling optimization"
        );
        let manager = self.clone();
        tokio::spawn(async move {
            manager.optimize_resource_usage().await;
            manager.optimizing.store(false, Ordering::Release);
        });
    }

    /// Sweep stale entries, collect under pressure, prune idle slots, reap finished processes
    #[instrument(skip(self))]
    pub async fn optimize_resource_usage(&self) -> OptimizationReport {
        let started = Instant::now();
        let memory_before = self.memory.used_bytes();

        let expired_disposed = self.pool.sweep(self.config.max_resource_uses);

        let mut collected = false;
        let mut bytes_reclaimed = 0;
        if self.memory_ratio_of(memory_before) > self.config.memory_pressure_ratio {
            bytes_reclaimed = self.memory.collect();
            collected = true;
            self.counters.record_collection();
        }

        let worker_slots_pruned = self.slots.prune(self.config.worker_slot_idle());
        let processes_reaped = self.processes.reap();
        self.counters.record_optimization();

        let report = OptimizationReport {
            expired_disposed,
            collected,
            bytes_reclaimed,
            worker_slots_pruned,
            processes_reaped,
            memory_before_bytes: memory_before,
            memory_after_bytes: self.memory.used_bytes(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        debug!(report = ?report, "RESOURCES: Optimization pass complete");
        report
    }

    /// Explicit collection pass: runtime collection plus pool and slot cleanup
    pub fn collect_garbage(&self) -> CollectionReport {
        let report = CollectionReport {
            bytes_reclaimed: self.memory.collect(),
            resources_disposed: self.pool.sweep(self.config.max_resource_uses),
            worker_slots_pruned: self.slots.prune(self.config.worker_slot_idle()),
        };
        self.counters.record_collection();
        info!(
            bytes_reclaimed = report.bytes_reclaimed,
            resources_disposed = report.resources_disposed,
            worker_slots_pruned = report.worker_slots_pruned,
            "RESOURCES: Collection pass complete"
        );
        report
    }

    /// Point-in-time view of resource usage
    pub fn create_resource_snapshot(&self) -> ResourceSnapshot {
        let memory_bytes = self.memory.used_bytes();
        ResourceSnapshot {
            taken_at: chrono::Utc::now(),
            memory_bytes,
            memory_limit_bytes: self.config.max_memory_bytes(),
            memory_ratio: self.memory_ratio_of(memory_bytes),
            thread_count: memory::thread_count(),
            handle_count: memory::handle_count(),
            pooled_resources: self.pool.len(),
            pooled_worker_slots: self.slots.len(),
            managed_processes: self.processes.len(),
            running_processes: self.processes.running(),
            available_permits: self.permits.available_permits(),
            concurrency_limit: self.concurrency_limit(),
            active_acquisitions: self.counters.active_acquisitions(),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn concurrency_limit(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }

    pub fn concurrency_ceiling(&self) -> usize {
        self.ceiling
    }

    /// Change the permit count, clamped to `1..=ceiling`; returns the new limit.
    ///
    /// Shrinking removes idle permits immediately; permits held by in-flight
    /// acquisitions are retired as those acquisitions finish.
    pub fn resize_concurrency(&self, target: usize) -> usize {
        let _guard = self.resize_lock.lock();
        let target = target.clamp(1, self.ceiling);
        let current = self.limit.load(Ordering::Acquire);

        if target > current {
            self.permits.add_permits(target - current);
        } else if target < current {
            let excess = current - target;
            let forgotten = self.permits.forget_permits(excess);
            let outstanding = excess - forgotten;
            if outstanding > 0 {
                let permits = self.permits.clone();
                tokio::spawn(async move {
                    if let Ok(held) = permits.acquire_many_owned(outstanding as u32).await {
                        held.forget();
                    }
                });
            }
        }

        self.limit.store(target, Ordering::Release);
        info!(from = current, to = target, "RESOURCES: Concurrency limit resized");
        target
    }

    /// Start the periodic optimization loop
    pub fn start(&self) -> Result<()> {
        let mut sweep = self.sweep.lock();
        if sweep.is_some() {
            return Ok(());
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let manager = self.clone();
        let interval = self.config.optimization_interval();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        manager.optimize_resource_usage().await;
                    }
                }
            }
            debug!("RESOURCES: Optimization loop exited");
        });

        *sweep = Some(SweepTask { token, handle });
        info!(
            interval_seconds = interval.as_secs(),
            "RESOURCES: Resource manager started"
        );
        Ok(())
    }

    /// Stop the optimization loop, every managed process, and dispose the pool
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        let task = self.sweep.lock().take();
        if let Some(task) = task {
            task.token.cancel();
            if let Err(e) = task.handle.await {
                warn!("RESOURCES: Optimization loop ended abnormally: {}", e);
            }
        }

        let processes = self.processes.stop_all(false).await;
        self.processes.reap();
        let disposed = self.pool.clear().await;

        info!(
            processes_stopped = processes,
            resources_disposed = disposed,
            "RESOURCES: Resource manager stopped"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.sweep.lock().is_some()
    }

    pub fn stats(&self) -> ResourceManagerStats {
        self.counters.snapshot()
    }

    pub fn reset_stats(&self) {
        self.counters.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    struct StubMemory(AtomicU64);

    impl MemoryProbe for StubMemory {
        fn used_bytes(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }

        fn collect(&self) -> u64 {
            self.0.swap(0, Ordering::SeqCst)
        }
    }

    fn manager(permits: usize, memory_mb: u64) -> (ResourceManager, Arc<StubMemory>) {
        let config = ResourceConfig {
            max_concurrent_operations: Some(permits),
            max_concurrent_ceiling: Some(permits * 2),
            max_memory_mb: 1000,
            ..ResourceConfig::default()
        };
        let memory = Arc::new(StubMemory(AtomicU64::new(memory_mb * 1024 * 1024)));
        (
            ResourceManager::with_memory_probe(config, memory.clone()),
            memory,
        )
    }

    #[tokio::test]
    async fn test_acquire_hit_and_forced_release() {
        let (manager, _) = manager(4, 100);
        let timeout = Duration::from_secs(1);

        let a = manager
            .acquire_resource("k", || async { Ok::<_, String>(vec![1u8]) }, timeout)
            .await
            .unwrap();
        let b = manager
            .acquire_resource("k", || async { Ok::<_, String>(vec![2u8]) }, timeout)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        assert_eq!(manager.release_resource("k", true).await, ReleaseOutcome::Disposed);
        let c = manager
            .acquire_resource("k", || async { Ok::<_, String>(vec![3u8]) }, timeout)
            .await
            .unwrap();
        assert_eq!(*c, vec![3u8]);

        let stats = manager.stats();
        assert_eq!(stats.resources_created, 2);
        assert_eq!(stats.pool_hits, 1);
        assert_eq!(stats.resources_disposed, 1);
    }

    #[tokio::test]
    async fn test_permit_timeout_is_typed() {
        let (manager, _) = manager(1, 100);
        let slow = manager.clone();
        let holder = tokio::spawn(async move {
            slow.acquire_resource(
                "slow",
                || async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok::<_, String>(1u32)
                },
                Duration::from_secs(1),
            )
            .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = manager
            .acquire_resource("other", || async { Ok::<_, String>(2u32) }, Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(holder.await.unwrap().is_ok());
        assert_eq!(manager.stats().acquisition_timeouts, 1);
    }

    #[tokio::test]
    async fn test_factory_error_propagates() {
        let (manager, _) = manager(2, 100);
        let err = manager
            .acquire_resource::<u32, _, _, _>(
                "bad",
                || async { Err::<u32, _>("no connection") },
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no connection"));
        assert_eq!(manager.stats().factory_failures, 1);
        assert_eq!(manager.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_resize_is_clamped_to_ceiling() {
        let (manager, _) = manager(2, 100);
        assert_eq!(manager.resize_concurrency(100), 4);
        assert_eq!(manager.available_permits(), 4);
        assert_eq!(manager.resize_concurrency(0), 1);
        assert_eq!(manager.available_permits(), 1);
        assert_eq!(manager.concurrency_limit(), 1);
    }

    #[tokio::test]
    async fn test_optimize_collects_only_under_pressure() {
        let (manager, memory) = manager(2, 100);
        let report = manager.optimize_resource_usage().await;
        assert!(!report.collected);

        memory.0.store(900 * 1024 * 1024, Ordering::SeqCst);
        let report = manager.optimize_resource_usage().await;
        assert!(report.collected);
        assert_eq!(report.bytes_reclaimed, 900 * 1024 * 1024);
        assert_eq!(manager.stats().optimization_passes, 2);
        assert_eq!(manager.stats().collection_passes, 1);
    }

    #[tokio::test]
    async fn test_worker_slot_round_trip() {
        let (manager, _) = manager(2, 100);
        let name = manager
            .run_in_worker_slot(|slot| slot.name.clone())
            .await
            .unwrap();
        assert!(name.starts_with("scripthost-worker-"));
        assert_eq!(manager.create_resource_snapshot().pooled_worker_slots, 1);
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let (manager, _) = manager(2, 100);
        manager.start().unwrap();
        assert!(manager.is_running());
        manager
            .acquire_resource("k", || async { Ok::<_, String>(1u8) }, Duration::from_secs(1))
            .await
            .unwrap();

        manager.stop().await.unwrap();
        assert!(!manager.is_running());
        assert_eq!(manager.create_resource_snapshot().pooled_resources, 0);
    }
}

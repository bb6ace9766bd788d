//! Resource manager counters and the point-in-time snapshot type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters shared by the pool, worker slots, and process registry
#[derive(Debug, Default)]
pub(crate) struct ResourceCounters {
    resources_created: AtomicU64,
    pool_hits: AtomicU64,
    resources_disposed: AtomicU64,
    acquisition_timeouts: AtomicU64,
    factory_failures: AtomicU64,
    active_acquisitions: AtomicU64,
    peak_concurrent_acquisitions: AtomicU64,
    worker_slots_created: AtomicU64,
    worker_slots_reused: AtomicU64,
    worker_slots_discarded: AtomicU64,
    processes_started: AtomicU64,
    processes_exited: AtomicU64,
    processes_killed: AtomicU64,
    processes_timed_out: AtomicU64,
    optimization_passes: AtomicU64,
    collection_passes: AtomicU64,
}

macro_rules! counter {
    ($name:ident, $field:ident) => {
        pub(crate) fn $name(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl ResourceCounters {
    counter!(record_created, resources_created);
    counter!(record_hit, pool_hits);
    counter!(record_disposed, resources_disposed);
    counter!(record_timeout, acquisition_timeouts);
    counter!(record_factory_failure, factory_failures);
    counter!(record_slot_created, worker_slots_created);
    counter!(record_slot_reused, worker_slots_reused);
    counter!(record_slot_discarded, worker_slots_discarded);
    counter!(record_process_started, processes_started);
    counter!(record_process_exited, processes_exited);
    counter!(record_process_killed, processes_killed);
    counter!(record_process_timed_out, processes_timed_out);
    counter!(record_optimization, optimization_passes);
    counter!(record_collection, collection_passes);

    /// Mark an acquisition as in flight until the guard drops
    pub(crate) fn begin_acquisition(&self) -> InFlightAcquisition<'_> {
        let active = self.active_acquisitions.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_concurrent_acquisitions
            .fetch_max(active, Ordering::AcqRel);
        InFlightAcquisition { counters: self }
    }

    pub(crate) fn active_acquisitions(&self) -> u64 {
        self.active_acquisitions.load(Ordering::Acquire)
    }

    pub(crate) fn snapshot(&self) -> ResourceManagerStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        ResourceManagerStats {
            resources_created: load(&self.resources_created),
            pool_hits: load(&self.pool_hits),
            resources_disposed: load(&self.resources_disposed),
            acquisition_timeouts: load(&self.acquisition_timeouts),
            factory_failures: load(&self.factory_failures),
            active_acquisitions: load(&self.active_acquisitions),
            peak_concurrent_acquisitions: load(&self.peak_concurrent_acquisitions),
            worker_slots_created: load(&self.worker_slots_created),
            worker_slots_reused: load(&self.worker_slots_reused),
            worker_slots_discarded: load(&self.worker_slots_discarded),
            processes_started: load(&self.processes_started),
            processes_exited: load(&self.processes_exited),
            processes_killed: load(&self.processes_killed),
            processes_timed_out: load(&self.processes_timed_out),
            optimization_passes: load(&self.optimization_passes),
            collection_passes: load(&self.collection_passes),
        }
    }

    /// Zero the accumulated totals; in-flight tracking is left alone
    pub(crate) fn reset(&self) {
        for counter in [
            &self.resources_created,
            &self.pool_hits,
            &self.resources_disposed,
            &self.acquisition_timeouts,
            &self.factory_failures,
            &self.worker_slots_created,
            &self.worker_slots_reused,
            &self.worker_slots_discarded,
            &self.processes_started,
            &self.processes_exited,
            &self.processes_killed,
            &self.processes_timed_out,
            &self.optimization_passes,
            &self.collection_passes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.peak_concurrent_acquisitions.store(
            self.active_acquisitions.load(Ordering::Acquire),
            Ordering::Relaxed,
        );
    }
}

pub(crate) struct InFlightAcquisition<'a> {
    counters: &'a ResourceCounters,
}

impl Drop for InFlightAcquisition<'_> {
    fn drop(&mut self) {
        self.counters
            .active_acquisitions
            .fetch_sub(1, Ordering::AcqRel);
    }
}

/// Copy of the resource manager counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceManagerStats {
    pub resources_created: u64,
    pub pool_hits: u64,
    pub resources_disposed: u64,
    pub acquisition_timeouts: u64,
    pub factory_failures: u64,
    pub active_acquisitions: u64,
    pub peak_concurrent_acquisitions: u64,
    pub worker_slots_created: u64,
    pub worker_slots_reused: u64,
    pub worker_slots_discarded: u64,
    pub processes_started: u64,
    pub processes_exited: u64,
    pub processes_killed: u64,
    pub processes_timed_out: u64,
    pub optimization_passes: u64,
    pub collection_passes: u64,
}

impl ResourceManagerStats {
    /// Fraction of acquisitions served from the pool
    pub fn hit_rate(&self) -> f64 {
        let total = self.pool_hits + self.resources_created;
        if total == 0 {
            0.0
        } else {
            self.pool_hits as f64 / total as f64
        }
    }
}

/// Point-in-time view of resource usage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub taken_at: DateTime<Utc>,
    pub memory_bytes: u64,
    pub memory_limit_bytes: u64,
    pub memory_ratio: f64,
    pub thread_count: Option<u64>,
    pub handle_count: Option<u64>,
    pub pooled_resources: usize,
    pub pooled_worker_slots: usize,
    pub managed_processes: usize,
    pub running_processes: usize,
    pub available_permits: usize,
    pub concurrency_limit: usize,
    pub active_acquisitions: u64,
}

//! Lightweight system metrics sampled on their own cadence.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use sysinfo::{Pid, System};

use crate::resources::{memory, ResourceManager};

/// One metrics sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub sampled_at: DateTime<Utc>,
    /// Host-wide CPU usage, 0-100
    pub cpu_percent: f32,
    /// CPU usage of this process, may exceed 100 on multi-core hosts
    pub process_cpu_percent: f32,
    pub memory_bytes: u64,
    pub memory_ratio: Option<f64>,
    pub thread_count: Option<u64>,
    pub handle_count: Option<u64>,
    /// Collection passes run by the resource manager so far
    pub collection_passes: Option<u64>,
}

/// CPU usage is a delta between two refreshes, so the sampler primes a baseline
/// on construction and never reads usage sooner than
/// [`sysinfo::MINIMUM_CPU_UPDATE_INTERVAL`] after the previous refresh.
pub(crate) struct MetricsSampler {
    system: Mutex<System>,
    last_refresh: Mutex<Instant>,
    pid: Option<Pid>,
    latest: RwLock<Option<SystemMetrics>>,
}

impl MetricsSampler {
    pub(crate) fn new() -> Self {
        let pid = sysinfo::get_current_pid().ok();
        let mut system = System::new();
        system.refresh_cpu();
        if let Some(pid) = pid {
            system.refresh_process(pid);
        }
        Self {
            system: Mutex::new(system),
            last_refresh: Mutex::new(Instant::now()),
            pid,
            latest: RwLock::new(None),
        }
    }

    /// Take a fresh sample and keep it as the latest
    pub(crate) async fn sample(&self, resources: Option<&ResourceManager>) -> SystemMetrics {
        let since_refresh = self.last_refresh.lock().elapsed();
        let settle = sysinfo::MINIMUM_CPU_UPDATE_INTERVAL.saturating_sub(since_refresh);
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        let (cpu_percent, process_cpu_percent, process_memory) = {
            let mut system = self.system.lock();
            system.refresh_cpu();
            let cpu = system.global_cpu_info().cpu_usage();
            let (process_cpu, process_memory) = match self.pid {
                Some(pid) if system.refresh_process(pid) => system
                    .process(pid)
                    .map(|p| (p.cpu_usage(), p.memory()))
                    .unwrap_or((0.0, 0)),
                _ => (0.0, 0),
            };
            *self.last_refresh.lock() = Instant::now();
            (cpu, process_cpu, process_memory)
        };

        let metrics = SystemMetrics {
            sampled_at: Utc::now(),
            cpu_percent,
            process_cpu_percent,
            memory_bytes: resources
                .map(ResourceManager::memory_used_bytes)
                .unwrap_or(process_memory),
            memory_ratio: resources.map(ResourceManager::memory_ratio),
            thread_count: memory::thread_count(),
            handle_count: memory::handle_count(),
            collection_passes: resources.map(|r| r.stats().collection_passes),
        };

        *self.latest.write() = Some(metrics.clone());
        metrics
    }

    pub(crate) fn latest(&self) -> Option<SystemMetrics> {
        self.latest.read().clone()
    }

    /// Latest sample, taking one if none exists yet
    pub(crate) async fn latest_or_sample(&self, resources: Option<&ResourceManager>) -> SystemMetrics {
        match self.latest() {
            Some(metrics) => metrics,
            None => self.sample(resources).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sample_is_retained() {
        let sampler = MetricsSampler::new();
        assert!(sampler.latest().is_none());

        let sample = sampler.sample(None).await;
        assert!(sample.memory_bytes > 0);
        assert!(sample.memory_ratio.is_none());
        assert_eq!(sampler.latest().unwrap().sampled_at, sample.sampled_at);
    }

    #[tokio::test]
    async fn test_first_sample_sees_load() {
        let sampler = MetricsSampler::new();
        let spinning = Arc::new(AtomicBool::new(true));
        let flag = spinning.clone();
        let busy = std::thread::spawn(move || {
            let mut n = 0u64;
            while flag.load(Ordering::Relaxed) {
                n = std::hint::black_box(n.wrapping_add(1));
            }
        });

        let sample = sampler.latest_or_sample(None).await;
        spinning.store(false, Ordering::Relaxed);
        busy.join().unwrap();

        assert!(
            sample.process_cpu_percent > 20.0,
            "busy thread not visible: {}",
            sample.process_cpu_percent
        );
    }

    #[tokio::test]
    async fn test_back_to_back_samples_wait_for_the_interval() {
        let sampler = MetricsSampler::new();
        sampler.sample(None).await;
        let started = Instant::now();
        sampler.sample(None).await;
        assert!(started.elapsed() >= sysinfo::MINIMUM_CPU_UPDATE_INTERVAL / 2);
    }
}

//! Process memory measurement.

use parking_lot::Mutex;
use sysinfo::{Pid, System};

/// Source of memory usage figures for the current process
pub trait MemoryProbe: Send + Sync {
    /// Resident memory of this process in bytes
    fn used_bytes(&self) -> u64;

    /// Ask the runtime to give memory back, returning the bytes reclaimed if known
    fn collect(&self) -> u64 {
        0
    }
}

/// sysinfo-backed probe for the running process
pub struct ProcessMemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProcessMemoryProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessMemoryProbe")
            .field("pid", &self.pid)
            .finish()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn used_bytes(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let mut system = self.system.lock();
        if !system.refresh_process(pid) {
            return 0;
        }
        system.process(pid).map(|p| p.memory()).unwrap_or(0)
    }
}

/// Number of OS threads in this process, where the platform exposes it
pub fn thread_count() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    if system.refresh_process(pid) {
        let tasks = system.process(pid).and_then(|process| process.tasks());
        if let Some(tasks) = tasks.filter(|tasks| !tasks.is_empty()) {
            return Some(tasks.len() as u64);
        }
    }
    status_thread_count()
}

// Task sets are only filled by some refresh paths
#[cfg(target_os = "linux")]
fn status_thread_count() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix("Threads:"))
        .and_then(|value| value.trim().parse().ok())
}

#[cfg(not(target_os = "linux"))]
fn status_thread_count() -> Option<u64> {
    None
}

/// Number of open file descriptors, where the platform exposes it
pub fn handle_count() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_dir("/proc/self/fd")
            .ok()
            .map(|entries| entries.count() as u64)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_probe_reports_nonzero_memory() {
        let probe = ProcessMemoryProbe::new();
        assert!(probe.used_bytes() > 0);
        assert_eq!(probe.collect(), 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_linux_counts_are_available() {
        assert!(thread_count().unwrap() >= 1);
        assert!(handle_count().unwrap() >= 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_thread_count_sees_spawned_threads() {
        let barrier = std::sync::Arc::new(std::sync::Barrier::new(5));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    barrier.wait();
                })
            })
            .collect();

        barrier.wait();
        let counted = thread_count().unwrap();
        barrier.wait();
        for worker in workers {
            worker.join().unwrap();
        }
        // four workers plus the test thread
        assert!(counted >= 5, "counted {counted}");
    }
}

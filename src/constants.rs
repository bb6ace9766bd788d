//! # Host Constants
//!
//! Component names, notification event names, and the numeric defaults that define
//! the operational envelope of the host core.

/// Names of the built-in monitored components and services
pub mod components {
    pub const INTERPRETER_POOL: &str = "InterpreterPool";
    pub const MEMORY_MANAGER: &str = "MemoryManager";
    pub const DEBUG_SERVER: &str = "DebugServer";
    pub const FILE_SYSTEM: &str = "FileSystem";
    pub const EXTENSION_MANAGER: &str = "ExtensionManager";
    pub const RESOURCE_USAGE: &str = "ResourceUsage";

    pub const RESOURCE_MANAGER: &str = "ResourceManager";
    pub const HEALTH_MONITOR: &str = "HealthMonitor";
    pub const HOT_RELOAD: &str = "HotReload";
    pub const NOTIFICATION_SERVER: &str = "NotificationServer";

    /// Built-in health checks, in reporting order
    pub const BUILT_IN_CHECKS: [&str; 6] = [
        INTERPRETER_POOL,
        MEMORY_MANAGER,
        DEBUG_SERVER,
        FILE_SYSTEM,
        EXTENSION_MANAGER,
        RESOURCE_USAGE,
    ];
}

/// Notification message types published on the notification sink
pub mod events {
    pub const FILE_RELOADED: &str = "FileReloaded";
    pub const FILE_DELETED: &str = "FileDeleted";
    pub const BATCH_RELOADED: &str = "BatchReloaded";
    pub const HEALTH_CHANGED: &str = "HealthChanged";
    pub const HOST_STARTED: &str = "HostStarted";
    pub const HOST_STOPPED: &str = "HostStopped";
}

/// Numeric defaults
pub mod defaults {
    pub const RESOURCE_TTL_SECONDS: u64 = 30 * 60;
    pub const MAX_RESOURCE_USES: u64 = 1000;
    pub const MAX_POOLED_WORKER_SLOTS: usize = 10;
    pub const WORKER_SLOT_IDLE_SECONDS: u64 = 300;
    pub const MAX_MEMORY_MB: u64 = 2048;
    pub const MEMORY_PRESSURE_RATIO: f64 = 0.8;
    pub const OPTIMIZATION_INTERVAL_SECONDS: u64 = 30;
    pub const PROCESS_GRACE_PERIOD_SECONDS: u64 = 5;

    pub const HEALTH_CHECK_INTERVAL_SECONDS: u64 = 30;
    pub const METRICS_INTERVAL_SECONDS: u64 = 10;
    pub const MEMORY_UNHEALTHY_RATIO: f64 = 0.9;
    pub const CPU_UNHEALTHY_PERCENT: f64 = 80.0;
    pub const DISK_CRITICAL_BYTES: u64 = 1024 * 1024 * 1024;
    pub const DISK_WARNING_BYTES: u64 = 5 * 1024 * 1024 * 1024;
    pub const HEALTH_CHECK_TIMEOUT_MS: u64 = 5000;

    pub const DEBOUNCE_MS: u64 = 500;
    pub const INTERPRETER_TIMEOUT_MS: u64 = 5000;

    pub const STARTUP_TARGET_MS: u64 = 2000;
    pub const SHUTDOWN_TIMEOUT_MS: u64 = 5000;

    pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

    /// Initial concurrency: `max(2 x cores, 10)`
    pub fn initial_concurrency(cores: usize) -> usize {
        (cores * 2).max(10)
    }

    /// Concurrency ceiling: `max(4 x cores, 20)`
    pub fn concurrency_ceiling(cores: usize) -> usize {
        (cores * 4).max(20)
    }
}

/// Number of logical cores, falling back to 1 when undetectable
pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

//! # Host Configuration
//!
//! Typed configuration tree for the host core. Every section is fully defaulted so a
//! host can start with no configuration file at all; [`ConfigManager`] layers a file
//! and `SCRIPTHOST__`-prefixed environment variables on top.
//!
//! ```rust,no_run
//! use scripthost_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let interval = manager.config().health.check_interval();
//! # Ok(())
//! # }
//! ```

pub mod loader;
pub mod validator;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{available_cores, defaults};
use crate::error::{HostError, Result};

pub use loader::ConfigManager;
pub use validator::DefaultConfigValidator;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HostConfig {
    /// Deployment environment name (development, test, production)
    pub environment: String,
    pub resources: ResourceConfig,
    pub health: HealthConfig,
    pub hot_reload: HotReloadConfig,
    pub execution: ExecutionConfig,
    pub lifecycle: LifecycleConfig,
    pub notifications: NotificationConfig,
}

impl HostConfig {
    /// Validate structural rules, failing on the first set of errors
    pub fn validate(&self) -> Result<()> {
        let report = DefaultConfigValidator::default().check(self);
        if report.is_valid {
            Ok(())
        } else {
            Err(HostError::Validation {
                errors: report.errors,
            })
        }
    }

    /// Configuration tuned for tests: short intervals, small pools
    pub fn for_testing() -> Self {
        let mut config = Self {
            environment: "test".to_string(),
            ..Self::default()
        };
        config.resources.max_concurrent_operations = Some(4);
        config.resources.max_concurrent_ceiling = Some(8);
        config.health.disk_critical_bytes = 0;
        config.health.disk_warning_bytes = 0;
        config.health.cpu_unhealthy_percent = 100.0;
        config.hot_reload.debounce_ms = 100;
        config.execution.interpreter_acquire_timeout_ms = 500;
        config
    }
}

/// Resource manager configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Initial concurrent acquisition permits (None = max(2 x cores, 10))
    pub max_concurrent_operations: Option<usize>,
    /// Upper bound for permits (None = max(4 x cores, 20))
    pub max_concurrent_ceiling: Option<usize>,
    pub default_ttl_seconds: u64,
    /// Use-count ceiling after which a pooled resource is disposed
    pub max_resource_uses: u64,
    pub max_pooled_worker_slots: usize,
    pub worker_slot_idle_seconds: u64,
    /// Memory ceiling used for pressure and health calculations
    pub max_memory_mb: u64,
    /// Fraction of the memory ceiling that triggers an optimization pass
    pub memory_pressure_ratio: f64,
    pub optimization_interval_seconds: u64,
    pub process_grace_period_seconds: u64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_operations: None,
            max_concurrent_ceiling: None,
            default_ttl_seconds: defaults::RESOURCE_TTL_SECONDS,
            max_resource_uses: defaults::MAX_RESOURCE_USES,
            max_pooled_worker_slots: defaults::MAX_POOLED_WORKER_SLOTS,
            worker_slot_idle_seconds: defaults::WORKER_SLOT_IDLE_SECONDS,
            max_memory_mb: defaults::MAX_MEMORY_MB,
            memory_pressure_ratio: defaults::MEMORY_PRESSURE_RATIO,
            optimization_interval_seconds: defaults::OPTIMIZATION_INTERVAL_SECONDS,
            process_grace_period_seconds: defaults::PROCESS_GRACE_PERIOD_SECONDS,
        }
    }
}

impl ResourceConfig {
    pub fn initial_concurrency(&self) -> usize {
        self.max_concurrent_operations
            .unwrap_or_else(|| defaults::initial_concurrency(available_cores()))
            .max(1)
    }

    /// Ceiling never drops below the initial concurrency
    pub fn concurrency_ceiling(&self) -> usize {
        let ceiling = self
            .max_concurrent_ceiling
            .unwrap_or_else(|| defaults::concurrency_ceiling(available_cores()));
        ceiling.max(self.initial_concurrency())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    pub fn worker_slot_idle(&self) -> Duration {
        Duration::from_secs(self.worker_slot_idle_seconds)
    }

    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_mb * 1024 * 1024
    }

    pub fn optimization_interval(&self) -> Duration {
        Duration::from_secs(self.optimization_interval_seconds)
    }

    pub fn process_grace_period(&self) -> Duration {
        Duration::from_secs(self.process_grace_period_seconds)
    }
}

/// Health monitor configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    pub check_interval_seconds: u64,
    pub metrics_interval_seconds: u64,
    /// Memory usage ratio (of the resource ceiling) above which memory is unhealthy
    pub memory_unhealthy_ratio: f64,
    pub cpu_unhealthy_percent: f64,
    /// Free disk space below this is a hard failure
    pub disk_critical_bytes: u64,
    /// Free disk space below this is reported as a warning only
    pub disk_warning_bytes: u64,
    /// Directory used for the read/write probe (None = system temp dir)
    pub probe_directory: Option<PathBuf>,
    pub check_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: defaults::HEALTH_CHECK_INTERVAL_SECONDS,
            metrics_interval_seconds: defaults::METRICS_INTERVAL_SECONDS,
            memory_unhealthy_ratio: defaults::MEMORY_UNHEALTHY_RATIO,
            cpu_unhealthy_percent: defaults::CPU_UNHEALTHY_PERCENT,
            disk_critical_bytes: defaults::DISK_CRITICAL_BYTES,
            disk_warning_bytes: defaults::DISK_WARNING_BYTES,
            probe_directory: None,
            check_timeout_ms: defaults::HEALTH_CHECK_TIMEOUT_MS,
        }
    }
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_seconds)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }

    pub fn probe_directory(&self) -> PathBuf {
        self.probe_directory
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Hot-reload configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HotReloadConfig {
    pub enabled: bool,
    pub debounce_ms: u64,
    /// Directories watched from startup
    pub watch_paths: Vec<PathBuf>,
    pub recursive: bool,
    /// File extensions (without dot) that are tracked at all
    pub extensions: Vec<String>,
    /// Extensions validated and executed through the interpreter pool
    pub script_extensions: Vec<String>,
    /// Extensions parsed as structured configuration
    pub config_extensions: Vec<String>,
    pub interpreter_timeout_ms: u64,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: defaults::DEBOUNCE_MS,
            watch_paths: Vec::new(),
            recursive: true,
            extensions: strings(&["py", "json", "yaml", "yml", "toml"]),
            script_extensions: strings(&["py"]),
            config_extensions: strings(&["json", "yaml", "yml", "toml"]),
            interpreter_timeout_ms: defaults::INTERPRETER_TIMEOUT_MS,
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

impl HotReloadConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn interpreter_timeout(&self) -> Duration {
        Duration::from_millis(self.interpreter_timeout_ms)
    }
}

/// Script execution configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub interpreter_acquire_timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            interpreter_acquire_timeout_ms: defaults::INTERPRETER_TIMEOUT_MS,
        }
    }
}

impl ExecutionConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.interpreter_acquire_timeout_ms)
    }
}

/// Startup/shutdown budgets
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Cold-start target; exceeding it is logged, not enforced
    pub startup_target_ms: u64,
    /// Total budget for stopping every service
    pub shutdown_timeout_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            startup_target_ms: defaults::STARTUP_TARGET_MS,
            shutdown_timeout_ms: defaults::SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl LifecycleConfig {
    pub fn startup_target(&self) -> Duration {
        Duration::from_millis(self.startup_target_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Bounded buffer size; lagging subscribers lose the oldest messages
    pub channel_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            channel_capacity: defaults::NOTIFICATION_CHANNEL_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = HostConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.health.check_interval(), Duration::from_secs(30));
        assert_eq!(config.hot_reload.debounce_window(), Duration::from_millis(500));
    }

    #[test]
    fn test_concurrency_ceiling_never_below_initial() {
        let config = ResourceConfig {
            max_concurrent_operations: Some(50),
            max_concurrent_ceiling: Some(10),
            ..ResourceConfig::default()
        };
        assert_eq!(config.initial_concurrency(), 50);
        assert_eq!(config.concurrency_ceiling(), 50);
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let config: HostConfig =
            serde_json::from_str(r#"{"health": {"check_interval_seconds": 5}}"#).unwrap();
        assert_eq!(config.health.check_interval_seconds, 5);
        assert_eq!(config.health.metrics_interval_seconds, 10);
        assert_eq!(config.resources.max_resource_uses, 1000);
    }

    #[test]
    fn test_testing_config_is_valid() {
        assert!(HostConfig::for_testing().validate().is_ok());
    }
}

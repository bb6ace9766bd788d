//! Built-in component checks.
//!
//! Each check reaches its component through the [`ServiceLocator`]; checks for
//! collaborators that are not present in the locator are not scheduled.

use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::Disks;
use uuid::Uuid;

use super::metrics::MetricsSampler;
use super::types::HealthCheckResult;
use crate::config::HealthConfig;
use crate::constants::components;
use crate::locator::ServiceLocator;

const PROBE_BYTES: &[u8] = b"scripthost-health-probe";

pub(crate) struct CheckContext<'a> {
    pub locator: &'a ServiceLocator,
    pub config: &'a HealthConfig,
    pub sampler: &'a MetricsSampler,
}

/// Whether a built-in check has something to probe
pub(crate) fn builtin_applies(name: &str, locator: &ServiceLocator) -> bool {
    match name {
        components::INTERPRETER_POOL => locator.interpreter_pool().is_some(),
        components::MEMORY_MANAGER => locator.resource_manager().is_some(),
        components::DEBUG_SERVER => locator.notification_sink().is_some(),
        components::EXTENSION_MANAGER => locator.extension_service().is_some(),
        components::FILE_SYSTEM | components::RESOURCE_USAGE => true,
        _ => false,
    }
}

pub(crate) async fn run_builtin(name: &str, ctx: &CheckContext<'_>) -> HealthCheckResult {
    match name {
        components::INTERPRETER_POOL => check_interpreter_pool(ctx).await,
        components::MEMORY_MANAGER => check_memory(ctx),
        components::DEBUG_SERVER => check_debug_server(ctx),
        components::FILE_SYSTEM => check_file_system(ctx.config).await,
        components::EXTENSION_MANAGER => check_extension_manager(ctx),
        components::RESOURCE_USAGE => check_resource_usage(ctx).await,
        other => HealthCheckResult::unhealthy(other, "no such built-in check"),
    }
}

async fn check_interpreter_pool(ctx: &CheckContext<'_>) -> HealthCheckResult {
    let name = components::INTERPRETER_POOL;
    let Some(pool) = ctx.locator.interpreter_pool() else {
        return HealthCheckResult::unhealthy(name, "interpreter pool not configured");
    };

    let capacity = pool.capacity();
    let available = pool.available();
    let base = HealthCheckResult::healthy(name)
        .with_metric("capacity", capacity)
        .with_metric("available", available);

    if capacity == 0 {
        return HealthCheckResult {
            is_healthy: false,
            error_message: Some("interpreter pool has no capacity".to_string()),
            ..base
        };
    }
    if available == 0 {
        return base.with_warning("all interpreters are busy");
    }

    // Reachability: borrow one interpreter and hand it straight back
    let probe_timeout = Duration::from_millis((ctx.config.check_timeout_ms / 2).max(1));
    match pool.acquire(probe_timeout).await {
        Ok(handle) => {
            pool.release(handle).await;
            base
        }
        Err(e) => HealthCheckResult {
            is_healthy: false,
            error_message: Some(format!("interpreter acquisition failed: {e}")),
            ..base
        },
    }
}

fn check_memory(ctx: &CheckContext<'_>) -> HealthCheckResult {
    let name = components::MEMORY_MANAGER;
    let Some(resources) = ctx.locator.resource_manager() else {
        return HealthCheckResult::unhealthy(name, "resource manager not configured");
    };

    let used = resources.memory_used_bytes();
    let limit = resources.config().max_memory_bytes();
    let ratio = if limit == 0 {
        0.0
    } else {
        used as f64 / limit as f64
    };
    let result = HealthCheckResult::healthy(name)
        .with_metric("used_bytes", used)
        .with_metric("limit_bytes", limit)
        .with_metric("ratio", ratio);

    if ratio > ctx.config.memory_unhealthy_ratio {
        HealthCheckResult {
            is_healthy: false,
            error_message: Some(format!(
                "memory usage at {:.1}% of ceiling (threshold {:.1}%)",
                ratio * 100.0,
                ctx.config.memory_unhealthy_ratio * 100.0
            )),
            ..result
        }
    } else {
        result
    }
}

fn check_debug_server(ctx: &CheckContext<'_>) -> HealthCheckResult {
    let name = components::DEBUG_SERVER;
    match ctx.locator.notification_sink() {
        Some(sink) if sink.is_alive() => HealthCheckResult::healthy(name),
        Some(_) => HealthCheckResult::unhealthy(name, "notification server is not running"),
        None => HealthCheckResult::unhealthy(name, "notification server not configured"),
    }
}

fn check_extension_manager(ctx: &CheckContext<'_>) -> HealthCheckResult {
    let name = components::EXTENSION_MANAGER;
    match ctx.locator.extension_service() {
        Some(service) => {
            let loaded = service.loaded().len();
            if service.is_available() {
                HealthCheckResult::healthy(name).with_metric("loaded", loaded)
            } else {
                HealthCheckResult::unhealthy(name, "extension service unavailable")
                    .with_metric("loaded", loaded)
            }
        }
        None => HealthCheckResult::unhealthy(name, "extension service not configured"),
    }
}

async fn check_resource_usage(ctx: &CheckContext<'_>) -> HealthCheckResult {
    let name = components::RESOURCE_USAGE;
    let metrics = ctx
        .sampler
        .latest_or_sample(ctx.locator.resource_manager())
        .await;

    let mut result = HealthCheckResult::healthy(name)
        .with_metric("cpu_percent", metrics.cpu_percent)
        .with_metric("process_cpu_percent", metrics.process_cpu_percent);
    if let Some(threads) = metrics.thread_count {
        result = result.with_metric("threads", threads);
    }
    if let Some(handles) = metrics.handle_count {
        result = result.with_metric("handles", handles);
    }
    if let Some(resources) = ctx.locator.resource_manager() {
        result = result
            .with_metric("available_permits", resources.available_permits())
            .with_metric("concurrency_limit", resources.concurrency_limit());
    }

    if f64::from(metrics.cpu_percent) > ctx.config.cpu_unhealthy_percent {
        result.is_healthy = false;
        result.error_message = Some(format!(
            "CPU usage {:.1}% exceeds {:.1}%",
            metrics.cpu_percent, ctx.config.cpu_unhealthy_percent
        ));
    }
    result
}

async fn check_file_system(config: &HealthConfig) -> HealthCheckResult {
    let name = components::FILE_SYSTEM;
    let dir = config.probe_directory();
    let probe = dir.join(format!(".scripthost-health-{}", Uuid::new_v4()));

    let round_trip = async {
        tokio::fs::write(&probe, PROBE_BYTES).await?;
        let read = tokio::fs::read(&probe).await?;
        tokio::fs::remove_file(&probe).await?;
        Ok::<_, std::io::Error>(read.as_slice() == PROBE_BYTES)
    }
    .await;

    match round_trip {
        Ok(true) => {}
        Ok(false) => {
            return HealthCheckResult::unhealthy(name, "read-back did not match written probe")
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&probe).await;
            return HealthCheckResult::unhealthy(
                name,
                format!("read/write probe failed in {}: {e}", dir.display()),
            );
        }
    }

    let mut result = HealthCheckResult::healthy(name)
        .with_metric("probe_directory", dir.display().to_string());

    if let Some(available) = available_space(&dir) {
        result = result.with_metric("available_bytes", available);
        if available < config.disk_critical_bytes {
            result.is_healthy = false;
            result.error_message = Some(format!(
                "only {} MB of disk space available",
                available / (1024 * 1024)
            ));
        } else if available < config.disk_warning_bytes {
            result = result.with_warning(format!(
                "disk space is low: {} MB available",
                available / (1024 * 1024)
            ));
        }
    }
    result
}

/// Free space on the disk whose mount point holds `dir`
fn available_space(dir: &Path) -> Option<u64> {
    let dir: PathBuf = dir.canonicalize().ok()?;
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| dir.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

/// Generic remediation advice for an unhealthy component
pub(crate) fn recommendation_for(component: &str) -> String {
    match component {
        components::INTERPRETER_POOL => {
            "Refresh the interpreter pool or increase its capacity".to_string()
        }
        components::MEMORY_MANAGER => {
            "Run a collection pass and release long-lived pooled resources".to_string()
        }
        components::DEBUG_SERVER => "Restart the notification server".to_string(),
        components::FILE_SYSTEM => {
            "Free disk space or check permissions on the probe directory".to_string()
        }
        components::EXTENSION_MANAGER => {
            "Reinitialize the extension service and reload extensions".to_string()
        }
        components::RESOURCE_USAGE => {
            "Reduce concurrent workload or lower the concurrency limit".to_string()
        }
        other => format!("Investigate component '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_system_probe_in_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = HealthConfig {
            probe_directory: Some(dir.path().to_path_buf()),
            disk_critical_bytes: 0,
            disk_warning_bytes: 0,
            ..HealthConfig::default()
        };

        let result = check_file_system(&config).await;
        assert!(result.is_healthy, "{:?}", result.error_message);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_file_system_probe_missing_directory() {
        let config = HealthConfig {
            probe_directory: Some(PathBuf::from("/no/such/probe/dir")),
            ..HealthConfig::default()
        };
        let result = check_file_system(&config).await;
        assert!(!result.is_healthy);
    }

    #[test]
    fn test_optional_collaborators_are_skipped() {
        let locator = ServiceLocator::new();
        assert!(!builtin_applies(components::INTERPRETER_POOL, &locator));
        assert!(!builtin_applies(components::MEMORY_MANAGER, &locator));
        assert!(builtin_applies(components::FILE_SYSTEM, &locator));
        assert!(builtin_applies(components::RESOURCE_USAGE, &locator));
    }
}

//! Built-in structural validation of [`HostConfig`].

use crate::config::HostConfig;
use crate::integrations::{ConfigValidator, ValidationReport};

/// Validator used when the host is not given an external one
#[derive(Debug, Clone, Default)]
pub struct DefaultConfigValidator;

impl DefaultConfigValidator {
    pub fn check(&self, config: &HostConfig) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let resources = &config.resources;
        if resources.max_concurrent_operations == Some(0) {
            errors.push("resources.max_concurrent_operations must be at least 1".to_string());
        }
        if let (Some(initial), Some(ceiling)) = (
            resources.max_concurrent_operations,
            resources.max_concurrent_ceiling,
        ) {
            if ceiling < initial {
                warnings.push(format!(
                    "resources.max_concurrent_ceiling ({ceiling}) is below max_concurrent_operations ({initial}); the ceiling will be raised"
                ));
            }
        }
        if resources.default_ttl_seconds == 0 {
            errors.push("resources.default_ttl_seconds must be greater than 0".to_string());
        }
        if resources.max_resource_uses == 0 {
            errors.push("resources.max_resource_uses must be greater than 0".to_string());
        }
        if resources.max_memory_mb == 0 {
            errors.push("resources.max_memory_mb must be greater than 0".to_string());
        }
        if !(resources.memory_pressure_ratio > 0.0 && resources.memory_pressure_ratio <= 1.0) {
            errors.push("resources.memory_pressure_ratio must be in (0, 1]".to_string());
        }
        if resources.optimization_interval_seconds == 0 {
            errors.push("resources.optimization_interval_seconds must be greater than 0".to_string());
        }

        let health = &config.health;
        if health.check_interval_seconds == 0 {
            errors.push("health.check_interval_seconds must be greater than 0".to_string());
        }
        if health.metrics_interval_seconds == 0 {
            errors.push("health.metrics_interval_seconds must be greater than 0".to_string());
        }
        if !(health.memory_unhealthy_ratio > 0.0 && health.memory_unhealthy_ratio <= 1.0) {
            errors.push("health.memory_unhealthy_ratio must be in (0, 1]".to_string());
        }
        if !(0.0..=100.0).contains(&health.cpu_unhealthy_percent) {
            errors.push("health.cpu_unhealthy_percent must be between 0 and 100".to_string());
        }
        if health.disk_warning_bytes < health.disk_critical_bytes {
            errors.push(
                "health.disk_warning_bytes must not be below health.disk_critical_bytes".to_string(),
            );
        }
        if health.check_timeout_ms == 0 {
            errors.push("health.check_timeout_ms must be greater than 0".to_string());
        }

        let reload = &config.hot_reload;
        if reload.debounce_ms == 0 {
            warnings.push("hot_reload.debounce_ms is 0; bursts of writes will not coalesce".to_string());
        }
        for path in &reload.watch_paths {
            if !path.exists() {
                warnings.push(format!("hot_reload watch path does not exist: {}", path.display()));
            }
        }
        if reload.enabled && reload.extensions.is_empty() {
            warnings.push("hot_reload is enabled but no file extensions are tracked".to_string());
        }

        if config.execution.interpreter_acquire_timeout_ms == 0 {
            errors.push("execution.interpreter_acquire_timeout_ms must be greater than 0".to_string());
        }
        if config.lifecycle.shutdown_timeout_ms == 0 {
            errors.push("lifecycle.shutdown_timeout_ms must be greater than 0".to_string());
        }
        if config.notifications.channel_capacity == 0 {
            errors.push("notifications.channel_capacity must be greater than 0".to_string());
        }

        ValidationReport::from_issues(errors, warnings)
    }
}

impl ConfigValidator for DefaultConfigValidator {
    fn validate(&self, config: &HostConfig) -> ValidationReport {
        self.check(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_defaults_pass() {
        let report = DefaultConfigValidator.check(&HostConfig::default());
        assert!(report.is_valid, "{:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_errors_and_warnings_are_separated() {
        let mut config = HostConfig::default();
        config.health.memory_unhealthy_ratio = 1.5;
        config.health.disk_warning_bytes = 10;
        config.health.disk_critical_bytes = 20;
        config.hot_reload.watch_paths = vec![PathBuf::from("/no/such/dir")];

        let report = DefaultConfigValidator.check(&config);
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.warnings.len(), 1);
    }
}

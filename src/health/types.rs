//! Health result and report types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::utils::serde::duration_ms;

/// Outcome of a single component probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub component_name: String,
    pub is_healthy: bool,
    #[serde(with = "duration_ms")]
    pub response_time: Duration,
    pub error_message: Option<String>,
    /// Non-fatal findings, such as low but not critical disk space
    pub warnings: Vec<String>,
    pub metrics: BTreeMap<String, Value>,
}

impl HealthCheckResult {
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component_name: component.into(),
            is_healthy: true,
            response_time: Duration::ZERO,
            error_message: None,
            warnings: Vec::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn unhealthy(component: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            is_healthy: false,
            error_message: Some(error.into()),
            ..Self::healthy(component)
        }
    }

    pub fn with_metric(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.metrics.insert(name.to_string(), value.into());
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

impl ComponentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentStatus::Unknown => "unknown",
            ComponentStatus::Healthy => "healthy",
            ComponentStatus::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-component tracking, returned to callers as a copy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentState {
    pub name: String,
    pub status: ComponentStatus,
    pub last_result: Option<HealthCheckResult>,
    pub consecutive_failures: u32,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_recovery_attempt: Option<DateTime<Utc>>,
    pub recovery_attempts: u64,
}

impl ComponentState {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: ComponentStatus::Unknown,
            last_result: None,
            consecutive_failures: 0,
            last_checked: None,
            last_recovery_attempt: None,
            recovery_attempts: 0,
        }
    }

    /// Apply a fresh result and return the previous status
    pub(crate) fn apply(&mut self, result: HealthCheckResult) -> ComponentStatus {
        let previous = self.status;
        if result.is_healthy {
            self.status = ComponentStatus::Healthy;
            self.consecutive_failures = 0;
        } else {
            self.status = ComponentStatus::Unhealthy;
            self.consecutive_failures += 1;
        }
        self.last_checked = Some(Utc::now());
        self.last_result = Some(result);
        previous
    }
}

/// Aggregate result of one full health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub is_healthy: bool,
    pub checked_at: DateTime<Utc>,
    pub components: Vec<HealthCheckResult>,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    #[serde(with = "duration_ms")]
    pub total_duration: Duration,
}

impl HealthReport {
    pub fn component(&self, name: &str) -> Option<&HealthCheckResult> {
        self.components.iter().find(|c| c.component_name == name)
    }

    pub fn unhealthy_components(&self) -> Vec<&str> {
        self.components
            .iter()
            .filter(|c| !c.is_healthy)
            .map(|c| c.component_name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions_track_failures() {
        let mut state = ComponentState::new("FileSystem");
        assert_eq!(state.status, ComponentStatus::Unknown);

        let previous = state.apply(HealthCheckResult::unhealthy("FileSystem", "read-only"));
        assert_eq!(previous, ComponentStatus::Unknown);
        state.apply(HealthCheckResult::unhealthy("FileSystem", "read-only"));
        assert_eq!(state.consecutive_failures, 2);

        let previous = state.apply(HealthCheckResult::healthy("FileSystem"));
        assert_eq!(previous, ComponentStatus::Unhealthy);
        assert_eq!(state.status, ComponentStatus::Healthy);
        assert_eq!(state.consecutive_failures, 0);
    }

    #[test]
    fn test_result_serializes_duration_as_millis() {
        let mut result = HealthCheckResult::healthy("x").with_metric("ratio", 0.5);
        result.response_time = Duration::from_millis(42);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["response_time"], 42);
        assert_eq!(json["metrics"]["ratio"], 0.5);
    }
}

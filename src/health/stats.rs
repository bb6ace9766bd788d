use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Health monitor counters; callers always receive a copy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthMonitorStats {
    /// Full health check runs
    pub total_checks: u64,
    /// Individual component probes across all runs
    pub component_checks: u64,
    /// Component probes that reported unhealthy or timed out
    pub failed_checks: u64,
    pub timed_out_checks: u64,
    pub recovery_attempts: u64,
    pub successful_recoveries: u64,
    pub failed_recoveries: u64,
    /// Rolling average duration of a full check run
    pub average_check_ms: f64,
    pub last_check_at: Option<DateTime<Utc>>,
}

impl HealthMonitorStats {
    pub(crate) fn record_run(&mut self, duration: Duration, probes: u64, failed: u64) {
        self.total_checks += 1;
        self.component_checks += probes;
        self.failed_checks += failed;
        let ms = duration.as_secs_f64() * 1000.0;
        self.average_check_ms += (ms - self.average_check_ms) / self.total_checks as f64;
        self.last_check_at = Some(Utc::now());
    }

    pub(crate) fn record_recovery(&mut self, success: bool) {
        self.recovery_attempts += 1;
        if success {
            self.successful_recoveries += 1;
        } else {
            self.failed_recoveries += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_average() {
        let mut stats = HealthMonitorStats::default();
        stats.record_run(Duration::from_millis(10), 6, 0);
        stats.record_run(Duration::from_millis(30), 6, 1);
        assert_eq!(stats.total_checks, 2);
        assert_eq!(stats.component_checks, 12);
        assert_eq!(stats.failed_checks, 1);
        assert!((stats.average_check_ms - 20.0).abs() < 1e-9);
    }
}

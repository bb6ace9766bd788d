//! Execution and lifecycle statistics for the host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Snapshot of host statistics.
///
/// Stop and start leave these untouched; only an explicit reset clears the
/// execution counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostStats {
    pub executions: u64,
    pub successful: u64,
    pub failed: u64,
    /// Executions that never ran because no interpreter became available
    pub timeouts: u64,
    pub average_execution_ms: f64,
    pub extensions_loaded: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub last_reset_at: Option<DateTime<Utc>>,
    pub start_count: u64,
}

impl HostStats {
    pub(crate) fn record_execution(&mut self, ok: bool, duration: Duration) {
        self.executions += 1;
        if ok {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        let ms = duration.as_secs_f64() * 1000.0;
        self.average_execution_ms += (ms - self.average_execution_ms) / self.executions as f64;
    }

    pub(crate) fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    pub(crate) fn record_start(&mut self) {
        self.start_count += 1;
        self.started_at = Some(Utc::now());
    }

    /// Clear derived counters, keeping lifecycle history
    pub(crate) fn reset(&mut self) {
        *self = HostStats {
            started_at: self.started_at,
            start_count: self.start_count,
            last_reset_at: Some(Utc::now()),
            ..HostStats::default()
        };
    }

    pub fn success_rate(&self) -> f64 {
        if self.executions == 0 {
            0.0
        } else {
            self.successful as f64 / self.executions as f64
        }
    }
}

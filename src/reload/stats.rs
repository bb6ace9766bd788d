//! Reload outcomes and running statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::kinds::FileKind;
use crate::utils::serde::duration_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadStatus {
    Succeeded,
    Failed,
    /// The file vanished before it could be reloaded
    Skipped,
}

impl ReloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReloadStatus::Succeeded => "succeeded",
            ReloadStatus::Failed => "failed",
            ReloadStatus::Skipped => "skipped",
        }
    }
}

/// Result of reloading one file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadOutcome {
    pub path: PathBuf,
    pub kind: FileKind,
    pub status: ReloadStatus,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub message: Option<String>,
}

impl ReloadOutcome {
    pub fn is_success(&self) -> bool {
        self.status == ReloadStatus::Succeeded
    }
}

/// Aggregate of one processed batch or forced reload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReloadResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub deleted: usize,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub outcomes: Vec<ReloadOutcome>,
}

impl BatchReloadResult {
    pub(crate) fn from_outcomes(outcomes: Vec<ReloadOutcome>, deleted: usize, duration: Duration) -> Self {
        let count = |status: ReloadStatus| outcomes.iter().filter(|o| o.status == status).count();
        Self {
            total: outcomes.len(),
            succeeded: count(ReloadStatus::Succeeded),
            failed: count(ReloadStatus::Failed),
            skipped: count(ReloadStatus::Skipped),
            deleted,
            duration,
            outcomes,
        }
    }

    pub fn outcome_for(&self, path: &std::path::Path) -> Option<&ReloadOutcome> {
        self.outcomes.iter().find(|o| o.path == path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HotReloadStats {
    pub total_reloads: u64,
    pub successful_reloads: u64,
    pub failed_reloads: u64,
    pub skipped_reloads: u64,
    pub deleted_files: u64,
    pub batches_processed: u64,
    pub forced_reloads: u64,
    /// Changes accepted into the queue
    pub events_received: u64,
    /// Changes dropped because a later change to the same path superseded them
    pub events_coalesced: u64,
    /// Rolling average over succeeded and failed reloads
    pub average_reload_ms: f64,
    pub last_reload_at: Option<DateTime<Utc>>,
}

impl HotReloadStats {
    pub(crate) fn record(&mut self, outcome: &ReloadOutcome) {
        match outcome.status {
            ReloadStatus::Skipped => {
                self.skipped_reloads += 1;
                return;
            }
            ReloadStatus::Succeeded => self.successful_reloads += 1,
            ReloadStatus::Failed => self.failed_reloads += 1,
        }
        self.total_reloads += 1;
        let ms = outcome.duration.as_secs_f64() * 1000.0;
        self.average_reload_ms += (ms - self.average_reload_ms) / self.total_reloads as f64;
        self.last_reload_at = Some(Utc::now());
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_reloads == 0 {
            0.0
        } else {
            self.successful_reloads as f64 / self.total_reloads as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: ReloadStatus, ms: u64) -> ReloadOutcome {
        ReloadOutcome {
            path: PathBuf::from("a.py"),
            kind: FileKind::Script,
            status,
            duration: Duration::from_millis(ms),
            message: None,
        }
    }

    #[test]
    fn test_skipped_reloads_do_not_affect_average() {
        let mut stats = HotReloadStats::default();
        stats.record(&outcome(ReloadStatus::Succeeded, 10));
        stats.record(&outcome(ReloadStatus::Failed, 30));
        stats.record(&outcome(ReloadStatus::Skipped, 1000));

        assert_eq!(stats.total_reloads, 2);
        assert_eq!(stats.skipped_reloads, 1);
        assert!((stats.average_reload_ms - 20.0).abs() < 1e-9);
        assert_eq!(stats.success_rate(), 0.5);
    }

    #[test]
    fn test_batch_counts() {
        let batch = BatchReloadResult::from_outcomes(
            vec![
                outcome(ReloadStatus::Succeeded, 1),
                outcome(ReloadStatus::Failed, 1),
                outcome(ReloadStatus::Succeeded, 1),
            ],
            2,
            Duration::from_millis(5),
        );
        assert_eq!((batch.total, batch.succeeded, batch.failed, batch.deleted), (3, 2, 1, 2));
    }
}

//! # Health Monitor
//!
//! Periodic component health checks with bounded automatic recovery.
//!
//! Each component moves through `Unknown -> Healthy <-> Unhealthy`. A monitoring
//! cycle runs every registered check concurrently, then makes one recovery attempt
//! for every component found unhealthy. A failed recovery is retried on the next
//! cycle, never in a loop. A separate, faster timer samples lightweight system
//! metrics.
//!
//! Checks never run concurrently with themselves: each component has its own
//! async lock, so an on-demand check that overlaps the timer waits its turn.
//! Results, statistics and metrics are handed out as copies.

pub mod checks;
pub mod metrics;
pub mod recovery;
pub mod stats;
pub mod types;

use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::HealthConfig;
use crate::constants::{components, events};
use crate::error::Result;
use crate::integrations::notification;
use crate::locator::ServiceLocator;
use crate::logging::log_recovery_attempt;

pub use metrics::SystemMetrics;
pub use recovery::{CheckFuture, CustomCheck, RecoveryAction, RecoveryFuture};
pub use stats::HealthMonitorStats;
pub use types::{ComponentState, ComponentStatus, HealthCheckResult, HealthReport};

use checks::CheckContext;
use metrics::MetricsSampler;

struct MonitorTasks {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Marks a component as being recovered until dropped
struct RecoveryClaim<'a> {
    in_flight: &'a DashMap<String, ()>,
    component: String,
}

impl<'a> RecoveryClaim<'a> {
    fn try_claim(in_flight: &'a DashMap<String, ()>, component: &str) -> Option<Self> {
        match in_flight.entry(component.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                Some(Self {
                    in_flight,
                    component: component.to_string(),
                })
            }
        }
    }
}

impl Drop for RecoveryClaim<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.component);
    }
}

/// Health monitor for the host's components
#[derive(Clone)]
pub struct HealthMonitor {
    config: Arc<HealthConfig>,
    locator: ServiceLocator,
    custom_checks: Arc<DashMap<String, CustomCheck>>,
    disabled: Arc<RwLock<HashSet<String>>>,
    recovery_actions: Arc<DashMap<String, RecoveryAction>>,
    states: Arc<DashMap<String, ComponentState>>,
    check_locks: Arc<DashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    recovering: Arc<DashMap<String, ()>>,
    stats: Arc<Mutex<HealthMonitorStats>>,
    sampler: Arc<MetricsSampler>,
    tasks: Arc<Mutex<Option<MonitorTasks>>>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("locator", &self.locator)
            .field("custom_checks", &self.custom_checks.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, locator: ServiceLocator) -> Self {
        info!(
            check_interval_seconds = config.check_interval_seconds,
            metrics_interval_seconds = config.metrics_interval_seconds,
            locator = ?locator,
            "HEALTH: Creating health monitor"
        );

        Self {
            config: Arc::new(config),
            locator,
            custom_checks: Arc::new(DashMap::new()),
            disabled: Arc::new(RwLock::new(HashSet::new())),
            recovery_actions: Arc::new(DashMap::new()),
            states: Arc::new(DashMap::new()),
            check_locks: Arc::new(DashMap::new()),
            recovering: Arc::new(DashMap::new()),
            stats: Arc::new(Mutex::new(HealthMonitorStats::default())),
            sampler: Arc::new(MetricsSampler::new()),
            tasks: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Add (or replace) a check; a custom check named like a built-in replaces it
    pub fn register_custom_health_check<F, Fut>(&self, name: impl Into<String>, check: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<HealthCheckResult>> + Send + 'static,
    {
        let name = name.into();
        let check: CustomCheck = Arc::new(move || check().boxed());
        self.disabled.write().remove(&name);
        if self.custom_checks.insert(name.clone(), check).is_some() {
            debug!(component = %name, "HEALTH: Replaced custom health check");
        } else {
            info!(component = %name, "HEALTH: Registered custom health check");
        }
    }

    /// Remove a custom check or disable a built-in one; returns false if nothing changed
    pub fn unregister_health_check(&self, name: &str) -> bool {
        let removed_custom = self.custom_checks.remove(name).is_some();
        let disabled_builtin = components::BUILT_IN_CHECKS.contains(&name)
            && self.disabled.write().insert(name.to_string());

        if removed_custom || disabled_builtin {
            self.states.remove(name);
            info!(component = %name, "HEALTH: Unregistered health check");
            true
        } else {
            false
        }
    }

    /// Attach a recovery routine, overriding any built-in routine for that component
    pub fn register_recovery_action<F, Fut>(&self, name: impl Into<String>, action: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        let name = name.into();
        let action: RecoveryAction = Arc::new(move || action().boxed());
        self.recovery_actions.insert(name.clone(), action);
        debug!(component = %name, "HEALTH: Registered recovery action");
    }

    /// Names of every check the next cycle will run
    pub fn registered_checks(&self) -> Vec<String> {
        let disabled = self.disabled.read();
        let mut names: Vec<String> = components::BUILT_IN_CHECKS
            .iter()
            .filter(|name| {
                !disabled.contains(**name)
                    && !self.custom_checks.contains_key(**name)
                    && checks::builtin_applies(name, &self.locator)
            })
            .map(|name| name.to_string())
            .collect();

        let mut custom: Vec<String> = self
            .custom_checks
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        custom.sort();
        names.extend(custom);
        names
    }

    fn check_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.check_locks
                .entry(name.to_string())
                .or_default()
                .value(),
        )
    }

    /// Run one component's check; returns the result and whether it timed out
    async fn run_check(&self, name: &str) -> (HealthCheckResult, bool) {
        let lock = self.check_lock(name);
        let _serialized = lock.lock().await;
        let started = Instant::now();

        let custom = self
            .custom_checks
            .get(name)
            .map(|entry| Arc::clone(entry.value()));
        let probe = async {
            match custom {
                Some(check) => match AssertUnwindSafe(check()).catch_unwind().await {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => HealthCheckResult::unhealthy(name, format!("check failed: {e:#}")),
                    Err(_) => HealthCheckResult::unhealthy(name, "check panicked"),
                },
                None => {
                    let ctx = CheckContext {
                        locator: &self.locator,
                        config: &self.config,
                        sampler: &self.sampler,
                    };
                    checks::run_builtin(name, &ctx).await
                }
            }
        };

        let timeout = self.config.check_timeout();
        let (mut result, timed_out) = match tokio::time::timeout(timeout, probe).await {
            Ok(result) => (result, false),
            Err(_) => (
                HealthCheckResult::unhealthy(
                    name,
                    format!("check timed out after {}ms", timeout.as_millis()),
                ),
                true,
            ),
        };
        result.component_name = name.to_string();
        result.response_time = started.elapsed();

        self.record_result(&result);
        (result, timed_out)
    }

    fn record_result(&self, result: &HealthCheckResult) {
        let name = &result.component_name;
        let (previous, current) = {
            let mut state = self
                .states
                .entry(name.clone())
                .or_insert_with(|| ComponentState::new(name));
            let previous = state.apply(result.clone());
            (previous, state.status)
        };

        if previous == current {
            return;
        }
        match current {
            ComponentStatus::Unhealthy => warn!(
                component = %name,
                previous = %previous,
                error = ?result.error_message,
                "HEALTH: Component became unhealthy"
            ),
            _ if previous == ComponentStatus::Unhealthy => {
                info!(component = %name, "HEALTH: Component recovered")
            }
            _ => debug!(component = %name, status = %current, "HEALTH: Component status established"),
        }

        // Unknown -> Healthy is the normal first observation and is not announced
        if previous == ComponentStatus::Unknown && current == ComponentStatus::Healthy {
            return;
        }
        if let Some(sink) = self.locator.notification_sink() {
            notification::publish(
                sink.as_ref(),
                events::HEALTH_CHANGED,
                json!({
                    "component": name,
                    "previous": previous.as_str(),
                    "status": current.as_str(),
                    "error": result.error_message,
                }),
            );
        }
    }

    /// Run every registered check concurrently and aggregate the results
    #[instrument(skip(self))]
    pub async fn perform_health_check(&self) -> HealthReport {
        let started = Instant::now();
        let names = self.registered_checks();

        let outcomes =
            futures::future::join_all(names.iter().map(|name| self.run_check(name))).await;

        let mut components = Vec::with_capacity(outcomes.len());
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();
        let mut failed = 0;
        let mut timed_out = 0;

        for (result, was_timeout) in outcomes {
            if was_timeout {
                timed_out += 1;
            }
            if !result.is_healthy {
                failed += 1;
                issues.push(format!(
                    "{}: {}",
                    result.component_name,
                    result.error_message.as_deref().unwrap_or("unhealthy")
                ));
                let advice = checks::recommendation_for(&result.component_name);
                if !recommendations.contains(&advice) {
                    recommendations.push(advice);
                }
            }
            for warning in &result.warnings {
                issues.push(format!("{} (warning): {}", result.component_name, warning));
            }
            components.push(result);
        }

        let total_duration = started.elapsed();
        let is_healthy = components.iter().all(|c| c.is_healthy);
        {
            let mut stats = self.stats.lock();
            stats.record_run(total_duration, components.len() as u64, failed);
            stats.timed_out_checks += timed_out;
        }

        if is_healthy {
            debug!(
                components = components.len(),
                duration_ms = total_duration.as_millis() as u64,
                "HEALTH: All components healthy"
            );
        } else {
            warn!(
                unhealthy = failed,
                issues = ?issues,
                "HEALTH: Health check found unhealthy components"
            );
        }

        HealthReport {
            is_healthy,
            checked_at: chrono::Utc::now(),
            components,
            issues,
            recommendations,
            total_duration,
        }
    }

    /// Run the recovery routine for one component.
    ///
    /// Returns false when no routine exists, the routine fails or panics, or a
    /// recovery for the same component is already in flight.
    #[instrument(skip(self))]
    pub async fn attempt_recovery(&self, component: &str) -> bool {
        let Some(_claim) = RecoveryClaim::try_claim(&self.recovering, component) else {
            debug!(component = %component, "HEALTH: Recovery already in progress, skipping");
            return false;
        };

        let custom = self
            .recovery_actions
            .get(component)
            .map(|entry| Arc::clone(entry.value()));
        let outcome = match custom {
            Some(action) => Some(
                AssertUnwindSafe(action())
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("recovery action panicked"))),
            ),
            None => AssertUnwindSafe(recovery::run_builtin(component, &self.locator))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Some(Err(anyhow::anyhow!("recovery routine panicked")))),
        };

        let (success, details) = match outcome {
            None => (false, "no recovery action available".to_string()),
            Some(Ok(true)) => (true, "recovery routine completed".to_string()),
            Some(Ok(false)) => (false, "recovery routine reported no improvement".to_string()),
            Some(Err(e)) => {
                error!(component = %component, "HEALTH: Recovery failed: {:#}", e);
                (false, format!("{e:#}"))
            }
        };

        self.stats.lock().record_recovery(success);
        if let Some(mut state) = self.states.get_mut(component) {
            state.last_recovery_attempt = Some(chrono::Utc::now());
            state.recovery_attempts += 1;
        }
        log_recovery_attempt(component, success, Some(&details));
        success
    }

    /// One monitoring cycle: full check, then one recovery per unhealthy component
    pub async fn run_cycle(&self) -> HealthReport {
        let report = self.perform_health_check().await;
        let unhealthy = report.unhealthy_components();
        if !unhealthy.is_empty() {
            futures::future::join_all(unhealthy.iter().map(|name| self.attempt_recovery(name)))
                .await;
        }
        report
    }

    /// Start the health-check and metrics loops
    pub fn start(&self) -> Result<()> {
        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            return Ok(());
        }

        let token = CancellationToken::new();
        let check_interval = self.config.check_interval();
        let metrics_interval = self.config.metrics_interval();

        let health_loop = {
            let monitor = self.clone();
            let token = token.clone();
            tokio::spawn(async move {
                let start = tokio::time::Instant::now() + check_interval;
                let mut ticker = tokio::time::interval_at(start, check_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            monitor.run_cycle().await;
                        }
                    }
                }
                debug!("HEALTH: Health check loop exited");
            })
        };

        let metrics_loop = {
            let monitor = self.clone();
            let token = token.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(metrics_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            let sample = monitor.sampler.sample(monitor.locator.resource_manager()).await;
                            debug!(
                                cpu_percent = sample.cpu_percent,
                                memory_bytes = sample.memory_bytes,
                                "HEALTH: Metrics sampled"
                            );
                        }
                    }
                }
                debug!("HEALTH: Metrics loop exited");
            })
        };

        *tasks = Some(MonitorTasks {
            token,
            handles: vec![health_loop, metrics_loop],
        });
        info!(
            check_interval_seconds = check_interval.as_secs(),
            metrics_interval_seconds = metrics_interval.as_secs(),
            "HEALTH: Health monitor started"
        );
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        let tasks = self.tasks.lock().take();
        if let Some(tasks) = tasks {
            tasks.token.cancel();
            for handle in tasks.handles {
                if let Err(e) = handle.await {
                    warn!("HEALTH: Monitor loop ended abnormally: {}", e);
                }
            }
            info!("HEALTH: Health monitor stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.tasks.lock().is_some()
    }

    pub fn component_state(&self, name: &str) -> Option<ComponentState> {
        self.states.get(name).map(|state| state.clone())
    }

    pub fn component_states(&self) -> Vec<ComponentState> {
        let mut states: Vec<ComponentState> =
            self.states.iter().map(|state| state.clone()).collect();
        states.sort_by(|a, b| a.name.cmp(&b.name));
        states
    }

    pub fn latest_metrics(&self) -> Option<SystemMetrics> {
        self.sampler.latest()
    }

    /// Take a metrics sample now
    pub async fn sample_metrics(&self) -> SystemMetrics {
        self.sampler.sample(self.locator.resource_manager()).await
    }

    pub fn stats(&self) -> HealthMonitorStats {
        self.stats.lock().clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = HealthMonitorStats::default();
    }
}

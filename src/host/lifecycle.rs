//! # Service Lifecycle
//!
//! Ordered start and reverse-ordered stop of the services the host owns.
//!
//! Startup is all-or-nothing: when a service fails to start, every service that
//! already started is stopped again, newest first, before the failure is returned.
//! Shutdown is best-effort: a failing or slow service is logged and skipped, and
//! the remaining services are still stopped within the overall budget.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::error::{HostError, Result};
use crate::logging::log_service_operation;
use crate::utils::serde::duration_ms;

/// A unit of the host that can be started and stopped
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

type LifecycleFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Service built from a pair of closures
pub struct FnService {
    name: String,
    start: LifecycleFn,
    stop: LifecycleFn,
}

impl FnService {
    pub fn new<S, SF, T, TF>(name: impl Into<String>, start: S, stop: T) -> Self
    where
        S: Fn() -> SF + Send + Sync + 'static,
        SF: Future<Output = Result<()>> + Send + 'static,
        T: Fn() -> TF + Send + Sync + 'static,
        TF: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            start: Arc::new(move || Box::pin(start())),
            stop: Arc::new(move || Box::pin(stop())),
        }
    }
}

impl std::fmt::Debug for FnService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnService").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Service for FnService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<()> {
        (self.start)().await
    }

    async fn stop(&self) -> Result<()> {
        (self.stop)().await
    }
}

/// What happened during a shutdown
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    pub stopped: Vec<String>,
    /// Services whose stop returned an error, with the message
    pub failed: Vec<(String, String)>,
    /// Services that did not stop within the remaining budget
    pub timed_out: Vec<String>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.timed_out.is_empty()
    }
}

/// Services in dependency order, leaves first
#[derive(Clone, Default)]
pub struct ServiceSet {
    services: Vec<Arc<dyn Service>>,
}

impl std::fmt::Debug for ServiceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl ServiceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, service: Arc<dyn Service>) {
        self.services.push(service);
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.iter().any(|s| s.name() == name)
    }

    /// Start every service in order, unwinding on the first failure
    pub async fn start_all(&self) -> Result<()> {
        for (index, service) in self.services.iter().enumerate() {
            let started = Instant::now();
            match service.start().await {
                Ok(()) => {
                    log_service_operation(
                        service.name(),
                        "start",
                        "success",
                        Some(started.elapsed()),
                        None,
                    );
                }
                Err(e) => {
                    let message = e.to_string();
                    error!(
                        service = service.name(),
                        error = %message,
                        "HOST: Service failed to start, unwinding"
                    );
                    log_service_operation(
                        service.name(),
                        "start",
                        "failed",
                        Some(started.elapsed()),
                        Some(&message),
                    );
                    self.unwind(index).await;
                    return Err(HostError::startup(service.name(), message));
                }
            }
        }
        Ok(())
    }

    /// Stop the first `count` services, newest first
    async fn unwind(&self, count: usize) {
        for service in self.services[..count].iter().rev() {
            let started = Instant::now();
            let (status, details) = match service.stop().await {
                Ok(()) => ("success", None),
                Err(e) => ("failed", Some(e.to_string())),
            };
            log_service_operation(
                service.name(),
                "unwind",
                status,
                Some(started.elapsed()),
                details.as_deref(),
            );
        }
    }

    /// Stop every service in reverse order within `budget`
    pub async fn stop_all(&self, budget: Duration) -> ShutdownReport {
        let started = Instant::now();
        let deadline = started + budget;
        let mut report = ShutdownReport::default();

        for service in self.services.iter().rev() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let name = service.name().to_string();
            let stop_started = Instant::now();

            match tokio::time::timeout(remaining, service.stop()).await {
                Ok(Ok(())) => {
                    log_service_operation(&name, "stop", "success", Some(stop_started.elapsed()), None);
                    report.stopped.push(name);
                }
                Ok(Err(e)) => {
                    let message = e.to_string();
                    warn!(service = %name, error = %message, "HOST: Service failed to stop, continuing");
                    log_service_operation(
                        &name,
                        "stop",
                        "failed",
                        Some(stop_started.elapsed()),
                        Some(&message),
                    );
                    report.failed.push((name, message));
                }
                Err(_) => {
                    warn!(
                        service = %name,
                        remaining_ms = remaining.as_millis() as u64,
                        "HOST: Service did not stop within the shutdown budget"
                    );
                    log_service_operation(&name, "stop", "timed_out", Some(stop_started.elapsed()), None);
                    report.timed_out.push(name);
                }
            }
        }

        report.duration = started.elapsed();
        info!(
            stopped = report.stopped.len(),
            failed = report.failed.len(),
            timed_out = report.timed_out.len(),
            duration_ms = report.duration.as_millis() as u64,
            "HOST: Services stopped"
        );
        report
    }
}

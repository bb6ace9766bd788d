//! # Host Orchestrator
//!
//! Single entry point that binds the resource manager, health monitor, and
//! hot-reload manager to the external interpreter pool, extension service, and
//! notification server, and runs them as one lifecycle.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized --initialize--> Initialized --start--> Running --stop--> Stopped
//!                                                         ^                 |
//!                                                         +------start------+
//! ```
//!
//! `initialize` validates configuration and may be called once. `start` brings the
//! services up in dependency order and unwinds on failure, leaving the host in its
//! previous state. `stop` tears services down in reverse order on a best-effort
//! basis and never fails because of a single service.
//!
//! ## Example
//!
//! ```rust,no_run
//! use scripthost_core::config::HostConfig;
//! use scripthost_core::host::{HostContext, HostOrchestrator};
//!
//! # async fn example() -> scripthost_core::Result<()> {
//! let host = HostOrchestrator::builder(HostConfig::default()).build();
//! host.initialize(HostContext::new("my-app")).await?;
//! host.start().await?;
//!
//! let health = host.health_check().await;
//! println!("healthy: {}", health.is_healthy);
//!
//! host.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod lifecycle;
pub(crate) mod services;
pub mod state;
pub mod stats;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::config::{DefaultConfigValidator, HostConfig};
use crate::constants::events;
use crate::error::{HostError, Result};
use crate::health::{HealthMonitor, HealthReport};
use crate::integrations::{
    notification, BroadcastNotifier, ConfigValidator, ExtensionInfo, ExtensionService,
    InterpreterPool, NotificationSink, ScriptScope, ValidationReport,
};
use crate::locator::ServiceLocator;
use crate::reload::HotReloadManager;
use crate::resources::{MemoryProbe, ResourceManager, ResourceSnapshot};
use crate::utils::serde::duration_ms;

pub use lifecycle::{FnService, Service, ServiceSet, ShutdownReport};
pub use state::HostState;
pub use stats::HostStats;

use services::{
    ExtensionManagerService, HealthService, InterpreterService, NotificationService,
    ReloadService, ResourceService,
};

/// Host environment handed over at initialization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostContext {
    /// Name of the wrapped application
    pub application: String,
    /// Directories the extension service loads from at startup
    pub extension_paths: Vec<PathBuf>,
    pub working_directory: Option<PathBuf>,
    /// Free-form values exposed to deployments
    pub metadata: Map<String, Value>,
}

impl HostContext {
    pub fn new(application: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            ..Self::default()
        }
    }

    pub fn with_extension_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.extension_paths.push(path.into());
        self
    }
}

/// Outcome of [`HostOrchestrator::execute`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub ok: bool,
    pub output: String,
    pub error: Option<String>,
    pub interpreter_id: String,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

/// Aggregate health of the host
#[derive(Debug, Clone, Serialize)]
pub struct HostHealth {
    pub state: HostState,
    pub is_healthy: bool,
    #[serde(with = "duration_ms")]
    pub uptime: Duration,
    pub report: HealthReport,
    pub resources: ResourceSnapshot,
    pub stats: HostStats,
}

/// Builder wiring collaborators into a [`HostOrchestrator`]
pub struct HostBuilder {
    config: HostConfig,
    interpreter: Option<Arc<dyn InterpreterPool>>,
    extensions: Option<Arc<dyn ExtensionService>>,
    sink: Option<Arc<dyn NotificationSink>>,
    validator: Option<Arc<dyn ConfigValidator>>,
    memory: Option<Arc<dyn MemoryProbe>>,
}

impl HostBuilder {
    pub fn with_interpreter_pool(mut self, pool: Arc<dyn InterpreterPool>) -> Self {
        self.interpreter = Some(pool);
        self
    }

    pub fn with_extension_service(mut self, service: Arc<dyn ExtensionService>) -> Self {
        self.extensions = Some(service);
        self
    }

    /// Replace the in-process [`BroadcastNotifier`]
    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replace the built-in [`DefaultConfigValidator`]
    pub fn with_config_validator(mut self, validator: Arc<dyn ConfigValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory = Some(probe);
        self
    }

    pub fn build(self) -> HostOrchestrator {
        let config = Arc::new(self.config);

        let resources = match self.memory {
            Some(probe) => ResourceManager::with_memory_probe(config.resources.clone(), probe),
            None => ResourceManager::new(config.resources.clone()),
        };
        let sink = self.sink.unwrap_or_else(|| {
            Arc::new(BroadcastNotifier::new(config.notifications.channel_capacity))
        });

        let mut locator = ServiceLocator::new()
            .with_resource_manager(resources.clone())
            .with_notification_sink(sink.clone());
        let mut reload = HotReloadManager::new(config.hot_reload.clone())
            .with_notification_sink(sink.clone());
        if let Some(pool) = &self.interpreter {
            locator = locator.with_interpreter_pool(pool.clone());
            reload = reload.with_interpreter_pool(pool.clone());
        }
        if let Some(service) = &self.extensions {
            locator = locator.with_extension_service(service.clone());
        }
        let health = HealthMonitor::new(config.health.clone(), locator);

        HostOrchestrator {
            config,
            state: Arc::new(RwLock::new(HostState::Uninitialized)),
            lifecycle: Arc::new(tokio::sync::Mutex::new(())),
            resources,
            health,
            reload,
            interpreter: self.interpreter,
            extensions: self.extensions,
            sink,
            validator: self
                .validator
                .unwrap_or_else(|| Arc::new(DefaultConfigValidator)),
            context: Arc::new(RwLock::new(None)),
            extra_services: Arc::new(Mutex::new(Vec::new())),
            stats: Arc::new(Mutex::new(HostStats::default())),
            running_since: Arc::new(Mutex::new(None)),
        }
    }
}

/// The host core's public surface
#[derive(Clone)]
pub struct HostOrchestrator {
    config: Arc<HostConfig>,
    state: Arc<RwLock<HostState>>,
    /// Serializes initialize, start, stop, and reset
    lifecycle: Arc<tokio::sync::Mutex<()>>,
    resources: ResourceManager,
    health: HealthMonitor,
    reload: HotReloadManager,
    interpreter: Option<Arc<dyn InterpreterPool>>,
    extensions: Option<Arc<dyn ExtensionService>>,
    sink: Arc<dyn NotificationSink>,
    validator: Arc<dyn ConfigValidator>,
    context: Arc<RwLock<Option<HostContext>>>,
    extra_services: Arc<Mutex<Vec<Arc<dyn Service>>>>,
    stats: Arc<Mutex<HostStats>>,
    running_since: Arc<Mutex<Option<Instant>>>,
}

impl std::fmt::Debug for HostOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostOrchestrator")
            .field("state", &self.state())
            .field("environment", &self.config.environment)
            .field("has_interpreter_pool", &self.interpreter.is_some())
            .field("has_extension_service", &self.extensions.is_some())
            .field("extra_services", &self.extra_services.lock().len())
            .finish()
    }
}

impl HostOrchestrator {
    pub fn builder(config: HostConfig) -> HostBuilder {
        HostBuilder {
            config,
            interpreter: None,
            extensions: None,
            sink: None,
            validator: None,
            memory: None,
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn state(&self) -> HostState {
        *self.state.read()
    }

    pub fn context(&self) -> Option<HostContext> {
        self.context.read().clone()
    }

    /// Validate configuration and bind the host environment; allowed once
    #[instrument(skip(self, context), fields(application = %context.application))]
    pub async fn initialize(&self, context: HostContext) -> Result<ValidationReport> {
        let _lifecycle = self.lifecycle.lock().await;
        let current = self.state();
        if !current.can_transition_to(HostState::Initialized) {
            return Err(HostError::InvalidState(format!(
                "cannot initialize a host that is {current}"
            )));
        }

        let report = self.validator.validate(&self.config);
        for warning in &report.warnings {
            warn!(warning = %warning, "CONFIG: Validation warning");
        }
        if !report.is_valid {
            return Err(HostError::Validation {
                errors: report.errors,
            });
        }

        info!(
            application = %context.application,
            environment = %self.config.environment,
            extension_paths = context.extension_paths.len(),
            "🚀 HOST: Host initialized"
        );
        *self.context.write() = Some(context);
        *self.state.write() = HostState::Initialized;
        Ok(report)
    }

    /// Add a service started after the built-ins; only before the first start
    pub fn register_service(&self, service: Arc<dyn Service>) -> Result<()> {
        match self.state() {
            HostState::Uninitialized | HostState::Initialized => {
                info!(service = service.name(), "HOST: Service registered");
                self.extra_services.lock().push(service);
                Ok(())
            }
            state => Err(HostError::InvalidState(format!(
                "services cannot be registered once the host is {state}"
            ))),
        }
    }

    /// Services in start order
    pub fn service_names(&self) -> Vec<String> {
        self.service_set().names()
    }

    fn service_set(&self) -> ServiceSet {
        let mut set = ServiceSet::new();
        set.push(Arc::new(ResourceService(self.resources.clone())));
        if let Some(service) = &self.extensions {
            let paths = self
                .context
                .read()
                .as_ref()
                .map(|c| c.extension_paths.clone())
                .unwrap_or_default();
            set.push(Arc::new(ExtensionManagerService {
                service: service.clone(),
                paths,
            }));
        }
        if let Some(pool) = &self.interpreter {
            set.push(Arc::new(InterpreterService(pool.clone())));
        }
        set.push(Arc::new(NotificationService(self.sink.clone())));
        set.push(Arc::new(HealthService(self.health.clone())));
        set.push(Arc::new(ReloadService(self.reload.clone())));
        for service in self.extra_services.lock().iter() {
            set.push(service.clone());
        }
        set
    }

    /// Start every service in dependency order
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let current = self.state();
        if current == HostState::Running {
            debug!("HOST: Start requested while already running");
            return Ok(());
        }
        if !current.can_transition_to(HostState::Running) {
            return Err(HostError::InvalidState(format!(
                "cannot start a host that is {current}"
            )));
        }

        let started = Instant::now();
        let services = self.service_set();
        info!(services = ?services.names(), "HOST: Starting services");
        services.start_all().await?;

        let elapsed = started.elapsed();
        *self.state.write() = HostState::Running;
        *self.running_since.lock() = Some(Instant::now());
        self.stats.lock().record_start();

        let target = self.config.lifecycle.startup_target();
        if elapsed > target {
            warn!(
                duration_ms = elapsed.as_millis() as u64,
                target_ms = target.as_millis() as u64,
                "HOST: Startup exceeded target"
            );
        }
        info!(
            duration_ms = elapsed.as_millis() as u64,
            services = services.len(),
            "✅ HOST: Host running"
        );
        notification::publish(
            self.sink.as_ref(),
            events::HOST_STARTED,
            json!({
                "services": services.names(),
                "duration_ms": elapsed.as_millis() as u64,
            }),
        );
        Ok(())
    }

    /// Stop every service in reverse order; a no-op unless running
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<ShutdownReport> {
        let _lifecycle = self.lifecycle.lock().await;
        let current = self.state();
        if current != HostState::Running {
            debug!(state = %current, "HOST: Stop requested while not running");
            return Ok(ShutdownReport::default());
        }

        notification::publish(
            self.sink.as_ref(),
            events::HOST_STOPPED,
            json!({ "uptime_ms": self.uptime().as_millis() as u64 }),
        );

        let budget = self.config.lifecycle.shutdown_timeout();
        let report = self.service_set().stop_all(budget).await;
        *self.state.write() = HostState::Stopped;
        *self.running_since.lock() = None;

        if report.duration > budget {
            warn!(
                duration_ms = report.duration.as_millis() as u64,
                budget_ms = budget.as_millis() as u64,
                "HOST: Shutdown exceeded budget"
            );
        }
        info!(
            clean = report.is_clean(),
            duration_ms = report.duration.as_millis() as u64,
            "🛑 HOST: Host stopped"
        );
        Ok(report)
    }

    pub fn is_running(&self) -> bool {
        self.state() == HostState::Running
    }

    /// Run code on a pooled interpreter
    #[instrument(skip(self, code, globals, locals), fields(code_len = code.len()))]
    pub async fn execute(
        &self,
        code: &str,
        globals: Option<&ScriptScope>,
        locals: Option<&ScriptScope>,
    ) -> Result<ExecutionResult> {
        let state = self.state();
        if state != HostState::Running {
            return Err(HostError::InvalidState(format!(
                "cannot execute while the host is {state}"
            )));
        }
        let pool = self.interpreter.as_ref().ok_or_else(|| {
            HostError::Interpreter("no interpreter pool is configured".to_string())
        })?;

        let started = Instant::now();
        let mut handle = match pool.acquire(self.config.execution.acquire_timeout()).await {
            Ok(handle) => handle,
            Err(e) => {
                if e.is_timeout() {
                    self.stats.lock().record_timeout();
                }
                warn!(error = %e, "HOST: Could not acquire an interpreter");
                return Err(e);
            }
        };

        let interpreter_id = handle.id();
        let output = handle.execute(code, globals, locals).await;
        pool.release(handle).await;

        let duration = started.elapsed();
        self.stats.lock().record_execution(output.ok, duration);
        debug!(
            interpreter = %interpreter_id,
            ok = output.ok,
            duration_ms = duration.as_millis() as u64,
            "HOST: Execution finished"
        );

        Ok(ExecutionResult {
            ok: output.ok,
            output: output.output,
            error: output.error,
            interpreter_id,
            duration,
        })
    }

    fn extension_service(&self) -> Result<&Arc<dyn ExtensionService>> {
        let state = self.state();
        if !matches!(state, HostState::Initialized | HostState::Running) {
            return Err(HostError::InvalidState(format!(
                "extensions are unavailable while the host is {state}"
            )));
        }
        self.extensions.as_ref().ok_or_else(|| {
            HostError::Extension("no extension service is configured".to_string())
        })
    }

    pub async fn load_extension(&self, path: impl AsRef<Path>) -> Result<ExtensionInfo> {
        let service = self.extension_service()?;
        let info = service.load_extension(path.as_ref()).await?;
        self.stats.lock().extensions_loaded += 1;
        info!(id = %info.id, name = %info.name, version = %info.version, "HOST: Extension loaded");
        Ok(info)
    }

    pub async fn unload_extension(&self, id: &str) -> Result<()> {
        let service = self.extension_service()?;
        service.unload(id).await?;
        info!(id = %id, "HOST: Extension unloaded");
        Ok(())
    }

    pub fn loaded_extensions(&self) -> Vec<ExtensionInfo> {
        self.extensions
            .as_ref()
            .map(|service| service.loaded())
            .unwrap_or_default()
    }

    /// Run a full health check and combine it with resource and host state
    pub async fn health_check(&self) -> HostHealth {
        let report = self.health.perform_health_check().await;
        HostHealth {
            state: self.state(),
            is_healthy: report.is_healthy,
            uptime: self.uptime(),
            report,
            resources: self.resources.create_resource_snapshot(),
            stats: self.stats(),
        }
    }

    /// Collect garbage, clear derived statistics, and refresh the interpreter pool
    #[instrument(skip(self))]
    pub async fn reset(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let state = self.state();
        if !state.is_initialized() {
            return Err(HostError::InvalidState(format!(
                "cannot reset a host that is {state}"
            )));
        }

        let collection = self.resources.collect_garbage();
        self.resources.reset_stats();
        self.health.reset_stats();
        self.reload.reset_stats();
        self.stats.lock().reset();
        if let Some(pool) = &self.interpreter {
            pool.refresh().await?;
        }

        info!(
            bytes_reclaimed = collection.bytes_reclaimed,
            resources_disposed = collection.resources_disposed,
            "HOST: Host reset"
        );
        Ok(())
    }

    pub fn stats(&self) -> HostStats {
        self.stats.lock().clone()
    }

    /// Time since the current run started; zero when not running
    pub fn uptime(&self) -> Duration {
        self.running_since
            .lock()
            .map(|since| since.elapsed())
            .unwrap_or_default()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.stats.lock().started_at
    }

    pub fn resource_manager(&self) -> &ResourceManager {
        &self.resources
    }

    pub fn health_monitor(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn hot_reload(&self) -> &HotReloadManager {
        &self.reload
    }

    pub fn notification_sink(&self) -> &Arc<dyn NotificationSink> {
        &self.sink
    }
}

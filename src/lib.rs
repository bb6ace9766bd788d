#![allow(clippy::doc_markdown)] // Allow technical terms like WebSocket, YAML in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # ScriptHost Core
//!
//! Orchestration core for a host process that keeps a pool of scripting-engine
//! workers, application extensions, and developer-facing services alive, healthy,
//! and current.
//!
//! ## Overview
//!
//! The crate is the engine room behind an embedded scripting host. Everything that
//! talks to the wrapped application (the scripting bridge, the extension content,
//! the developer-tools protocol) is a collaborator reached through a trait; this
//! crate owns sequencing, pooling, monitoring, and reloading.
//!
//! ## Architecture
//!
//! Four components, leaves first:
//!
//! 1. [`resources::ResourceManager`] brokers keyed pooled resources, bounded worker
//!    slots, and supervised child processes under a resizable concurrency cap.
//! 2. [`health::HealthMonitor`] probes every registered component on a timer and
//!    makes one recovery attempt per unhealthy detection.
//! 3. [`reload::HotReloadManager`] watches directories, debounces bursts of file
//!    events, and reloads scripts and configuration through the interpreter pool.
//! 4. [`host::HostOrchestrator`] composes the above with the external interpreter
//!    pool, extension service, and notification server into one lifecycle.
//!
//! ## Key Features
//!
//! - **All-or-nothing startup**: a failing service unwinds everything started before it
//! - **Best-effort shutdown**: bounded by a shutdown budget, never aborted by one service
//! - **Coalesced reloads**: N writes to one file inside the debounce window reload it once
//! - **Isolated failures**: checks, recoveries, and reloads report results instead of erroring
//! - **No global state**: every pool, map, and timer is owned by a component instance
//!
//! ## Module Organization
//!
//! - [`host`] - Orchestrator, lifecycle state machine, ordered service set
//! - [`resources`] - Pooled resources, worker slots, managed processes, memory probing
//! - [`health`] - Health checks, recovery dispatch, system metrics
//! - [`reload`] - File watching, debounce queue, per-kind reload
//! - [`integrations`] - Collaborator contracts and the in-process notifier
//! - [`config`] - Configuration tree, loader, and validator
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup and helpers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scripthost_core::config::ConfigManager;
//! use scripthost_core::host::{HostContext, HostOrchestrator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! scripthost_core::logging::init_structured_logging();
//!
//! let manager = ConfigManager::load()?;
//! let host = HostOrchestrator::builder(manager.config().clone()).build();
//!
//! host.initialize(HostContext::new("my-app")).await?;
//! host.start().await?;
//! println!("services: {:?}", host.service_names());
//! host.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! In-memory collaborator doubles live in [`test_utils`]:
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod health;
pub mod host;
pub mod integrations;
pub mod locator;
pub mod logging;
pub mod reload;
pub mod resources;
pub mod test_utils;
pub mod utils;

pub use config::{ConfigManager, HostConfig};
pub use constants::{components, events as notification_events};
pub use error::{HostError, Result};
pub use health::{HealthCheckResult, HealthMonitor, HealthReport};
pub use host::{ExecutionResult, HostContext, HostHealth, HostOrchestrator, HostState, HostStats};
pub use integrations::{
    BroadcastNotifier, ConfigValidator, ExtensionService, InterpreterPool, NotificationSink,
};
pub use locator::ServiceLocator;
pub use reload::{BatchReloadResult, HotReloadManager, ReloadOutcome};
pub use resources::{ManagedProcessInfo, ProcessSpec, ResourceManager, ResourceSnapshot};

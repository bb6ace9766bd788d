//! # Test Utilities
//!
//! In-memory collaborator doubles shared by unit and integration tests. None of
//! them touch the network or spawn interpreters.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{HostError, Result};
use crate::host::{FnService, Service};
use crate::integrations::{
    ExecutionOutput, ExtensionInfo, ExtensionService, InterpreterHandle, InterpreterPool,
    NotificationSink, ScriptScope,
};
use crate::resources::MemoryProbe;

/// Code containing this marker fails to compile
pub const SYNTAX_ERROR_MARKER: &str = "SYNTAX_ERROR";
/// Code containing this marker compiles but fails at run time
pub const RUNTIME_ERROR_MARKER: &str = "RUNTIME_ERROR";

/// Interpreter pool backed by a semaphore; records every compiled and executed script
pub struct MockInterpreterPool {
    capacity: usize,
    permits: Arc<Semaphore>,
    next_id: AtomicUsize,
    executed: Arc<Mutex<Vec<String>>>,
    compiled: Arc<AtomicU64>,
    refreshes: AtomicU64,
    execution_delay: Duration,
}

impl MockInterpreterPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            permits: Arc::new(Semaphore::new(capacity)),
            next_id: AtomicUsize::new(0),
            executed: Arc::new(Mutex::new(Vec::new())),
            compiled: Arc::new(AtomicU64::new(0)),
            refreshes: AtomicU64::new(0),
            execution_delay: Duration::ZERO,
        }
    }

    /// Make every execution take `delay`
    pub fn with_execution_delay(mut self, delay: Duration) -> Self {
        self.execution_delay = delay;
        self
    }

    /// Scripts executed so far, in order
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    pub fn compile_count(&self) -> u64 {
        self.compiled.load(Ordering::Relaxed)
    }

    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }
}

struct MockInterpreter {
    id: String,
    executed: Arc<Mutex<Vec<String>>>,
    compiled: Arc<AtomicU64>,
    delay: Duration,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl InterpreterHandle for MockInterpreter {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn execute(
        &mut self,
        code: &str,
        globals: Option<&ScriptScope>,
        _locals: Option<&ScriptScope>,
    ) -> ExecutionOutput {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.executed.lock().push(code.to_string());
        if code.contains(RUNTIME_ERROR_MARKER) {
            return ExecutionOutput::failure("RuntimeError: raised by script");
        }
        let globals = globals.map(|g| g.len()).unwrap_or(0);
        ExecutionOutput::success(format!("ran {} bytes with {globals} globals", code.len()))
    }

    async fn compile(&mut self, code: &str, origin: &str) -> std::result::Result<(), String> {
        self.compiled.fetch_add(1, Ordering::Relaxed);
        if code.contains(SYNTAX_ERROR_MARKER) {
            Err(format!("SyntaxError: invalid syntax ({origin}, line 1)"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl InterpreterPool for MockInterpreterPool {
    async fn acquire(&self, timeout: Duration) -> Result<Box<dyn InterpreterHandle>> {
        let permit = tokio::time::timeout(timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| HostError::timeout("interpreter acquisition", timeout.as_millis() as u64))?
            .map_err(|_| HostError::Interpreter("interpreter pool closed".to_string()))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MockInterpreter {
            id: format!("interp-{id}"),
            executed: self.executed.clone(),
            compiled: self.compiled.clone(),
            delay: self.execution_delay,
            _permit: permit,
        }))
    }

    async fn release(&self, handle: Box<dyn InterpreterHandle>) {
        drop(handle);
    }

    async fn refresh(&self) -> Result<()> {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn available(&self) -> usize {
        self.permits.available_permits()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Memory probe reporting a settable usage; `collect` drops usage to a floor
pub struct FixedMemoryProbe {
    used: AtomicU64,
    floor: AtomicU64,
    collections: AtomicU64,
}

impl FixedMemoryProbe {
    pub fn new(used_bytes: u64) -> Self {
        Self {
            used: AtomicU64::new(used_bytes),
            floor: AtomicU64::new(used_bytes),
            collections: AtomicU64::new(0),
        }
    }

    pub fn from_mb(used_mb: u64) -> Self {
        Self::new(used_mb * 1024 * 1024)
    }

    /// Usage left behind by the next collection
    pub fn with_floor(self, floor_bytes: u64) -> Self {
        self.floor.store(floor_bytes, Ordering::Relaxed);
        self
    }

    pub fn set_used(&self, bytes: u64) {
        self.used.store(bytes, Ordering::Relaxed);
    }

    pub fn collections(&self) -> u64 {
        self.collections.load(Ordering::Relaxed)
    }
}

impl MemoryProbe for FixedMemoryProbe {
    fn used_bytes(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    fn collect(&self) -> u64 {
        self.collections.fetch_add(1, Ordering::Relaxed);
        let floor = self.floor.load(Ordering::Relaxed);
        let before = self.used.swap(floor, Ordering::Relaxed);
        before.saturating_sub(floor)
    }
}

/// Extension service keeping loaded extensions in a map
#[derive(Default)]
pub struct MockExtensionService {
    loaded: DashMap<String, ExtensionInfo>,
    initialized: AtomicBool,
    initializations: AtomicU64,
    fail_initialize: AtomicBool,
}

impl MockExtensionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_initialize(&self, fail: bool) {
        self.fail_initialize.store(fail, Ordering::Relaxed);
    }

    pub fn initializations(&self) -> u64 {
        self.initializations.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ExtensionService for MockExtensionService {
    async fn initialize(&self) -> Result<()> {
        self.initializations.fetch_add(1, Ordering::Relaxed);
        if self.fail_initialize.load(Ordering::Relaxed) {
            self.initialized.store(false, Ordering::Relaxed);
            return Err(HostError::Extension("extension store unavailable".to_string()));
        }
        self.initialized.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn load_extensions_from_paths(&self, paths: &[PathBuf]) -> Result<Vec<ExtensionInfo>> {
        let mut loaded = Vec::with_capacity(paths.len());
        for path in paths {
            loaded.push(self.load_extension(path).await?);
        }
        Ok(loaded)
    }

    async fn load_extension(&self, path: &Path) -> Result<ExtensionInfo> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| HostError::Extension(format!("invalid extension path: {}", path.display())))?
            .to_string();
        let info = ExtensionInfo {
            id: format!("ext-{name}"),
            name,
            version: "1.0.0".to_string(),
            path: path.to_path_buf(),
            loaded_at: Utc::now(),
        };
        self.loaded.insert(info.id.clone(), info.clone());
        Ok(info)
    }

    async fn unload(&self, id: &str) -> Result<()> {
        self.loaded
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| HostError::Extension(format!("extension not loaded: {id}")))
    }

    async fn shutdown(&self) -> Result<()> {
        self.loaded.clear();
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    fn loaded(&self) -> Vec<ExtensionInfo> {
        let mut loaded: Vec<ExtensionInfo> = self.loaded.iter().map(|e| e.value().clone()).collect();
        loaded.sort_by(|a, b| a.id.cmp(&b.id));
        loaded
    }
}

/// Notification sink that keeps every message it receives
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<Value>>,
    alive: AtomicBool,
    restarts: AtomicU64,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<Value> {
        self.messages.lock().clone()
    }

    /// Messages whose `type` equals `kind`
    pub fn messages_of(&self, kind: &str) -> Vec<Value> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m["type"] == kind)
            .cloned()
            .collect()
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Relaxed);
    }

    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn broadcast(&self, message: Value) {
        self.messages.lock().push(message);
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn start(&self) -> Result<()> {
        self.alive.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.alive.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn restart(&self) -> Result<()> {
        self.restarts.fetch_add(1, Ordering::Relaxed);
        self.alive.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Service that appends `start:<name>` / `stop:<name>` to a shared log
pub fn recording_service(name: &str, log: Arc<Mutex<Vec<String>>>, fail_start: bool) -> Arc<dyn Service> {
    let start_log = log.clone();
    let start_name = name.to_string();
    let stop_name = name.to_string();
    Arc::new(FnService::new(
        name,
        move || {
            let log = start_log.clone();
            let name = start_name.clone();
            async move {
                if fail_start {
                    return Err(HostError::InvalidState(format!("{name} refused to start")));
                }
                log.lock().push(format!("start:{name}"));
                Ok(())
            }
        },
        move || {
            let log = log.clone();
            let name = stop_name.clone();
            async move {
                log.lock().push(format!("stop:{name}"));
                Ok(())
            }
        },
    ))
}

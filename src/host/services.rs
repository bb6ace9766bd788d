//! Built-in services wrapping the host's own components and its collaborators.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use super::lifecycle::Service;
use crate::constants::components;
use crate::error::{HostError, Result};
use crate::health::HealthMonitor;
use crate::integrations::{ExtensionService, InterpreterPool, NotificationSink};
use crate::reload::HotReloadManager;
use crate::resources::ResourceManager;

pub(crate) struct ResourceService(pub ResourceManager);

#[async_trait]
impl Service for ResourceService {
    fn name(&self) -> &str {
        components::RESOURCE_MANAGER
    }

    async fn start(&self) -> Result<()> {
        self.0.start()
    }

    async fn stop(&self) -> Result<()> {
        self.0.stop().await
    }
}

/// Initializes the extension service and loads extensions from the startup paths
pub(crate) struct ExtensionManagerService {
    pub service: Arc<dyn ExtensionService>,
    pub paths: Vec<PathBuf>,
}

#[async_trait]
impl Service for ExtensionManagerService {
    fn name(&self) -> &str {
        components::EXTENSION_MANAGER
    }

    async fn start(&self) -> Result<()> {
        self.service.initialize().await?;
        if !self.paths.is_empty() {
            let loaded = self.service.load_extensions_from_paths(&self.paths).await?;
            info!(
                paths = self.paths.len(),
                loaded = loaded.len(),
                "HOST: Loaded startup extensions"
            );
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.service.shutdown().await
    }
}

/// Warms the interpreter pool; an empty pool cannot serve executions
pub(crate) struct InterpreterService(pub Arc<dyn InterpreterPool>);

#[async_trait]
impl Service for InterpreterService {
    fn name(&self) -> &str {
        components::INTERPRETER_POOL
    }

    async fn start(&self) -> Result<()> {
        if self.0.capacity() == 0 {
            return Err(HostError::Interpreter(
                "interpreter pool has no capacity".to_string(),
            ));
        }
        self.0.refresh().await
    }

    async fn stop(&self) -> Result<()> {
        let (available, capacity) = (self.0.available(), self.0.capacity());
        if available < capacity {
            warn!(
                available,
                capacity,
                "HOST: Interpreters still borrowed at shutdown"
            );
        }
        Ok(())
    }
}

pub(crate) struct NotificationService(pub Arc<dyn NotificationSink>);

#[async_trait]
impl Service for NotificationService {
    fn name(&self) -> &str {
        components::NOTIFICATION_SERVER
    }

    async fn start(&self) -> Result<()> {
        self.0.start().await
    }

    async fn stop(&self) -> Result<()> {
        self.0.stop().await
    }
}

pub(crate) struct HealthService(pub HealthMonitor);

#[async_trait]
impl Service for HealthService {
    fn name(&self) -> &str {
        components::HEALTH_MONITOR
    }

    async fn start(&self) -> Result<()> {
        self.0.start()
    }

    async fn stop(&self) -> Result<()> {
        self.0.stop().await
    }
}

pub(crate) struct ReloadService(pub HotReloadManager);

#[async_trait]
impl Service for ReloadService {
    fn name(&self) -> &str {
        components::HOT_RELOAD
    }

    async fn start(&self) -> Result<()> {
        self.0.start().await
    }

    async fn stop(&self) -> Result<()> {
        self.0.stop().await
    }
}

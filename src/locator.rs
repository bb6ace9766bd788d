//! Service locator handed to the health monitor.
//!
//! The monitor never owns the components it probes; it reaches them through
//! this set of optional shared handles. A missing handle makes the matching
//! built-in check report the component as not configured.

use std::sync::Arc;

use crate::integrations::{ExtensionService, InterpreterPool, NotificationSink};
use crate::resources::ResourceManager;

#[derive(Clone, Default)]
pub struct ServiceLocator {
    resource_manager: Option<ResourceManager>,
    interpreter_pool: Option<Arc<dyn InterpreterPool>>,
    notification_sink: Option<Arc<dyn NotificationSink>>,
    extension_service: Option<Arc<dyn ExtensionService>>,
}

impl ServiceLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource_manager(mut self, manager: ResourceManager) -> Self {
        self.resource_manager = Some(manager);
        self
    }

    pub fn with_interpreter_pool(mut self, pool: Arc<dyn InterpreterPool>) -> Self {
        self.interpreter_pool = Some(pool);
        self
    }

    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notification_sink = Some(sink);
        self
    }

    pub fn with_extension_service(mut self, service: Arc<dyn ExtensionService>) -> Self {
        self.extension_service = Some(service);
        self
    }

    pub fn resource_manager(&self) -> Option<&ResourceManager> {
        self.resource_manager.as_ref()
    }

    pub fn interpreter_pool(&self) -> Option<&Arc<dyn InterpreterPool>> {
        self.interpreter_pool.as_ref()
    }

    pub fn notification_sink(&self) -> Option<&Arc<dyn NotificationSink>> {
        self.notification_sink.as_ref()
    }

    pub fn extension_service(&self) -> Option<&Arc<dyn ExtensionService>> {
        self.extension_service.as_ref()
    }
}

impl std::fmt::Debug for ServiceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceLocator")
            .field("resource_manager", &self.resource_manager.is_some())
            .field("interpreter_pool", &self.interpreter_pool.is_some())
            .field("notification_sink", &self.notification_sink.is_some())
            .field("extension_service", &self.extension_service.is_some())
            .finish()
    }
}

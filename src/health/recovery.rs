//! Recovery routines for built-in components.
//!
//! Routines are idempotent. Errors are returned to the monitor, which logs and
//! counts them; nothing here is retried.

use anyhow::Context;
use futures::future::BoxFuture;
use std::sync::Arc;

use super::types::HealthCheckResult;
use crate::constants::components;
use crate::locator::ServiceLocator;

pub type CheckFuture = BoxFuture<'static, anyhow::Result<HealthCheckResult>>;

/// Custom health check callback
pub type CustomCheck = Arc<dyn Fn() -> CheckFuture + Send + Sync>;

pub type RecoveryFuture = BoxFuture<'static, anyhow::Result<bool>>;

/// Recovery callback; `Ok(true)` means the remediation ran successfully
pub type RecoveryAction = Arc<dyn Fn() -> RecoveryFuture + Send + Sync>;

/// Run the built-in routine for `component`; `None` when there is none
pub(crate) async fn run_builtin(
    component: &str,
    locator: &ServiceLocator,
) -> Option<anyhow::Result<bool>> {
    let outcome = match component {
        components::MEMORY_MANAGER => {
            let resources = locator.resource_manager()?;
            resources.collect_garbage();
            Ok(true)
        }
        components::RESOURCE_USAGE => {
            let resources = locator.resource_manager()?;
            resources.optimize_resource_usage().await;
            Ok(true)
        }
        components::DEBUG_SERVER => {
            let sink = locator.notification_sink()?;
            sink.restart()
                .await
                .context("restarting notification server")
                .map(|()| sink.is_alive())
        }
        components::INTERPRETER_POOL => {
            let pool = locator.interpreter_pool()?;
            pool.refresh()
                .await
                .context("refreshing interpreter pool")
                .map(|()| true)
        }
        components::EXTENSION_MANAGER => {
            let service = locator.extension_service()?;
            service
                .initialize()
                .await
                .context("reinitializing extension service")
                .map(|()| service.is_available())
        }
        _ => return None,
    };
    Some(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_routine_without_collaborator() {
        let locator = ServiceLocator::new();
        assert!(run_builtin(components::MEMORY_MANAGER, &locator).await.is_none());
        assert!(run_builtin(components::FILE_SYSTEM, &locator).await.is_none());
    }
}

//! Integration tests for the host orchestrator lifecycle and public surface.

use parking_lot::Mutex;
use scripthost_core::config::HostConfig;
use scripthost_core::host::{HostContext, HostOrchestrator, HostState};
use scripthost_core::integrations::{ConfigValidator, ValidationReport};
use scripthost_core::test_utils::{
    recording_service, FixedMemoryProbe, MockExtensionService, MockInterpreterPool, RecordingSink,
    RUNTIME_ERROR_MARKER,
};
use scripthost_core::{components, notification_events, HostError, InterpreterPool};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

struct Harness {
    host: HostOrchestrator,
    pool: Arc<MockInterpreterPool>,
    extensions: Arc<MockExtensionService>,
    sink: Arc<RecordingSink>,
}

fn harness(config: HostConfig) -> Harness {
    let pool = Arc::new(MockInterpreterPool::new(2));
    let extensions = Arc::new(MockExtensionService::new());
    let sink = Arc::new(RecordingSink::new());
    let host = HostOrchestrator::builder(config)
        .with_interpreter_pool(pool.clone())
        .with_extension_service(extensions.clone())
        .with_notification_sink(sink.clone())
        .with_memory_probe(Arc::new(FixedMemoryProbe::from_mb(64)))
        .build();
    Harness {
        host,
        pool,
        extensions,
        sink,
    }
}

async fn running(config: HostConfig) -> Harness {
    let h = harness(config);
    h.host.initialize(HostContext::new("test-app")).await.unwrap();
    h.host.start().await.unwrap();
    h
}

#[tokio::test]
async fn test_lifecycle_state_machine() {
    let h = harness(HostConfig::for_testing());
    assert_eq!(h.host.state(), HostState::Uninitialized);

    let err = h.host.start().await.unwrap_err();
    assert!(matches!(err, HostError::InvalidState(_)));

    assert_ok!(h.host.initialize(HostContext::new("app")).await);
    assert_eq!(h.host.state(), HostState::Initialized);
    assert!(h.host.initialize(HostContext::new("again")).await.is_err());

    assert_ok!(h.host.start().await);
    assert!(h.host.is_running());
    assert_ok!(h.host.start().await);

    let report = h.host.stop().await.unwrap();
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(h.host.state(), HostState::Stopped);
    assert_eq!(h.host.uptime(), Duration::ZERO);
}

#[tokio::test]
async fn test_services_start_in_dependency_order() {
    let h = harness(HostConfig::for_testing());
    let log = Arc::new(Mutex::new(Vec::new()));
    h.host
        .register_service(recording_service("Gateway", log.clone(), false))
        .unwrap();

    assert_eq!(
        h.host.service_names(),
        vec![
            components::RESOURCE_MANAGER,
            components::EXTENSION_MANAGER,
            components::INTERPRETER_POOL,
            components::NOTIFICATION_SERVER,
            components::HEALTH_MONITOR,
            components::HOT_RELOAD,
            "Gateway",
        ]
    );

    h.host.initialize(HostContext::new("app")).await.unwrap();
    h.host.start().await.unwrap();
    assert!(h.host.resource_manager().is_running());
    assert!(h.host.health_monitor().is_running());
    assert!(h.host.hot_reload().is_running());
    assert!(h
        .host
        .register_service(recording_service("Late", log.clone(), false))
        .is_err());

    let report = h.host.stop().await.unwrap();
    assert_eq!(report.stopped.first().map(String::as_str), Some("Gateway"));
    assert_eq!(
        report.stopped.last().map(String::as_str),
        Some(components::RESOURCE_MANAGER)
    );
    assert_eq!(*log.lock(), vec!["start:Gateway", "stop:Gateway"]);
}

#[tokio::test]
async fn test_failed_start_unwinds_and_stays_initialized() {
    let h = harness(HostConfig::for_testing());
    let log = Arc::new(Mutex::new(Vec::new()));
    h.host
        .register_service(recording_service("First", log.clone(), false))
        .unwrap();
    h.host
        .register_service(recording_service("Second", log.clone(), true))
        .unwrap();
    h.host
        .register_service(recording_service("Third", log.clone(), false))
        .unwrap();

    h.host.initialize(HostContext::new("app")).await.unwrap();
    let err = h.host.start().await.unwrap_err();
    assert!(matches!(err, HostError::Startup { ref service, .. } if service == "Second"));

    assert_eq!(h.host.state(), HostState::Initialized);
    assert_eq!(*log.lock(), vec!["start:First", "stop:First"]);
    assert!(!h.host.resource_manager().is_running());
    assert!(!h.host.health_monitor().is_running());
}

#[tokio::test]
async fn test_extension_startup_failure_blocks_start() {
    let h = harness(HostConfig::for_testing());
    h.extensions.fail_initialize(true);
    h.host.initialize(HostContext::new("app")).await.unwrap();

    let err = h.host.start().await.unwrap_err();
    assert!(matches!(err, HostError::Startup { ref service, .. } if service == components::EXTENSION_MANAGER));
    assert!(!h.host.resource_manager().is_running());
}

#[tokio::test]
async fn test_validation_failure_blocks_initialize() {
    struct Rejecting;
    impl ConfigValidator for Rejecting {
        fn validate(&self, _config: &HostConfig) -> ValidationReport {
            ValidationReport::from_issues(vec!["debug port in use".into()], vec![])
        }
    }

    let host = HostOrchestrator::builder(HostConfig::for_testing())
        .with_config_validator(Arc::new(Rejecting))
        .build();
    let err = host.initialize(HostContext::new("app")).await.unwrap_err();
    assert!(matches!(err, HostError::Validation { ref errors } if errors.len() == 1));
    assert_eq!(host.state(), HostState::Uninitialized);

    let mut config = HostConfig::for_testing();
    config.health.check_interval_seconds = 0;
    let host = HostOrchestrator::builder(config).build();
    assert!(host.initialize(HostContext::new("app")).await.is_err());
}

#[tokio::test]
async fn test_execute_requires_running_and_tracks_stats() {
    let h = harness(HostConfig::for_testing());
    let err = h.host.execute("print(1)", None, None).await.unwrap_err();
    assert!(matches!(err, HostError::InvalidState(_)));

    h.host.initialize(HostContext::new("app")).await.unwrap();
    h.host.start().await.unwrap();

    let globals = json!({"doc": "model.rvt"}).as_object().cloned().unwrap();
    let result = h.host.execute("print(doc)", Some(&globals), None).await.unwrap();
    assert!(result.ok);
    assert!(result.output.contains("1 globals"));

    let failed = h
        .host
        .execute(&format!("raise {RUNTIME_ERROR_MARKER}"), None, None)
        .await
        .unwrap();
    assert!(!failed.ok);
    assert!(failed.error.is_some());

    let stats = h.host.stats();
    assert_eq!(stats.executions, 2);
    assert_eq!(stats.successful, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(h.pool.executed().len(), 2);
    assert_eq!(h.pool.available(), 2);
}

#[tokio::test]
async fn test_execute_times_out_when_pool_is_exhausted() {
    let pool = Arc::new(MockInterpreterPool::new(1).with_execution_delay(Duration::from_millis(300)));
    let mut config = HostConfig::for_testing();
    config.execution.interpreter_acquire_timeout_ms = 50;
    let host = HostOrchestrator::builder(config)
        .with_interpreter_pool(pool)
        .with_memory_probe(Arc::new(FixedMemoryProbe::from_mb(64)))
        .build();
    host.initialize(HostContext::new("app")).await.unwrap();
    host.start().await.unwrap();

    let busy = host.clone();
    let first = tokio::spawn(async move { busy.execute("slow()", None, None).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = host.execute("fast()", None, None).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(first.await.unwrap().unwrap().ok);
    assert_eq!(host.stats().timeouts, 1);
    host.stop().await.unwrap();
}

#[tokio::test]
async fn test_extensions_load_and_unload() {
    let h = running(HostConfig::for_testing()).await;

    let info = h.host.load_extension("/opt/extensions/tools.ext").await.unwrap();
    assert_eq!(info.name, "tools");
    assert_eq!(h.host.loaded_extensions().len(), 1);
    assert_eq!(h.host.stats().extensions_loaded, 1);

    h.host.unload_extension(&info.id).await.unwrap();
    assert!(h.host.loaded_extensions().is_empty());
    assert!(h.host.unload_extension(&info.id).await.is_err());
}

#[tokio::test]
async fn test_startup_extensions_come_from_context() {
    let h = harness(HostConfig::for_testing());
    h.host
        .initialize(HostContext::new("app").with_extension_path("/opt/extensions/startup.ext"))
        .await
        .unwrap();
    h.host.start().await.unwrap();

    assert_eq!(h.host.loaded_extensions()[0].name, "startup");
    h.host.stop().await.unwrap();
    assert!(h.host.loaded_extensions().is_empty());
}

#[tokio::test]
async fn test_health_check_reports_components() {
    let h = running(HostConfig::for_testing()).await;

    let health = h.host.health_check().await;
    assert!(health.is_healthy, "{:?}", health.report.issues);
    assert_eq!(health.state, HostState::Running);
    assert_eq!(health.report.components.len(), 6);
    assert!(health.resources.memory_bytes > 0);
    h.host.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_start_round_trip_keeps_stats_until_reset() {
    let h = running(HostConfig::for_testing()).await;
    h.host.execute("x = 1", None, None).await.unwrap();

    h.host.stop().await.unwrap();
    h.host.start().await.unwrap();
    assert_eq!(h.host.state(), HostState::Running);

    let stats = h.host.stats();
    assert_eq!(stats.executions, 1);
    assert_eq!(stats.start_count, 2);

    h.host.reset().await.unwrap();
    let stats = h.host.stats();
    assert_eq!(stats.executions, 0);
    assert_eq!(stats.start_count, 2);
    assert!(stats.last_reset_at.is_some());
    assert!(h.pool.refresh_count() >= 2);
    assert!(h.host.is_running());

    assert_eq!(h.sink.messages_of(notification_events::HOST_STARTED).len(), 2);
    h.host.stop().await.unwrap();
}

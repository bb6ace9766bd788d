//! # Structured Logging Module
//!
//! Environment-aware structured logging for the host core. Console output is
//! always on; setting `SCRIPTHOST_LOG_FORMAT=json` switches to JSON lines for
//! log shippers. `RUST_LOG` overrides the environment-derived level.

use chrono::Utc;
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = std::env::var("RUST_LOG")
            .ok()
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::new(get_log_level(&environment)));
        let json = wants_json();

        let console = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // A global subscriber may already be installed by the embedding process
        if tracing_subscriber::registry().with(console).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var("SCRIPTHOST_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

fn wants_json() -> bool {
    std::env::var("SCRIPTHOST_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Log a service lifecycle step (start, stop, unwind)
pub fn log_service_operation(
    service: &str,
    operation: &str,
    status: &str,
    duration: Option<Duration>,
    details: Option<&str>,
) {
    tracing::info!(
        service = %service,
        operation = %operation,
        status = %status,
        duration_ms = duration.map(|d| d.as_millis() as u64),
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "⚙️ SERVICE_OPERATION"
    );
}

/// Log the outcome of reloading one file
pub fn log_reload_outcome(path: &str, kind: &str, status: &str, duration: Duration, message: Option<&str>) {
    tracing::info!(
        path = %path,
        kind = %kind,
        status = %status,
        duration_ms = duration.as_millis() as u64,
        message = message,
        timestamp = %Utc::now().to_rfc3339(),
        "🔄 RELOAD_OUTCOME"
    );
}

/// Log one recovery attempt for a component
pub fn log_recovery_attempt(component: &str, success: bool, details: Option<&str>) {
    if success {
        tracing::info!(
            component = %component,
            success,
            details = details,
            timestamp = %Utc::now().to_rfc3339(),
            "🩺 RECOVERY_ATTEMPT"
        );
    } else {
        tracing::warn!(
            component = %component,
            success,
            details = details,
            timestamp = %Utc::now().to_rfc3339(),
            "🩺 RECOVERY_ATTEMPT"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("staging"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
        log_recovery_attempt("MemoryManager", true, Some("collected"));
    }
}

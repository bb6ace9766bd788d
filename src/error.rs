//! # Host Error Types
//!
//! Structured error taxonomy for the host core. Component-local failures (a single
//! health check, a single file reload) are reported as result values; only the
//! variants below ever cross a public API boundary.

use thiserror::Error;

/// Errors surfaced by the host core
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Timeout: {operation} did not complete within {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Validation failed: {}", errors.join("; "))]
    Validation { errors: Vec<String> },

    #[error("Recovery failed for {component}: {message}")]
    Recovery { component: String, message: String },

    #[error("Service {service} failed to start: {message}")]
    Startup { service: String, message: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Resource creation failed for key {key}: {message}")]
    ResourceCreation { key: String, message: String },

    #[error("Resource under key {key} has a different type than requested")]
    ResourceTypeMismatch { key: String },

    #[error("Process error: {message}")]
    Process { message: String },

    #[error("Managed process not found: {0}")]
    ProcessNotFound(String),

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("Interpreter error: {0}")]
    Interpreter(String),

    #[error("Extension error: {0}")]
    Extension(String),

    #[error("File watch error: {0}")]
    Watch(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HostError {
    /// Create a timeout error for the named operation
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a validation error from a single message
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            errors: vec![message.into()],
        }
    }

    /// Create a recovery error
    pub fn recovery(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Recovery {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a startup error
    pub fn startup(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Startup {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a resource creation error
    pub fn resource_creation(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ResourceCreation {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a process error
    pub fn process(message: impl Into<String>) -> Self {
        Self::Process {
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether the caller may reasonably retry the operation later
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Recovery { .. } | Self::Io(_) | Self::Interpreter(_)
        )
    }
}

impl From<config::ConfigError> for HostError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<notify::Error> for HostError {
    fn from(err: notify::Error) -> Self {
        Self::Watch(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_and_classification() {
        let err = HostError::timeout("resource acquisition", 50);
        assert_eq!(
            err.to_string(),
            "Timeout: resource acquisition did not complete within 50ms"
        );
        assert!(err.is_timeout());
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_validation_joins_errors() {
        let err = HostError::Validation {
            errors: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "Validation failed: a; b");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: HostError = io.into();
        assert!(matches!(err, HostError::Io(_)));
    }
}

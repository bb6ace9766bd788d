//! # Collaborator Contracts
//!
//! Boundaries the host core depends on but does not implement: the pooled
//! interpreter service, the developer-tools notification channel, configuration
//! validation, and the extension service. Each contract is an object-safe trait so
//! deployments (and tests) can inject their own implementation.

pub mod extensions;
pub mod interpreter;
pub mod notification;
pub mod validator;

pub use extensions::{ExtensionInfo, ExtensionService};
pub use interpreter::{ExecutionOutput, InterpreterHandle, InterpreterPool, ScriptScope};
pub use notification::{BroadcastNotifier, Notification, NotificationSink};
pub use validator::{ConfigValidator, ValidationReport};

//! Interpreter pool contract.
//!
//! The scripting engine itself lives outside the host core. The core only needs to
//! borrow an interpreter for a bounded time, run code on it, and hand it back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::error::Result;

/// Variables injected into a script's global or local scope
pub type ScriptScope = Map<String, Value>;

/// Outcome of running code on an interpreter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub ok: bool,
    pub output: String,
    pub error: Option<String>,
}

impl ExecutionOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            ok: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }
}

/// A borrowed interpreter
#[async_trait]
pub trait InterpreterHandle: Send {
    /// Stable identifier of the underlying interpreter
    fn id(&self) -> String;

    /// Run `code` with optional global and local scopes
    async fn execute(
        &mut self,
        code: &str,
        globals: Option<&ScriptScope>,
        locals: Option<&ScriptScope>,
    ) -> ExecutionOutput;

    /// Compile without executing; `Err` carries the syntax error message.
    ///
    /// Engines without a separate compile phase accept everything here and report
    /// problems from `execute`.
    async fn compile(&mut self, _code: &str, _origin: &str) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Pool of interpreters shared by script execution and hot reload
#[async_trait]
pub trait InterpreterPool: Send + Sync {
    /// Borrow an interpreter, failing with `HostError::Timeout` after `timeout`
    async fn acquire(&self, timeout: Duration) -> Result<Box<dyn InterpreterHandle>>;

    /// Return a borrowed interpreter
    async fn release(&self, handle: Box<dyn InterpreterHandle>);

    /// Tear down and recreate idle interpreters
    async fn refresh(&self) -> Result<()>;

    /// Interpreters currently available for borrowing
    fn available(&self) -> usize;

    fn capacity(&self) -> usize;
}

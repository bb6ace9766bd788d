//! Extension service contract.
//!
//! Loading, validating, and signing extensions is owned by the extension service;
//! the host core only sequences it within the service lifecycle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Metadata of a loaded extension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    pub loaded_at: DateTime<Utc>,
}

#[async_trait]
pub trait ExtensionService: Send + Sync {
    async fn initialize(&self) -> Result<()>;

    async fn load_extensions_from_paths(&self, paths: &[PathBuf]) -> Result<Vec<ExtensionInfo>>;

    async fn load_extension(&self, path: &Path) -> Result<ExtensionInfo>;

    async fn unload(&self, id: &str) -> Result<()>;

    /// Unload everything; called during host shutdown
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn is_available(&self) -> bool;

    fn loaded(&self) -> Vec<ExtensionInfo>;
}

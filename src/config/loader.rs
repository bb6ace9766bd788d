//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are layered in order: struct
//! defaults, an optional configuration file, then `SCRIPTHOST__`-prefixed environment
//! variables (`SCRIPTHOST__HEALTH__CHECK_INTERVAL_SECONDS=10`).

use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::HostConfig;
use crate::error::{HostError, Result};

const ENV_PREFIX: &str = "SCRIPTHOST";
const ENV_VAR: &str = "SCRIPTHOST_ENV";
const DEFAULT_FILE_STEM: &str = "scripthost";

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: HostConfig,
    environment: String,
    source_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load `scripthost.{toml,yaml,json}` from the working directory if present
    pub fn load() -> Result<Arc<ConfigManager>> {
        let builder = Config::builder()
            .add_source(File::with_name(DEFAULT_FILE_STEM).required(false))
            .add_source(Self::environment_source());
        Self::build(builder, None)
    }

    /// Load from an explicit file; the file must exist
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Arc<ConfigManager>> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(HostError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let builder = Config::builder()
            .add_source(File::from(path).required(true))
            .add_source(Self::environment_source());
        Self::build(builder, Some(path.to_path_buf()))
    }

    /// Wrap an already-constructed configuration
    pub fn from_config(mut config: HostConfig) -> Result<Arc<ConfigManager>> {
        if config.environment.is_empty() {
            config.environment = Self::detect_environment();
        }
        config.validate()?;

        Ok(Arc::new(ConfigManager {
            environment: config.environment.clone(),
            config,
            source_path: None,
        }))
    }

    fn environment_source() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
    }

    fn build(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
        source_path: Option<PathBuf>,
    ) -> Result<Arc<ConfigManager>> {
        let mut config: HostConfig = builder.build()?.try_deserialize()?;

        if config.environment.is_empty() {
            config.environment = Self::detect_environment();
        }

        config.validate()?;

        debug!(
            "Configuration loaded: {}",
            serde_json::to_string(&config).unwrap_or_else(|_| "[serialization error]".to_string())
        );
        info!(
            environment = %config.environment,
            source = %source_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "defaults".to_string()),
            "CONFIG: Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            environment: config.environment.clone(),
            config,
            source_path,
        }))
    }

    /// Detect the deployment environment from `SCRIPTHOST_ENV`
    pub fn detect_environment() -> String {
        env::var(ENV_VAR).unwrap_or_else(|_| "development".to_string())
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }
}

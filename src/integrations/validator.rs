//! Configuration validator contract, consulted once during host initialization.

use serde::{Deserialize, Serialize};

use crate::config::HostConfig;

/// Result of validating a configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn from_issues(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

pub trait ConfigValidator: Send + Sync {
    fn validate(&self, config: &HostConfig) -> ValidationReport;
}

//! Reconciler configuration
//!
//! Every field has a default, so an empty file is a valid configuration:
//!
//! ```yaml
//! retry:
//!   delay: 200ms
//!   attempts: 8
//! readiness:
//!   delay: 1s
//!   crdAttempts: 600
//! maxConcurrency: 8
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{KubeError, Result};
use crate::readiness::ReadinessConfig;
use crate::retry::RetryPolicy;

/// Tunables for a reconciliation run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcilerConfig {
    /// Retry policy for cluster writes
    pub retry: RetryPolicy,

    /// Readiness poll policy
    pub readiness: ReadinessConfig,

    /// Upper bound on concurrent operations within a kind group
    pub max_concurrency: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            readiness: ReadinessConfig::default(),
            max_concurrency: 16,
        }
    }
}

impl ReconcilerConfig {
    /// Parse from YAML
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| KubeError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(KubeError::InvalidConfig(
                "maxConcurrency must be at least 1".to_string(),
            ));
        }
        if self.retry.attempts == 0 {
            return Err(KubeError::InvalidConfig(
                "retry.attempts must be at least 1".to_string(),
            ));
        }
        if self.readiness.attempts == 0 || self.readiness.crd_attempts == 0 {
            return Err(KubeError::InvalidConfig(
                "readiness attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

//! Configuration for lifecycle-core
//!
//! Loaded from a TOML file, from `LIFECYCLE_*` environment variables, or
//! built in code. Every field has a default, so a partial file is valid.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{LifecycleError, Result};
use crate::logging::parse_log_level;
use crate::state::TransitionPolicy;
use crate::transform::DEFAULT_TRANSFORM_PRIORITY;

/// Environment variable selecting the transition policy
pub const ENV_TRANSITION_POLICY: &str = "LIFECYCLE_TRANSITION_POLICY";
/// Environment variable selecting the default transform priority
pub const ENV_TRANSFORM_PRIORITY: &str = "LIFECYCLE_TRANSFORM_PRIORITY";
/// Environment variable selecting the log level
pub const ENV_LOG_LEVEL: &str = "LIFECYCLE_LOG_LEVEL";

/// Main configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How entities react to transitions outside their state table
    pub transition_policy: TransitionPolicy,
    /// Priority given to transform layers registered without one
    pub default_transform_priority: i32,
    /// Log level name (`trace` .. `error`)
    pub log_level: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            transition_policy: TransitionPolicy::default(),
            default_transform_priority: DEFAULT_TRANSFORM_PRIORITY,
            log_level: "info".to_string(),
        }
    }
}

impl LifecycleConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate TOML configuration
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| LifecycleError::config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    ///
    /// Unset variables keep their default value.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(policy) = std::env::var(ENV_TRANSITION_POLICY) {
            config.transition_policy = policy.parse()?;
        }
        if let Ok(priority) = std::env::var(ENV_TRANSFORM_PRIORITY) {
            config.default_transform_priority = priority.trim().parse().map_err(|_| {
                LifecycleError::config(format!("Invalid {}: {}", ENV_TRANSFORM_PRIORITY, priority))
            })?;
        }
        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_transition_policy(mut self, policy: TransitionPolicy) -> Self {
        self.transition_policy = policy;
        self
    }

    pub fn with_default_transform_priority(mut self, priority: i32) -> Self {
        self.default_transform_priority = priority;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        parse_log_level(&self.log_level)?;
        Ok(())
    }
}

//! Scheduler configuration.
//!
//! Every field has a default, so an empty YAML document is a valid config.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

const MAX_LOOK_AHEAD: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Maximum number of concurrently running tasks. `0` means unbounded.
    pub concurrency_limit: usize,
    /// Drop the in-flight action of a running task when it is cancelled.
    pub abort_on_cancel: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 4,
            abort_on_cancel: false,
        }
    }
}

impl RegistryConfig {
    pub fn with_limit(concurrency_limit: usize) -> Self {
        Self {
            concurrency_limit,
            ..Self::default()
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.concurrency_limit == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Number of steps after the current one to prefetch.
    pub look_ahead: usize,
    /// Upper bound on settled steps kept per fetcher. `None` keeps everything.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_settled_steps: Option<usize>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            look_ahead: 3,
            max_settled_steps: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub registry: RegistryConfig,
    pub fetcher: FetcherConfig,
}

impl SchedulerConfig {
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        // serde_yaml rejects an empty document; treat it as all defaults.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_yaml(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml_string(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.fetcher.look_ahead > MAX_LOOK_AHEAD {
            return Err(ConfigError::Invalid {
                what: "fetcher.look_ahead must be at most 1024",
            });
        }
        Ok(())
    }
}

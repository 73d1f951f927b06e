//! `dagrun.toml`: optional runtime configuration for `dagrun run`.
//!
//! ```toml
//! [executor]
//! dependency_timeout_secs = 1800
//! poll_interval_ms = 2000
//! work_timeout_secs = 7200
//!
//! [queue]
//! max_concurrent_per_owner = 2
//!
//! [database]
//! url = "postgres://localhost/dagrun"
//! max_connections = 5
//!
//! [dispatcher]
//! shell = "bash"
//! ```
//!
//! Every section and key is optional.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use engine::ExecutorConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub executor: ExecutorSection,
    pub queue: QueueSection,
    pub database: DatabaseSection,
    pub dispatcher: DispatcherSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorSection {
    pub dependency_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub work_timeout_secs: u64,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        let defaults = ExecutorConfig::default();
        Self {
            dependency_timeout_secs: defaults.dependency_timeout.as_secs(),
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
            work_timeout_secs: defaults.work_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueSection {
    /// 0 disables the per-owner limit.
    pub max_concurrent_per_owner: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseSection {
    /// Runs are kept in memory when unset.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherSection {
    pub shell: String,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self { shell: "sh".into() }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// `None` means every default.
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    fn parse(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        let executor = &config.executor;
        for (key, value) in [
            ("dependency_timeout_secs", executor.dependency_timeout_secs),
            ("poll_interval_ms", executor.poll_interval_ms),
            ("work_timeout_secs", executor.work_timeout_secs),
        ] {
            if value == 0 {
                anyhow::bail!("executor.{key} must be greater than zero");
            }
        }
        Ok(config)
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            dependency_timeout: Duration::from_secs(self.executor.dependency_timeout_secs),
            poll_interval: Duration::from_millis(self.executor.poll_interval_ms),
            work_timeout: Duration::from_secs(self.executor.work_timeout_secs),
        }
    }
}

//! Engine configuration loader.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// File name looked up in the project directory.
pub const CONFIG_FILE_NAME: &str = "flowtest.config.yaml";

/// Errors that can occur during config loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yml::Error),
    #[error("polling-interval-ms must be greater than zero")]
    ZeroPollingInterval,
    #[error("parallel must be at least 1")]
    ZeroParallelism,
}

/// Engine-wide defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct EngineConfig {
    /// Delay between two message queue scans.
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    /// Receive timeout used when an action does not set one.
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
    /// Pause between repeat-on-error attempts when none is configured.
    #[serde(default = "default_repeat_auto_sleep_ms")]
    pub repeat_auto_sleep_ms: u64,
    /// Upper bound for joining background workers at the end of a test.
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
    /// Number of test cases run concurrently by a suite.
    #[serde(default = "default_parallel")]
    pub parallel: usize,
}

const fn default_polling_interval_ms() -> u64 {
    500
}

const fn default_receive_timeout_ms() -> u64 {
    5_000
}

const fn default_repeat_auto_sleep_ms() -> u64 {
    1_000
}

const fn default_join_timeout_ms() -> u64 {
    30_000
}

const fn default_parallel() -> usize {
    1
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: default_polling_interval_ms(),
            receive_timeout_ms: default_receive_timeout_ms(),
            repeat_auto_sleep_ms: default_repeat_auto_sleep_ms(),
            join_timeout_ms: default_join_timeout_ms(),
            parallel: default_parallel(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub const fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    #[must_use]
    pub const fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    #[must_use]
    pub const fn repeat_auto_sleep(&self) -> Duration {
        Duration::from_millis(self.repeat_auto_sleep_ms)
    }

    #[must_use]
    pub const fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Load engine configuration from `flowtest.config.yaml` in `dir`.
///
/// If the file doesn't exist, returns default configuration.
///
/// # Errors
/// Returns an error if:
/// - The file exists but cannot be read
/// - The YAML is invalid
/// - A value is out of range
pub fn load_config(dir: &Path) -> Result<EngineConfig, ConfigError> {
    let config_path = dir.join(CONFIG_FILE_NAME);

    let config = if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        serde_yml::from_str(&content)?
    } else {
        EngineConfig::default()
    };

    validate_config(&config)?;
    Ok(config)
}

const fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.polling_interval_ms == 0 {
        return Err(ConfigError::ZeroPollingInterval);
    }
    if config.parallel == 0 {
        return Err(ConfigError::ZeroParallelism);
    }
    Ok(())
}

/// Programmatic override options for configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub polling_interval_ms: Option<u64>,
    pub receive_timeout_ms: Option<u64>,
    pub repeat_auto_sleep_ms: Option<u64>,
    pub join_timeout_ms: Option<u64>,
    pub parallel: Option<usize>,
}

/// Apply overrides to a configuration.
///
/// # Errors
/// Returns an error if an overridden value is out of range.
pub fn apply_overrides(
    mut config: EngineConfig,
    overrides: &ConfigOverrides,
) -> Result<EngineConfig, ConfigError> {
    if let Some(v) = overrides.polling_interval_ms {
        config.polling_interval_ms = v;
    }
    if let Some(v) = overrides.receive_timeout_ms {
        config.receive_timeout_ms = v;
    }
    if let Some(v) = overrides.repeat_auto_sleep_ms {
        config.repeat_auto_sleep_ms = v;
    }
    if let Some(v) = overrides.join_timeout_ms {
        config.join_timeout_ms = v;
    }
    if let Some(v) = overrides.parallel {
        config.parallel = v;
    }
    validate_config(&config)?;
    Ok(config)
}

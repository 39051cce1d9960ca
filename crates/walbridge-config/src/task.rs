use serde::Deserialize;

use walbridge_core::settings::{
    DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_QUEUE_SIZE, DEFAULT_POLL_INTERVAL,
    DEFAULT_RETURN_CONTROL_INTERVAL,
};
use walbridge_core::SnapshotMode;

use crate::error::ConfigResult;

/// Raw task configuration as parsed from TOML.
#[derive(Debug, Deserialize)]
pub struct TaskConfig {
    pub source: SourceConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

impl TaskConfig {
    /// Parse a task config from a TOML string.
    pub fn parse(toml_str: &str) -> ConfigResult<Self> {
        let config: TaskConfig = toml::from_str(toml_str)?;
        Ok(config)
    }
}

/// Source identification.
#[derive(Debug, Deserialize)]
pub struct SourceConfig {
    /// Logical server name; offsets are stored under it.
    /// Supports `${VAR}` references.
    pub server_name: String,
}

/// Snapshot configuration.
#[derive(Debug, Default, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default)]
    pub mode: SnapshotMode,
}

/// Queue and polling configuration.
#[derive(Debug, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_return_control_interval_ms")]
    pub return_control_interval_ms: u64,
}

fn default_max_queue_size() -> usize {
    DEFAULT_MAX_QUEUE_SIZE
}

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_return_control_interval_ms() -> u64 {
    DEFAULT_RETURN_CONTROL_INTERVAL.as_millis() as u64
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            max_batch_size: default_max_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            return_control_interval_ms: default_return_control_interval_ms(),
        }
    }
}

/// Resolve environment variables in a string.
/// Supports ${VAR_NAME} syntax; unset variables resolve to "".
/// Substituted values are not scanned again.
pub fn resolve_env(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        let var_name = &rest[start + 2..start + 2 + len];
        result.push_str(&rest[..start]);
        result.push_str(&std::env::var(var_name).unwrap_or_default());
        rest = &rest[start + 2 + len + 1..];
    }

    result.push_str(rest);
    result
}

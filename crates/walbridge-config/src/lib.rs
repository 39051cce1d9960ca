mod error;
mod task;
mod validation;

pub use error::{ConfigError, ConfigResult};
pub use task::{resolve_env, QueueConfig, SnapshotConfig, SourceConfig, TaskConfig};
pub use validation::{to_settings, validate_task};

use std::time::Duration;

use walbridge_core::TaskSettings;

use crate::error::{ConfigError, ConfigResult};
use crate::task::{resolve_env, TaskConfig};

/// Check the structural constraints the task relies on.
pub fn validate_task(config: &TaskConfig) -> ConfigResult<()> {
    if resolve_env(&config.source.server_name).trim().is_empty() {
        return Err(ConfigError::MissingField {
            field: "source.server_name".to_string(),
        });
    }

    let queue = &config.queue;
    for (field, value) in [
        ("queue.max_queue_size", queue.max_queue_size as u64),
        ("queue.max_batch_size", queue.max_batch_size as u64),
        ("queue.poll_interval_ms", queue.poll_interval_ms),
    ] {
        if value == 0 {
            return Err(ConfigError::NotPositive {
                field: field.to_string(),
            });
        }
    }

    if queue.max_queue_size <= queue.max_batch_size {
        return Err(ConfigError::QueueNotLargerThanBatch {
            queue: queue.max_queue_size,
            batch: queue.max_batch_size,
        });
    }

    Ok(())
}

/// Validate and convert into runtime settings.
pub fn to_settings(config: &TaskConfig) -> ConfigResult<TaskSettings> {
    validate_task(config)?;

    let mut settings = TaskSettings::new(resolve_env(&config.source.server_name));
    settings.snapshot_mode = config.snapshot.mode;
    settings.max_queue_size = config.queue.max_queue_size;
    settings.max_batch_size = config.queue.max_batch_size;
    settings.poll_interval = Duration::from_millis(config.queue.poll_interval_ms);
    settings.return_control_interval =
        Duration::from_millis(config.queue.return_control_interval_ms);
    Ok(settings)
}

use thiserror::Error;

/// Errors that can occur when parsing or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("{field} must be greater than zero")]
    NotPositive { field: String },

    #[error("max_queue_size ({queue}) must be larger than max_batch_size ({batch})")]
    QueueNotLargerThanBatch { queue: usize, batch: usize },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl From<ConfigError> for walbridge_core::Error {
    fn from(e: ConfigError) -> Self {
        walbridge_core::Error::Configuration(e.to_string())
    }
}

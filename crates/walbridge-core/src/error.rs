use thiserror::Error;

/// Errors that can occur in walbridge-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid settings, or a recovered state that contradicts them.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// Raised asynchronously by a producer after it started emitting.
    #[error("backend failure: {0}")]
    Backend(String),

    /// Cooperative cancellation observed while blocked.
    #[error("interrupted while waiting")]
    Interrupted,

    #[error("offset storage error: {0}")]
    OffsetStorage(String),

    #[error("invalid LSN format: {0}")]
    InvalidLsn(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error only signals a shutdown in progress.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

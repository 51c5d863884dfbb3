//! Worker error types.

use lipsync_media::{ErrorKind, MediaError};
use lipsync_models::ConfigError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Checkpoint not found: {0}")]
    CheckpointMissing(String),

    #[error("Input optimisation failed: {0}")]
    OptimizationFailed(String),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Error category reported in the job outcome.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::Media(e) => e.kind(),
            WorkerError::ConfigError(_) | WorkerError::Config(_) => ErrorKind::Input,
            WorkerError::CheckpointMissing(_) => ErrorKind::Resource,
            WorkerError::OptimizationFailed(_) => ErrorKind::ExternalTool,
            WorkerError::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether running the same job again could succeed without changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Timeout | ErrorKind::ExternalTool)
    }
}

//! Errors reported by container backends.

use thiserror::Error;

/// Result type for capability-interface operations.
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Failure of a backend operation.
///
/// The named variants cover the conditions the harness asserts on; anything
/// else a backend wants to report goes through [`ContainerError::Backend`].
#[derive(Debug, Error)]
pub enum ContainerError {
    /// No container with this name or id exists.
    #[error("container not found: {0}")]
    NotFound(String),

    /// A container with this id already exists.
    #[error("container already exists: {0}")]
    AlreadyExists(String),

    /// The container exists but is not running.
    #[error("container is not running: {0}")]
    NotRunning(String),

    /// The image reference could not be resolved.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Streaming input or output failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-defined failure.
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ContainerError {
    /// Wrap an arbitrary backend error.
    pub fn backend<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Backend(err.into())
    }

    /// True when the error reports an id collision on `run`.
    pub fn is_collision(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

//! Engine error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::status::Status;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur during container and process operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Container was not found.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Process was not found inside its container.
    #[error("process not found: {0}")]
    ProcessNotFound(String),

    /// Container state already exists for this id.
    #[error("container already exists: {0}")]
    ContainerExists(String),

    /// The operation requires the process to have exited.
    #[error("process has not exited: {0}")]
    ProcessNotExited(String),

    /// The operation requires the process to have been started.
    #[error("process has not started: {0}")]
    ProcessNotStarted(String),

    /// The container has no registered init process yet.
    #[error("container {0} has no init process")]
    NoInitProcess(String),

    /// The requested lifecycle transition is not legal.
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: Status, to: Status },

    /// The bundle directory is missing or malformed.
    #[error("invalid bundle {}: {message}", .path.display())]
    InvalidBundle { path: PathBuf, message: String },

    /// Spawning the underlying OS process failed.
    #[error("failed to spawn process {id}: {source}")]
    Spawn {
        id: String,
        #[source]
        source: std::io::Error,
    },

    /// Delivering a signal through kill(2) failed.
    #[error("sending signal {signal} to pid {pid}: {source}")]
    Kill {
        pid: u32,
        signal: i32,
        #[source]
        source: std::io::Error,
    },

    /// A filesystem operation on managed state failed.
    #[error("{op} {}: {source}", .path.display())]
    Fs {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    /// Wrap a filesystem error with the operation that failed and its path.
    pub(crate) fn fs(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Fs {
            op,
            path: path.into(),
            source,
        }
    }
}

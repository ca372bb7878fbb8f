//! Error types for the execution engine layer.

use crate::domain::snapshot::SnapshotError;

/// Errors produced while evaluating or publishing a container.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An exec step exited non-zero. `index` is the position of the failing
    /// command among the container's execs.
    #[error("exec #{index} `{}` exited with code {exit_code}", .command.join(" "))]
    ExecFailed {
        index: usize,
        command: Vec<String>,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("path {path} is not inside any mount or directory of the container")]
    PathNotMounted { path: String },

    #[error("image tag already exists: {address}")]
    TagExists { address: String },

    #[error("publish to {address} failed: {reason}")]
    PublishFailed { address: String, reason: String },

    #[error("invalid container: {0}")]
    InvalidContainer(String),

    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

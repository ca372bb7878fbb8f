//! Error types for the agent layer.

use std::path::PathBuf;

use super::binding::BindingKind;
use crate::domain::snapshot::SnapshotError;
use crate::engine::EngineError;

/// Errors produced by agent environments, workspaces and agent backends.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("binding `{name}` is not declared")]
    UnknownBinding { name: String },

    #[error("output `{name}` was never populated")]
    MissingOutput { name: String },

    #[error("binding `{name}` holds a {actual}, expected a {expected}")]
    KindMismatch {
        name: String,
        expected: BindingKind,
        actual: BindingKind,
    },

    #[error("input `{name}` cannot be rebound")]
    InputImmutable { name: String },

    #[error("workspace tool `{tool}` failed: {reason}")]
    Tool { tool: String, reason: String },

    #[error("agent process exited with {}: {stderr}", .exit_code.map_or("a signal".to_string(), |c| format!("code {c}")))]
    Process {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("agent timed out after {limit_secs}s")]
    Timeout { limit_secs: u64 },

    #[error("failed to load prompt {path:?}: {reason}")]
    Prompt { path: PathBuf, reason: String },

    #[error("invalid agent configuration: {0}")]
    InvalidConfig(String),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for agent operations.
pub type AgentResult<T> = std::result::Result<T, AgentError>;

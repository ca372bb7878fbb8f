//! Domain-level error taxonomy for Dockhand.
//!
//! Every failure in the orchestration core is a hard stop. Command and
//! validation failures keep the captured output of the failing command;
//! remote failures keep the tracker's message.

use crate::agent::AgentError;
use crate::engine::EngineError;
use crate::tracker::TrackerError;

use super::snapshot::SnapshotError;

/// Dockhand domain errors.
#[derive(Debug, thiserror::Error)]
pub enum DockhandError {
    #[error(
        "environment setup failed: `{command}` exited with code {exit_code}{}",
        render_output(.stdout, .stderr)
    )]
    EnvironmentSetup {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error(
        "command `{command}` exited with code {exit_code}{}",
        render_output(.stdout, .stderr)
    )]
    CommandFailed {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error(
        "validation failed after {attempts} attempt(s): {reason}{}",
        render_output(.stdout, .stderr)
    )]
    ValidationFailed {
        attempts: u32,
        reason: String,
        stdout: String,
        stderr: String,
    },

    #[error("remote api error: {0}")]
    Remote(#[from] TrackerError),

    #[error("agent did not populate output `{output}`")]
    AgentIncomplete { output: String },

    #[error("agent error: {0}")]
    Agent(AgentError),

    #[error("engine error: {0}")]
    Engine(EngineError),

    #[error("{operation} timed out after {limit_secs}s")]
    Timeout { operation: String, limit_secs: u64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DockhandError {
    /// Captured stdout of the failing command, when there was one.
    pub fn stdout(&self) -> Option<&str> {
        match self {
            DockhandError::EnvironmentSetup { stdout, .. }
            | DockhandError::CommandFailed { stdout, .. }
            | DockhandError::ValidationFailed { stdout, .. } => Some(stdout),
            _ => None,
        }
    }

    /// Captured stderr of the failing command, when there was one.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            DockhandError::EnvironmentSetup { stderr, .. }
            | DockhandError::CommandFailed { stderr, .. }
            | DockhandError::ValidationFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

impl From<EngineError> for DockhandError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::ExecFailed {
                command,
                exit_code,
                stdout,
                stderr,
                ..
            } => DockhandError::CommandFailed {
                command: command.join(" "),
                exit_code,
                stdout,
                stderr,
            },
            other => DockhandError::Engine(other),
        }
    }
}

impl From<AgentError> for DockhandError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::MissingOutput { name } => DockhandError::AgentIncomplete { output: name },
            other => DockhandError::Agent(other),
        }
    }
}

fn render_output(stdout: &str, stderr: &str) -> String {
    let mut out = String::new();
    if !stdout.trim().is_empty() {
        out.push_str("\n--- stdout ---\n");
        out.push_str(stdout.trim_end());
    }
    if !stderr.trim().is_empty() {
        out.push_str("\n--- stderr ---\n");
        out.push_str(stderr.trim_end());
    }
    out
}

/// Result type for Dockhand domain operations.
pub type Result<T> = std::result::Result<T, DockhandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failure_carries_output() {
        let err = DockhandError::CommandFailed {
            command: "npm run test:unit run".to_string(),
            exit_code: 1,
            stdout: "FAIL src/header.spec.ts".to_string(),
            stderr: String::new(),
        };
        let msg = err.to_string();
        assert!(msg.contains("npm run test:unit run"));
        assert!(msg.contains("FAIL src/header.spec.ts"));
        assert!(!msg.contains("--- stderr ---"));
        assert_eq!(err.stdout(), Some("FAIL src/header.spec.ts"));
    }

    #[test]
    fn exec_failure_maps_to_command_failure() {
        let err: DockhandError = EngineError::ExecFailed {
            index: 2,
            command: vec!["npm".into(), "run".into(), "build".into()],
            exit_code: 2,
            stdout: String::new(),
            stderr: "vite: not found".into(),
        }
        .into();
        match err {
            DockhandError::CommandFailed {
                command, exit_code, ..
            } => {
                assert_eq!(command, "npm run build");
                assert_eq!(exit_code, 2);
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[test]
    fn missing_output_maps_to_agent_incomplete() {
        let err: DockhandError = AgentError::MissingOutput {
            name: "completed".into(),
        }
        .into();
        assert!(matches!(err, DockhandError::AgentIncomplete { ref output } if output == "completed"));
    }
}

//! Validation gate: a snapshot is accepted only when its unit tests pass.

use dockhand_core::{DockhandError, Result, SourceSnapshot};
use serde::{Deserialize, Serialize};

use crate::pipeline::Pipeline;

/// Outcome of running the unit tests against a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateVerdict {
    /// Whether the tests passed.
    pub passed: bool,

    /// Hex digest of the snapshot that was checked.
    pub snapshot: String,

    /// Captured test stdout.
    pub stdout: String,

    /// Captured test stderr (failures only).
    pub stderr: String,

    /// Summary message.
    pub message: String,
}

impl GateVerdict {
    /// Convert a failed verdict into a validation error.
    pub fn into_result(self, attempts: u32) -> Result<String> {
        if self.passed {
            Ok(self.stdout)
        } else {
            Err(DockhandError::ValidationFailed {
                attempts,
                reason: self.message,
                stdout: self.stdout,
                stderr: self.stderr,
            })
        }
    }
}

/// Runs the pipeline's test operation as an acceptance check.
pub struct ValidationGate<'a> {
    pipeline: &'a Pipeline,
}

impl<'a> ValidationGate<'a> {
    pub fn new(pipeline: &'a Pipeline) -> Self {
        Self { pipeline }
    }

    /// Test `snapshot`.
    ///
    /// Failing tests and failing installs yield a failed verdict; anything
    /// else (engine outage, timeout) is returned as an error.
    pub async fn evaluate(&self, snapshot: &SourceSnapshot) -> Result<GateVerdict> {
        let digest = snapshot.digest().to_hex();
        match self.pipeline.test(snapshot).await {
            Ok(stdout) => Ok(GateVerdict {
                passed: true,
                snapshot: digest,
                stdout,
                stderr: String::new(),
                message: "unit tests passed".to_string(),
            }),
            Err(DockhandError::CommandFailed {
                command,
                exit_code,
                stdout,
                stderr,
            }) => Ok(GateVerdict {
                passed: false,
                snapshot: digest,
                stdout,
                stderr,
                message: format!("`{command}` exited with code {exit_code}"),
            }),
            Err(DockhandError::EnvironmentSetup {
                command,
                exit_code,
                stdout,
                stderr,
            }) => Ok(GateVerdict {
                passed: false,
                snapshot: digest,
                stdout,
                stderr,
                message: format!("dependency install `{command}` exited with code {exit_code}"),
            }),
            Err(other) => Err(other),
        }
    }
}

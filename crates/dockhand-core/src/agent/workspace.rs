//! Workspace capability: a source snapshot plus the tools an agent may use
//! on it.
//!
//! A workspace is the only mutable thing an agent can affect. Every tool call
//! replaces the current snapshot with a new one; the snapshots themselves are
//! never modified. Clones share state, so the handle passed into an agent
//! environment and the one bound as an output observe the same edits.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::error::{AgentError, AgentResult};
use crate::domain::snapshot::SourceSnapshot;
use crate::engine::{Container, Engine, EngineError};

/// Result of running a command inside a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

struct Inner {
    engine: Arc<dyn Engine>,
    base: Container,
    mount_path: String,
    source: RwLock<SourceSnapshot>,
}

/// Shared handle to an editable source tree.
#[derive(Clone)]
pub struct Workspace {
    inner: Arc<Inner>,
}

impl Workspace {
    /// Create a workspace over `source`. Commands run in `base` with the
    /// current snapshot mounted at `mount_path`, which is also the working
    /// directory.
    pub fn new(
        engine: Arc<dyn Engine>,
        base: Container,
        mount_path: impl Into<String>,
        source: SourceSnapshot,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                base,
                mount_path: mount_path.into(),
                source: RwLock::new(source),
            }),
        }
    }

    /// Whether two handles refer to the same workspace.
    pub fn same_as(&self, other: &Workspace) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn mount_path(&self) -> &str {
        &self.inner.mount_path
    }

    /// The current snapshot.
    pub async fn source(&self) -> SourceSnapshot {
        self.inner.source.read().await.clone()
    }

    /// Replace the current snapshot wholesale.
    pub async fn set_source(&self, source: SourceSnapshot) {
        *self.inner.source.write().await = source;
    }

    pub async fn read_file(&self, path: &str) -> AgentResult<String> {
        let source = self.inner.source.read().await;
        source.read_to_string(path).map_err(|e| AgentError::Tool {
            tool: "read_file".to_string(),
            reason: e.to_string(),
        })
    }

    pub async fn write_file(&self, path: &str, contents: &str) -> AgentResult<()> {
        let mut source = self.inner.source.write().await;
        let next = source
            .with_file(path, contents)
            .map_err(|e| AgentError::Tool {
                tool: "write_file".to_string(),
                reason: e.to_string(),
            })?;
        *source = next;
        Ok(())
    }

    /// Files at or below `path`, relative to the workspace root.
    pub async fn list_files(&self, path: &str) -> AgentResult<Vec<String>> {
        let source = self.inner.source.read().await;
        let sub = source.directory(path).map_err(|e| AgentError::Tool {
            tool: "list_files".to_string(),
            reason: e.to_string(),
        })?;
        let prefix = path.trim_matches('/').trim_start_matches("./");
        Ok(sub
            .paths()
            .map(|p| match prefix {
                "" | "." => p.to_string(),
                _ => format!("{prefix}/{p}"),
            })
            .collect())
    }

    /// Whether commands run with extended privileges by default.
    pub fn is_privileged(&self) -> bool {
        self.inner.base.is_privileged()
    }

    /// Run a command against the current snapshot.
    ///
    /// A zero exit replaces the snapshot with the tree the command left
    /// behind. A non-zero exit is reported in the outcome and leaves the
    /// snapshot untouched.
    pub async fn run(&self, args: &[&str]) -> AgentResult<CommandOutcome> {
        self.exec(args, None, self.is_privileged()).await
    }

    /// Run a command with `input` on its stdin, with or without extended
    /// privileges. Snapshot handling matches [`Workspace::run`].
    pub async fn run_with_input(
        &self,
        args: &[&str],
        input: &str,
        privileged: bool,
    ) -> AgentResult<CommandOutcome> {
        self.exec(args, Some(input), privileged).await
    }

    async fn exec(
        &self,
        args: &[&str],
        input: Option<&str>,
        privileged: bool,
    ) -> AgentResult<CommandOutcome> {
        if args.is_empty() {
            return Err(AgentError::Tool {
                tool: "run".to_string(),
                reason: "empty command".to_string(),
            });
        }
        // Held across the engine call so concurrent tool calls cannot lose edits.
        let mut source = self.inner.source.write().await;
        let container = self
            .inner
            .base
            .clone()
            .with_privileges(privileged)
            .with_mounted_snapshot(&self.inner.mount_path, source.clone())
            .with_workdir(&self.inner.mount_path);
        let container = match input {
            Some(input) => container.with_exec_input(args.iter().copied(), input),
            None => container.with_exec(args.iter().copied()),
        };

        match self
            .inner
            .engine
            .evaluate(&container, Some(&self.inner.mount_path))
            .await
        {
            Ok(eval) => {
                if let Some(captured) = eval.captured {
                    *source = captured;
                }
                Ok(CommandOutcome {
                    exit_code: 0,
                    stdout: eval.stdout,
                    stderr: eval.stderr,
                })
            }
            Err(EngineError::ExecFailed {
                exit_code,
                stdout,
                stderr,
                ..
            }) => {
                tracing::debug!(command = %args.join(" "), exit_code, "workspace command failed");
                Ok(CommandOutcome {
                    exit_code,
                    stdout,
                    stderr,
                })
            }
            Err(other) => Err(other.into()),
        }
    }
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("engine", &self.inner.engine.name())
            .field("image", &self.inner.base.image())
            .field("mount_path", &self.inner.mount_path)
            .finish()
    }
}

//! Agent backed by an external command.
//!
//! The command runs inside the workspace's container through
//! [`Workspace::run_with_input`](dockhand_core::agent::Workspace::run_with_input),
//! with the rendered prompt on stdin and the environment's privilege level.
//! Whatever tree it leaves behind becomes the workspace's new snapshot.

use std::time::Duration;

use async_trait::async_trait;
use dockhand_core::agent::{Agent, AgentEnv, AgentError, AgentResult, PromptDocument};
use dockhand_core::config::AgentConfig;
use tracing::debug;

/// Runs a coding agent command in its workspace.
#[derive(Debug, Clone)]
pub struct ProcessAgent {
    command: Vec<String>,
    timeout: Option<Duration>,
}

impl ProcessAgent {
    pub fn new(command: Vec<String>) -> AgentResult<Self> {
        if command.is_empty() || command[0].trim().is_empty() {
            return Err(AgentError::InvalidConfig(
                "agent command must not be empty".to_string(),
            ));
        }
        Ok(Self {
            command,
            timeout: None,
        })
    }

    pub fn from_config(config: &AgentConfig) -> AgentResult<Self> {
        Self::new(config.command.clone())
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Agent for ProcessAgent {
    fn name(&self) -> &str {
        &self.command[0]
    }

    async fn run(&self, mut env: AgentEnv, prompt: &PromptDocument) -> AgentResult<AgentEnv> {
        let workspace = env
            .primary_workspace()
            .cloned()
            .ok_or_else(|| AgentError::InvalidConfig("no workspace input".to_string()))?;
        let args: Vec<&str> = self.command.iter().map(String::as_str).collect();
        let rendered = prompt.render(&env);

        let run = workspace.run_with_input(&args, &rendered, env.is_privileged());
        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| AgentError::Timeout {
                    limit_secs: limit.as_secs(),
                })??,
            None => run.await?,
        };

        debug!(
            exit_code = outcome.exit_code,
            stdout_bytes = outcome.stdout.len(),
            "agent command exited"
        );
        if !outcome.success() {
            return Err(AgentError::Process {
                exit_code: Some(outcome.exit_code),
                stderr: outcome.stderr,
            });
        }
        env.bind_workspace_outputs(&workspace);
        Ok(env)
    }
}

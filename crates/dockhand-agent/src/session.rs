//! Agent sessions: hand an assignment and a workspace to a coding agent and
//! accept its result only after the unit tests pass.

use std::sync::Arc;
use std::time::Duration;

use dockhand_ci::{GateVerdict, Pipeline, ValidationGate};
use dockhand_core::agent::{Agent, AgentEnv, PromptDocument};
use dockhand_core::deadline::with_timeout;
use dockhand_core::obs::{self, OperationSpan};
use dockhand_core::{DockhandError, Result, SourceSnapshot};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Name of the string input carrying the assignment.
pub const ASSIGNMENT_INPUT: &str = "assignment";
/// Name of the workspace input the agent edits.
pub const WORKSPACE_INPUT: &str = "workspace";
/// Name of the workspace output holding the finished work.
pub const COMPLETED_OUTPUT: &str = "completed";

/// Bundled instructions for feature development.
pub const DEVELOP_PROMPT: &str = include_str!("../prompts/develop_prompt.md");
pub const DEVELOP_PROMPT_NAME: &str = "develop_prompt.md";

/// How many times a failing validation may be handed back to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationPolicy {
    /// Total agent runs allowed; `1` fails on the first red test run.
    pub max_attempts: u32,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self { max_attempts: 1 }
    }
}

/// Where the session's prompt comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSource {
    Bundled,
    File(std::path::PathBuf),
    Inline(PromptDocument),
}

/// Drives one agent against a workspace and validates the outcome.
#[derive(Clone)]
pub struct AgentSession {
    agent: Arc<dyn Agent>,
    pipeline: Pipeline,
    prompt: PromptSource,
    dependency_dir: String,
    policy: ValidationPolicy,
    timeout: Option<Duration>,
}

impl AgentSession {
    /// A session using `pipeline`'s environment and configuration.
    pub fn new(agent: Arc<dyn Agent>, pipeline: Pipeline) -> Self {
        let agent_config = &pipeline.config().agent;
        let prompt = match &agent_config.prompt_path {
            Some(path) => PromptSource::File(path.clone()),
            None => PromptSource::Bundled,
        };
        let dependency_dir = agent_config.dependency_dir.clone();
        let policy = ValidationPolicy {
            max_attempts: agent_config.max_validation_attempts.max(1),
        };
        let timeout = pipeline.timeout();
        Self {
            agent,
            pipeline,
            prompt,
            dependency_dir,
            policy,
            timeout,
        }
    }

    pub fn with_prompt(mut self, prompt: PromptSource) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_policy(mut self, policy: ValidationPolicy) -> Self {
        self.policy = ValidationPolicy {
            max_attempts: policy.max_attempts.max(1),
        };
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    async fn load_prompt(&self) -> Result<PromptDocument> {
        match &self.prompt {
            PromptSource::Bundled => Ok(PromptDocument::new(DEVELOP_PROMPT_NAME, DEVELOP_PROMPT)),
            PromptSource::File(path) => Ok(PromptDocument::load(path).await?),
            PromptSource::Inline(doc) => Ok(doc.clone()),
        }
    }

    /// Complete `assignment` against `source` and return the validated
    /// snapshot, without the dependency directory.
    pub async fn develop(&self, assignment: &str, source: &SourceSnapshot) -> Result<SourceSnapshot> {
        if assignment.trim().is_empty() {
            return Err(DockhandError::InvalidInput(
                "assignment must not be empty".to_string(),
            ));
        }
        let op = OperationSpan::new("develop");
        let result = op
            .run(with_timeout("develop", self.timeout, self.run_attempts(assignment, source)))
            .await;
        if let Err(e) = &result {
            obs::emit_operation_failed("develop", e);
        }
        result
    }

    async fn run_attempts(&self, assignment: &str, source: &SourceSnapshot) -> Result<SourceSnapshot> {
        let prompt = self.load_prompt().await?;
        let mut task = assignment.to_string();
        let mut current = source.clone();
        let mut attempt = 1;

        loop {
            obs::emit_session_started(self.agent.name(), task.len(), attempt);
            let produced = self.run_agent(&task, &current, &prompt).await?;
            let cleaned = strip_dependencies(&produced, &self.dependency_dir)?;

            let verdict = ValidationGate::new(&self.pipeline).evaluate(&cleaned).await?;
            obs::emit_session_validated(&verdict.snapshot, attempt, verdict.passed);
            if verdict.passed {
                info!(attempt, digest = %cleaned.digest().short(), "assignment validated");
                return Ok(cleaned);
            }
            if attempt >= self.policy.max_attempts {
                return verdict.into_result(attempt).map(|_| cleaned);
            }

            debug!(attempt, "validation failed, handing back to agent");
            task = retry_assignment(assignment, &verdict);
            current = cleaned;
            attempt += 1;
        }
    }

    async fn run_agent(
        &self,
        task: &str,
        source: &SourceSnapshot,
        prompt: &PromptDocument,
    ) -> Result<SourceSnapshot> {
        let workspace = self.pipeline.environment().workspace(source.clone(), true);
        let env = AgentEnv::new()
            .privileged(true)
            .with_string_input(ASSIGNMENT_INPUT, task, "the assignment to complete")
            .with_workspace_input(
                WORKSPACE_INPUT,
                workspace,
                "the workspace with tools to edit code",
            )
            .with_workspace_output(
                COMPLETED_OUTPUT,
                "the workspace with the completed assignment",
            );

        let env = self.agent.run(env, prompt).await?;
        let completed = env.output(COMPLETED_OUTPUT)?.as_workspace()?;
        Ok(completed.source().await)
    }
}

/// Remove the dependency directory from `snapshot`. Idempotent.
pub fn strip_dependencies(snapshot: &SourceSnapshot, dependency_dir: &str) -> Result<SourceSnapshot> {
    Ok(snapshot.without_directory(dependency_dir)?)
}

/// The assignment handed back after a failed validation.
fn retry_assignment(original: &str, verdict: &GateVerdict) -> String {
    let mut text = format!(
        "{original}\n\nYour previous attempt was rejected: {}.\nFix the failing tests.",
        verdict.message
    );
    for (label, output) in [("stdout", &verdict.stdout), ("stderr", &verdict.stderr)] {
        if !output.trim().is_empty() {
            text.push_str(&format!("\n\nTest {label}:\n{}", output.trim_end()));
        }
    }
    text
}

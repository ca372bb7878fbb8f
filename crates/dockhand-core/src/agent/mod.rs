//! Agent interface.
//!
//! An agent receives an [`AgentEnv`] with populated inputs and declared
//! outputs plus a [`PromptDocument`], drives the workspace tools, and returns
//! the environment with its outputs bound. Scripted, process-backed and
//! model-backed agents are interchangeable behind the [`Agent`] trait.

pub mod binding;
pub mod error;
pub mod prompt;
pub mod workspace;

use async_trait::async_trait;

pub use binding::{AgentEnv, Binding, BindingKind, BoundValue, Slot};
pub use error::{AgentError, AgentResult};
pub use prompt::PromptDocument;
pub use workspace::{CommandOutcome, Workspace};

/// A coding agent.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Work through the prompt and return `env` with its outputs bound.
    ///
    /// Returning an environment with unbound outputs is allowed; callers
    /// surface that as an incomplete run.
    async fn run(&self, env: AgentEnv, prompt: &PromptDocument) -> AgentResult<AgentEnv>;
}

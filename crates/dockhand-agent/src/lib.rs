//! Dockhand Agent - coding-agent sessions gated by unit tests
//!
//! Provides:
//! - [`AgentSession`]: hand an assignment and a workspace to an agent, strip
//!   dependencies from its result and accept it only when the tests pass
//! - [`IssueToChangeWorkflow`]: develop a tracker issue into a pull request
//! - [`ProcessAgent`]: an agent backed by an external command
//! - [`Dockhand`]: the facade exposing every operation

pub mod app;
pub mod process_agent;
pub mod session;
pub mod workflow;

pub use app::{Dockhand, TrackerFactory};
pub use process_agent::ProcessAgent;
pub use session::{
    strip_dependencies, AgentSession, PromptSource, ValidationPolicy, ASSIGNMENT_INPUT,
    COMPLETED_OUTPUT, WORKSPACE_INPUT,
};
pub use workflow::{change_request_body, IssueToChangeWorkflow};

//! Structured lifecycle events for pipeline, session and workflow runs.
//!
//! Every top-level operation gets an [`OperationSpan`] carrying a fresh
//! operation id. Events emitted inside the span inherit the id, so one run
//! can be followed through the logs even when operations interleave.

use tracing::{info, warn, Instrument, Span};
use uuid::Uuid;

/// A span tagged with an operation name and a unique operation id.
#[derive(Debug, Clone)]
pub struct OperationSpan {
    id: String,
    span: Span,
}

impl OperationSpan {
    pub fn new(operation: &'static str) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        let span = tracing::info_span!("dockhand.op", operation, op_id = %id);
        Self { id, span }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run `fut` inside the span.
    pub fn run<F: std::future::Future>(&self, fut: F) -> tracing::instrument::Instrumented<F> {
        fut.instrument(self.span.clone())
    }
}

/// Emit event: a pipeline step is about to run.
pub fn emit_pipeline_step(step: &str, command: &[String]) {
    info!(event = "pipeline.step", step = %step, command = %command.join(" "));
}

/// Emit event: a pipeline operation finished.
pub fn emit_pipeline_finished(operation: &str, duration_ms: u64, success: bool) {
    info!(
        event = "pipeline.finished",
        operation = %operation,
        duration_ms = duration_ms,
        success = success,
    );
}

/// Emit event: an image was pushed.
pub fn emit_pipeline_published(address: &str) {
    info!(event = "pipeline.published", address = %address);
}

/// Emit event: an agent session started.
pub fn emit_session_started(agent: &str, assignment_len: usize, attempt: u32) {
    info!(
        event = "session.started",
        agent = %agent,
        assignment_len = assignment_len,
        attempt = attempt,
    );
}

/// Emit event: validation of the agent's result finished.
pub fn emit_session_validated(snapshot: &str, attempt: u32, passed: bool) {
    if passed {
        info!(event = "session.validated", snapshot = %snapshot, attempt = attempt, passed = true);
    } else {
        warn!(event = "session.validated", snapshot = %snapshot, attempt = attempt, passed = false);
    }
}

/// Emit event: an issue was fetched for development.
pub fn emit_issue_fetched(repo: &str, number: u64, title: &str) {
    info!(event = "workflow.issue_fetched", repo = %repo, number = number, title = %title);
}

/// Emit event: a change request was opened.
pub fn emit_change_request_opened(repo: &str, issue: u64, url: &str) {
    info!(
        event = "workflow.change_request_opened",
        repo = %repo,
        issue = issue,
        url = %url,
    );
}

/// Emit event: an operation failed.
pub fn emit_operation_failed(operation: &str, error: &dyn std::fmt::Display) {
    warn!(event = "operation.failed", operation = %operation, error = %error);
}

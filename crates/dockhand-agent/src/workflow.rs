//! Issue-to-change workflow: turn a tracker issue into a validated pull
//! request.

use std::sync::Arc;
use std::time::Duration;

use dockhand_core::config::TrackerConfig;
use dockhand_core::deadline::with_timeout;
use dockhand_core::obs::{self, OperationSpan};
use dockhand_core::tracker::{ChangeRequest, Issue, RepoRef, Tracker};
use dockhand_core::{DockhandError, Result, SourceSnapshot};
use tracing::{debug, info};

use crate::session::AgentSession;

/// Fetches an issue, develops it with an [`AgentSession`] and opens a pull
/// request with the result.
#[derive(Clone)]
pub struct IssueToChangeWorkflow {
    tracker: Arc<dyn Tracker>,
    session: AgentSession,
    config: TrackerConfig,
    timeout: Option<Duration>,
}

impl IssueToChangeWorkflow {
    pub fn new(tracker: Arc<dyn Tracker>, session: AgentSession, config: TrackerConfig) -> Self {
        Self {
            tracker,
            session,
            config,
            timeout: None,
        }
    }

    /// Bound the whole workflow, tracker calls included.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn session(&self) -> &AgentSession {
        &self.session
    }

    /// Develop issue `issue_id` of `repo` against `source` and return the
    /// URL of the opened pull request.
    ///
    /// Nothing is submitted unless the developed snapshot passes validation.
    pub async fn develop_issue(
        &self,
        issue_id: u64,
        repo: &RepoRef,
        source: &SourceSnapshot,
    ) -> Result<String> {
        let op = OperationSpan::new("develop_issue");
        let result = op
            .run(with_timeout(
                "develop_issue",
                self.timeout,
                self.run(issue_id, repo, source),
            ))
            .await;
        if let Err(e) = &result {
            obs::emit_operation_failed("develop_issue", e);
        }
        result
    }

    async fn run(&self, issue_id: u64, repo: &RepoRef, source: &SourceSnapshot) -> Result<String> {
        let issue = self.tracker.fetch_issue(repo, issue_id).await?;
        obs::emit_issue_fetched(&repo.to_string(), issue.number, &issue.title);
        if issue.body.trim().is_empty() {
            return Err(DockhandError::InvalidInput(format!(
                "issue {repo}#{issue_id} has no description to develop"
            )));
        }

        let developed = self.session.develop(&issue.body, source).await?;

        let head_branch = format!(
            "{}-{}-{}",
            self.config.head_branch_prefix,
            issue.number,
            developed.digest().short()
        );
        debug!(head = %head_branch, base = %self.config.default_branch, "submitting change request");

        let request = ChangeRequest {
            title: issue.title.clone(),
            body: change_request_body(&issue),
            head_branch,
            base_branch: self.config.default_branch.clone(),
            snapshot: developed,
        };
        let submitted = self.tracker.create_change_request(repo, request).await?;

        obs::emit_change_request_opened(&repo.to_string(), issue.number, &submitted.url);
        info!(issue = issue.number, pr = submitted.number, "change request opened");
        Ok(submitted.url)
    }
}

/// Issue body followed by a closing reference to the issue.
pub fn change_request_body(issue: &Issue) -> String {
    format!("{}\n\nCloses {}", issue.body, issue.url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_closes_the_issue() {
        let issue = Issue {
            number: 42,
            title: "Fix header bug".into(),
            body: "Header renders twice on mobile".into(),
            url: "https://github.com/org/app/issues/42".into(),
        };
        assert_eq!(
            change_request_body(&issue),
            "Header renders twice on mobile\n\nCloses https://github.com/org/app/issues/42"
        );
    }
}

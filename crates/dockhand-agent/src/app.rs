//! The Dockhand facade: every externally invocable operation behind one
//! handle.

use std::sync::Arc;

use dockhand_ci::Pipeline;
use dockhand_core::agent::Agent;
use dockhand_core::engine::{Container, Engine};
use dockhand_core::tracker::{
    GithubTracker, RepoRef, Tracker, TrackerCredential, TrackerResult,
};
use dockhand_core::{DockhandConfig, Result, SourceSnapshot};

use crate::session::AgentSession;
use crate::workflow::IssueToChangeWorkflow;

/// Builds a tracker client from a credential.
pub type TrackerFactory =
    Arc<dyn Fn(&TrackerCredential) -> TrackerResult<Arc<dyn Tracker>> + Send + Sync>;

/// Entry point for test, build, publish, develop and develop-issue.
#[derive(Clone)]
pub struct Dockhand {
    pipeline: Pipeline,
    session: AgentSession,
    config: DockhandConfig,
    tracker_factory: TrackerFactory,
}

impl Dockhand {
    pub fn new(engine: Arc<dyn Engine>, agent: Arc<dyn Agent>, config: DockhandConfig) -> Self {
        let pipeline = Pipeline::new(engine, config.clone());
        let session = AgentSession::new(agent, pipeline.clone());
        let api_base = config.tracker.api_base.clone();
        let tracker_factory: TrackerFactory = Arc::new(
            move |credential: &TrackerCredential| -> TrackerResult<Arc<dyn Tracker>> {
                let tracker = GithubTracker::with_api_base(credential.clone(), api_base.clone())?;
                Ok(Arc::new(tracker) as Arc<dyn Tracker>)
            },
        );
        Self {
            pipeline,
            session,
            config,
            tracker_factory,
        }
    }

    /// Replace how tracker clients are created.
    pub fn with_tracker_factory(mut self, factory: TrackerFactory) -> Self {
        self.tracker_factory = factory;
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn session(&self) -> &AgentSession {
        &self.session
    }

    pub fn config(&self) -> &DockhandConfig {
        &self.config
    }

    /// Run the unit tests; returns their stdout.
    pub async fn test(&self, source: &SourceSnapshot) -> Result<String> {
        self.pipeline.test(source).await
    }

    /// Build the serving image without running tests.
    pub async fn build(&self, source: &SourceSnapshot) -> Result<Container> {
        self.pipeline.build(source).await
    }

    /// Test, build and push; returns the published reference.
    pub async fn publish(&self, source: &SourceSnapshot) -> Result<String> {
        self.pipeline.publish(source).await
    }

    /// Complete `assignment` with the agent; returns the validated snapshot.
    pub async fn develop(&self, assignment: &str, source: &SourceSnapshot) -> Result<SourceSnapshot> {
        self.session.develop(assignment, source).await
    }

    /// Develop issue `issue_id` of `repository` and open a pull request.
    /// Returns the pull request URL.
    pub async fn develop_issue(
        &self,
        credential: &TrackerCredential,
        issue_id: u64,
        repository: &str,
        source: &SourceSnapshot,
    ) -> Result<String> {
        let repo = RepoRef::parse(repository)?;
        let tracker = (self.tracker_factory)(credential)?;
        IssueToChangeWorkflow::new(tracker, self.session.clone(), self.config.tracker.clone())
            .with_timeout(self.pipeline.timeout())
            .develop_issue(issue_id, &repo, source)
            .await
    }
}

//! Dockhand Core Library
//!
//! Domain types, error taxonomy and the three collaborator interfaces the
//! orchestration layers are written against: the container [`Engine`], the
//! coding [`Agent`] and the issue [`Tracker`].

pub mod agent;
pub mod config;
pub mod deadline;
pub mod domain;
pub mod engine;
pub mod fakes;
pub mod obs;
pub mod telemetry;
pub mod tracker;

pub use agent::{
    Agent, AgentEnv, AgentError, AgentResult, Binding, BindingKind, CommandOutcome,
    PromptDocument, Workspace,
};

pub use config::{
    AgentConfig, BuildConfig, DockhandConfig, EnvironmentConfig, PublishConfig, TagStrategy,
    TrackerConfig,
};

pub use domain::{DockhandError, Result, SnapshotDigest, SnapshotError, SourceSnapshot};

pub use engine::{CacheVolume, Container, Engine, EngineError, EngineResult, Evaluation};

pub use tracker::{
    ChangeRequest, GithubTracker, Issue, RepoRef, SubmittedChangeRequest, Tracker,
    TrackerCredential, TrackerError, TrackerResult,
};

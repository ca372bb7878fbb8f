//! In-memory fakes for the engine, agent and tracker traits (testing only)
//!
//! Provides `MemoryEngine`, `ScriptedAgent` and `MemoryTracker`, which honour
//! the trait contracts without Docker, a model backend or network access.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use sha2::{Digest, Sha256};

use crate::agent::{Agent, AgentEnv, AgentError, AgentResult, PromptDocument, Workspace};
use crate::domain::snapshot::SourceSnapshot;
use crate::engine::{
    absolute_path, relative_to, Container, ContainerOp, Engine, EngineError, EngineResult,
    Evaluation,
};
use crate::tracker::{
    ChangeRequest, Issue, RepoRef, SubmittedChangeRequest, Tracker, TrackerError, TrackerResult,
};

// ---------------------------------------------------------------------------
// MemoryEngine
// ---------------------------------------------------------------------------

/// What a scripted command sees when it runs.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub image: String,
    pub command: Vec<String>,
    /// Bytes written to the command's stdin.
    pub input: Option<String>,
    pub workdir: String,
    /// Snapshot mounted at or above the working directory, if any.
    pub source: Option<SourceSnapshot>,
    /// Working directory relative to that mount.
    pub relative_workdir: String,
}

/// What a scripted command does.
#[derive(Debug, Clone, Default)]
pub struct ScriptedExec {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Replacement for the mounted snapshot after the command ran.
    pub source: Option<SourceSnapshot>,
}

impl ScriptedExec {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn fail(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            source: None,
        }
    }
}

type Mount = (String, SourceSnapshot);

type ExecHandler = Arc<dyn Fn(&ExecContext) -> ScriptedExec + Send + Sync>;

/// An exec the engine ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRecord {
    pub image: String,
    pub command: Vec<String>,
    pub workdir: String,
    pub privileged: bool,
}

/// An image the engine published.
#[derive(Debug, Clone)]
pub struct PublishedImage {
    pub address: String,
    pub reference: String,
    pub image: String,
    pub exposed_ports: Vec<u16>,
    /// Directory and mount contents by absolute path.
    pub directories: Vec<Mount>,
}

#[derive(Default)]
struct EngineState {
    executed: Vec<ExecRecord>,
    cache_keys: Vec<String>,
    published: Vec<PublishedImage>,
    existing: HashSet<String>,
}

/// In-memory engine. Commands without a handler succeed with no output and
/// leave the filesystem unchanged.
#[derive(Default)]
pub struct MemoryEngine {
    handlers: HashMap<Vec<String>, ExecHandler>,
    publish_error: Option<String>,
    state: Mutex<EngineState>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a command by its exact argv.
    pub fn on_exec<I, S, F>(mut self, command: I, handler: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&ExecContext) -> ScriptedExec + Send + Sync + 'static,
    {
        let key = command.into_iter().map(Into::into).collect();
        self.handlers.insert(key, Arc::new(handler));
        self
    }

    /// Script a command with a fixed result.
    pub fn on_exec_result<I, S>(self, command: I, result: ScriptedExec) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.on_exec(command, move |_| result.clone())
    }

    /// Treat `address` as already present in the registry.
    pub fn with_existing_tag(self, address: impl Into<String>) -> Self {
        self.state.lock().unwrap().existing.insert(address.into());
        self
    }

    /// Make every publish fail with `reason`.
    pub fn failing_publish(mut self, reason: impl Into<String>) -> Self {
        self.publish_error = Some(reason.into());
        self
    }

    pub fn executed(&self) -> Vec<ExecRecord> {
        self.state.lock().unwrap().executed.clone()
    }

    /// Commands run so far, as space-joined strings.
    pub fn executed_commands(&self) -> Vec<String> {
        self.executed().iter().map(|r| r.command.join(" ")).collect()
    }

    pub fn cache_keys_used(&self) -> Vec<String> {
        self.state.lock().unwrap().cache_keys.clone()
    }

    pub fn published(&self) -> Vec<PublishedImage> {
        self.state.lock().unwrap().published.clone()
    }

    fn run(&self, container: &Container) -> EngineResult<(Vec<Mount>, String, Evaluation)> {
        let mut mounts: Vec<Mount> = Vec::new();
        let mut workdir = "/".to_string();
        let mut last = Evaluation::default();
        let mut exec_index = 0;

        {
            let mut state = self.state.lock().unwrap();
            for volume in container.cache_volumes() {
                state.cache_keys.push(volume.key().to_string());
            }
        }

        for op in container.ops() {
            match op {
                ContainerOp::MountSnapshot { path, snapshot }
                | ContainerOp::Directory { path, snapshot } => {
                    mounts.push((path.clone(), snapshot.clone()));
                }
                ContainerOp::Workdir(path) => workdir = path.clone(),
                ContainerOp::MountCache { .. } | ContainerOp::ExposePort(_) => {}
                ContainerOp::Exec {
                    args: command,
                    input,
                } => {
                    let located = locate(&mounts, &workdir);
                    let ctx = ExecContext {
                        image: container.image().to_string(),
                        command: command.clone(),
                        input: input.clone(),
                        workdir: workdir.clone(),
                        source: located.as_ref().map(|(i, _)| mounts[*i].1.clone()),
                        relative_workdir: located
                            .as_ref()
                            .map(|(_, r)| r.clone())
                            .unwrap_or_default(),
                    };
                    self.state.lock().unwrap().executed.push(ExecRecord {
                        image: ctx.image.clone(),
                        command: command.clone(),
                        workdir: workdir.clone(),
                        privileged: container.is_privileged(),
                    });

                    let result = match self.handlers.get(command) {
                        Some(handler) => handler(&ctx),
                        None => ScriptedExec::default(),
                    };
                    if result.exit_code != 0 {
                        return Err(EngineError::ExecFailed {
                            index: exec_index,
                            command: command.clone(),
                            exit_code: result.exit_code,
                            stdout: result.stdout,
                            stderr: result.stderr,
                        });
                    }
                    if let (Some(next), Some((i, _))) = (result.source, located) {
                        mounts[i].1 = next;
                    }
                    last.stdout = result.stdout;
                    last.stderr = result.stderr;
                    exec_index += 1;
                }
            }
        }
        Ok((mounts, workdir, last))
    }
}

fn locate(mounts: &[Mount], target: &str) -> Option<(usize, String)> {
    let mut best: Option<(usize, String)> = None;
    for (i, (mount, _)) in mounts.iter().enumerate() {
        if let Some(rel) = relative_to(mount, target) {
            let deeper = best
                .as_ref()
                .map_or(true, |(b, _)| mount.len() >= mounts[*b].0.len());
            if deeper {
                best = Some((i, rel));
            }
        }
    }
    best
}

#[async_trait]
impl Engine for MemoryEngine {
    fn name(&self) -> &str {
        "memory"
    }

    async fn evaluate(
        &self,
        container: &Container,
        capture: Option<&str>,
    ) -> EngineResult<Evaluation> {
        let (mounts, workdir, mut eval) = self.run(container)?;
        if let Some(path) = capture {
            let target = absolute_path(&workdir, path);
            let (i, rel) = locate(&mounts, &target).ok_or_else(|| EngineError::PathNotMounted {
                path: target.clone(),
            })?;
            eval.captured = Some(mounts[i].1.directory(&rel)?);
        }
        Ok(eval)
    }

    async fn publish(&self, container: &Container, address: &str) -> EngineResult<String> {
        if let Some(reason) = &self.publish_error {
            return Err(EngineError::PublishFailed {
                address: address.to_string(),
                reason: reason.clone(),
            });
        }
        let (mounts, _, _) = self.run(container)?;

        let mut state = self.state.lock().unwrap();
        if !state.existing.insert(address.to_string()) {
            return Err(EngineError::TagExists {
                address: address.to_string(),
            });
        }

        let mut hasher = Sha256::new();
        hasher.update(container.image().as_bytes());
        for (path, snapshot) in &mounts {
            hasher.update(path.as_bytes());
            hasher.update(snapshot.digest().to_hex().as_bytes());
        }
        let reference = format!("{address}@sha256:{}", hex::encode(hasher.finalize()));

        state.published.push(PublishedImage {
            address: address.to_string(),
            reference: reference.clone(),
            image: container.image().to_string(),
            exposed_ports: container.exposed_ports(),
            directories: mounts,
        });
        Ok(reference)
    }
}

// ---------------------------------------------------------------------------
// ScriptedAgent
// ---------------------------------------------------------------------------

/// Work performed by a scripted agent: receives the workspace and the
/// assignment text.
pub type AgentScript =
    Arc<dyn Fn(Workspace, String) -> BoxFuture<'static, AgentResult<()>> + Send + Sync>;

/// Agent that runs a fixed script against the first workspace input, then
/// binds that workspace to every declared workspace output.
pub struct ScriptedAgent {
    script: AgentScript,
    bind_outputs: bool,
    assignments: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(Workspace, String) -> BoxFuture<'static, AgentResult<()>> + Send + Sync + 'static,
    {
        Self {
            script: Arc::new(script),
            bind_outputs: true,
            assignments: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// An agent that writes `files` into the workspace.
    pub fn writing(files: Vec<(String, String)>) -> Self {
        Self::new(move |workspace, _| {
            let files = files.clone();
            async move {
                for (path, contents) in files {
                    workspace.write_file(&path, &contents).await?;
                }
                Ok(())
            }
            .boxed()
        })
    }

    /// An agent that returns without binding its outputs.
    pub fn incomplete() -> Self {
        let mut agent = Self::new(|_, _| async { Ok(()) }.boxed());
        agent.bind_outputs = false;
        agent
    }

    /// Assignments received, in call order.
    pub fn assignments(&self) -> Vec<String> {
        self.assignments.lock().unwrap().clone()
    }

    pub fn runs(&self) -> usize {
        self.assignments.lock().unwrap().len()
    }

    /// Names of the prompts received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(&self, mut env: AgentEnv, prompt: &PromptDocument) -> AgentResult<AgentEnv> {
        let assignment = env.primary_text().unwrap_or_default().to_string();
        let workspace = env
            .primary_workspace()
            .cloned()
            .ok_or_else(|| AgentError::InvalidConfig("no workspace input".to_string()))?;

        self.assignments.lock().unwrap().push(assignment.clone());
        self.prompts.lock().unwrap().push(prompt.name().to_string());

        (self.script)(workspace.clone(), assignment).await?;

        if self.bind_outputs {
            env.bind_workspace_outputs(&workspace);
        }
        Ok(env)
    }
}

// ---------------------------------------------------------------------------
// MemoryTracker
// ---------------------------------------------------------------------------

/// In-memory tracker holding issues and recording submitted change requests.
#[derive(Default)]
pub struct MemoryTracker {
    issues: HashMap<(String, u64), Issue>,
    submit_error: Option<(u16, String)>,
    submitted: Mutex<Vec<(RepoRef, ChangeRequest)>>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an issue to `repo`. The issue URL follows GitHub's layout.
    pub fn with_issue(mut self, repo: &RepoRef, number: u64, title: &str, body: &str) -> Self {
        let issue = Issue {
            number,
            title: title.to_string(),
            body: body.to_string(),
            url: format!("{}/issues/{number}", repo.url()),
        };
        self.issues.insert((repo.to_string(), number), issue);
        self
    }

    /// Make every submission fail with an API error.
    pub fn failing_submit(mut self, status: u16, message: impl Into<String>) -> Self {
        self.submit_error = Some((status, message.into()));
        self
    }

    pub fn submitted(&self) -> Vec<(RepoRef, ChangeRequest)> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tracker for MemoryTracker {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch_issue(&self, repo: &RepoRef, number: u64) -> TrackerResult<Issue> {
        self.issues
            .get(&(repo.to_string(), number))
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(format!("{repo}#{number}")))
    }

    async fn create_change_request(
        &self,
        repo: &RepoRef,
        request: ChangeRequest,
    ) -> TrackerResult<SubmittedChangeRequest> {
        if let Some((status, message)) = &self.submit_error {
            return Err(TrackerError::Api {
                status: *status,
                message: message.clone(),
            });
        }
        let mut submitted = self.submitted.lock().unwrap();
        if submitted
            .iter()
            .any(|(r, c)| r == repo && c.head_branch == request.head_branch)
        {
            return Err(TrackerError::Api {
                status: 422,
                message: format!("branch {} already exists", request.head_branch),
            });
        }
        let number = submitted.len() as u64 + 1;
        submitted.push((repo.clone(), request));
        Ok(SubmittedChangeRequest {
            number,
            url: format!("{}/pull/{number}", repo.url()),
        })
    }
}

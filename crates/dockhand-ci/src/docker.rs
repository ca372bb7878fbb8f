//! Docker-backed execution engine.
//!
//! Evaluation starts one long-lived container per description and runs each
//! exec with `docker exec`, so files written outside the mounts survive from
//! one exec to the next. Snapshots are copied in and captured paths copied
//! out with `docker cp`, so nothing the container writes as root lands on
//! the host. Cache volumes become named Docker volumes.
//!
//! Publishing renders a build context with a generated Dockerfile, builds
//! and pushes it. An address that already resolves in the registry is
//! refused before anything is built.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use dockhand_core::engine::{
    absolute_path, Container, ContainerOp, Engine, EngineError, EngineResult,
    Evaluation,
};
use dockhand_core::SourceSnapshot;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Prefix for the named volumes backing cache keys.
pub const CACHE_VOLUME_PREFIX: &str = "dockhand-cache-";

/// Captured output of one docker CLI call.
#[derive(Debug)]
struct CliOutput {
    status: Option<i32>,
    stdout: String,
    stderr: String,
}

impl CliOutput {
    fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Engine that shells out to the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    binary: String,
}

impl Default for DockerEngine {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }
}

impl DockerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different CLI binary (e.g. `podman`).
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Check that the daemon answers.
    pub async fn ping(&self) -> EngineResult<()> {
        let out = self.cli(&["version", "--format", "{{.Server.Version}}"]).await?;
        if out.success() {
            debug!(server = %out.stdout.trim(), "docker daemon reachable");
            Ok(())
        } else {
            Err(EngineError::Unavailable(out.stderr.trim().to_string()))
        }
    }

    async fn cli<S: AsRef<str>>(&self, args: &[S]) -> EngineResult<CliOutput> {
        self.cli_with_input(args, None).await
    }

    async fn cli_with_input<S: AsRef<str>>(
        &self,
        args: &[S],
        input: Option<&str>,
    ) -> EngineResult<CliOutput> {
        let mut command = Command::new(&self.binary);
        command.args(args.iter().map(AsRef::as_ref));
        let output = output_with_input(command, input)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    EngineError::Unavailable(format!("`{}` not found on PATH", self.binary))
                }
                _ => EngineError::Io(e),
            })?;
        Ok(CliOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn cli_ok<S: AsRef<str>>(&self, args: &[S]) -> EngineResult<CliOutput> {
        let out = self.cli(args).await?;
        if out.success() {
            Ok(out)
        } else {
            let joined: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
            Err(EngineError::Unavailable(format!(
                "`{} {}` failed: {}",
                self.binary,
                joined.join(" "),
                out.stderr.trim()
            )))
        }
    }

    async fn run_execs(
        &self,
        container: &Container,
        plan: &RunPlan,
        id: &str,
    ) -> EngineResult<Evaluation> {
        let mut eval = Evaluation::default();
        for (index, step) in plan.execs.iter().enumerate() {
            let mut args = vec!["exec".to_string(), "-w".to_string(), step.workdir.clone()];
            if step.input.is_some() {
                args.push("-i".to_string());
            }
            if container.is_privileged() {
                args.push("--privileged".to_string());
            }
            args.push(id.to_string());
            args.extend(step.command.iter().cloned());

            debug!(index, command = %step.command.join(" "), "docker exec");
            let out = self
                .cli_with_input(args.as_slice(), step.input.as_deref())
                .await?;
            if !out.success() {
                return Err(EngineError::ExecFailed {
                    index,
                    command: step.command.clone(),
                    exit_code: out.status.unwrap_or(-1),
                    stdout: out.stdout,
                    stderr: out.stderr,
                });
            }
            eval.stdout = out.stdout;
            eval.stderr = out.stderr;
        }
        Ok(eval)
    }

    /// Copy every materialized snapshot to its path inside container `id`.
    async fn copy_in(&self, plan: &RunPlan, id: &str) -> EngineResult<()> {
        for (path, host) in &plan.copies {
            self.cli_ok(&["exec", id, "mkdir", "-p", path.as_str()]).await?;
            let source = format!("{}/.", host.display());
            let dest = format!("{id}:{path}");
            self.cli_ok(&["cp", source.as_str(), dest.as_str()]).await?;
        }
        Ok(())
    }

    async fn capture(
        &self,
        plan: &RunPlan,
        id: &str,
        scratch: &Path,
        path: &str,
    ) -> EngineResult<SourceSnapshot> {
        let target = absolute_path(&plan.final_workdir, path);
        let dest = scratch.join("capture");
        let args = [
            "cp".to_string(),
            format!("{id}:{target}/."),
            dest.display().to_string(),
        ];
        self.cli_ok(&args)
            .await
            .map_err(|_| EngineError::PathNotMounted {
                path: target.clone(),
            })?;
        Ok(SourceSnapshot::from_dir(&dest, &[])?)
    }

    async fn remote_tag_exists(&self, address: &str) -> EngineResult<bool> {
        let out = self.cli(&["manifest", "inspect", address]).await?;
        Ok(out.success())
    }
}

/// Run `command` to completion, writing `input` to its stdin while its
/// output is drained. Dropping the future kills the child.
async fn output_with_input(mut command: Command, input: Option<&str>) -> std::io::Result<Output> {
    command
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut child = command.spawn()?;
    let stdin = child.stdin.take();

    let write = async move {
        if let (Some(mut stdin), Some(input)) = (stdin, input) {
            // A command that ignores stdin may close it early.
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                debug!(error = %e, "stdin closed before all input was written");
            }
        }
    };
    let ((), output) = tokio::join!(write, child.wait_with_output());
    output
}

/// Owns an evaluation container. [`ContainerGuard::remove`] deletes it; a
/// guard dropped without that, e.g. by a cancelled evaluation, starts the
/// removal in the background.
struct ContainerGuard {
    binary: String,
    id: String,
    armed: bool,
}

impl ContainerGuard {
    async fn remove(mut self, engine: &DockerEngine) {
        self.armed = false;
        if let Err(e) = engine.cli(&["rm", "-f", self.id.as_str()]).await {
            warn!(container = %self.id, error = %e, "failed to remove container");
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let removed = std::process::Command::new(&self.binary)
            .args(["rm", "-f", self.id.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        if let Err(e) = removed {
            warn!(container = %self.id, error = %e, "failed to remove container");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ExecStep {
    command: Vec<String>,
    input: Option<String>,
    workdir: String,
}

/// A container description resolved against a scratch directory.
#[derive(Debug, Default)]
struct RunPlan {
    /// `(container path, host path)` for every materialized snapshot.
    copies: Vec<(String, PathBuf)>,
    /// `(volume name, container path)` for every cache.
    volumes: Vec<(String, String)>,
    execs: Vec<ExecStep>,
    final_workdir: String,
}

impl RunPlan {
    fn resolve(container: &Container, scratch: &Path) -> EngineResult<Self> {
        let mut plan = RunPlan {
            final_workdir: "/".to_string(),
            ..RunPlan::default()
        };
        for (i, op) in container.ops().iter().enumerate() {
            match op {
                ContainerOp::MountSnapshot { path, snapshot }
                | ContainerOp::Directory { path, snapshot } => {
                    let host = scratch.join(format!("mount-{i}"));
                    snapshot.write_to(&host)?;
                    plan.copies.push((path.clone(), host));
                }
                ContainerOp::MountCache { path, volume } => {
                    let name = format!("{CACHE_VOLUME_PREFIX}{}", volume.key());
                    plan.volumes.push((name, path.clone()));
                }
                ContainerOp::Workdir(path) => plan.final_workdir = path.clone(),
                ContainerOp::Exec { args, input } => {
                    if args.is_empty() {
                        return Err(EngineError::InvalidContainer("empty exec".to_string()));
                    }
                    plan.execs.push(ExecStep {
                        command: args.clone(),
                        input: input.clone(),
                        workdir: plan.final_workdir.clone(),
                    });
                }
                ContainerOp::ExposePort(_) => {}
            }
        }
        Ok(plan)
    }

    fn run_args(&self, container: &Container) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--rm".to_string(),
            "--entrypoint".to_string(),
            "sleep".to_string(),
        ];
        if container.is_privileged() {
            args.push("--privileged".to_string());
        }
        for (name, path) in &self.volumes {
            args.push("-v".to_string());
            args.push(format!("{name}:{path}"));
        }
        args.push(container.image().to_string());
        args.push("infinity".to_string());
        args
    }
}

/// Render a Dockerfile that reproduces `container` from a build context in
/// which snapshot `i` lives under `ctx-<i>/`.
fn render_dockerfile(container: &Container) -> String {
    let mut lines = vec![format!("FROM {}", container.image())];
    for (i, op) in container.ops().iter().enumerate() {
        match op {
            ContainerOp::MountSnapshot { path, .. } | ContainerOp::Directory { path, .. } => {
                lines.push(format!("COPY ctx-{i}/ {path}"));
            }
            ContainerOp::Workdir(path) => lines.push(format!("WORKDIR {path}")),
            ContainerOp::Exec { args, .. } => {
                let json = serde_json::to_string(args).unwrap_or_else(|_| "[]".to_string());
                lines.push(format!("RUN {json}"));
            }
            ContainerOp::ExposePort(port) => lines.push(format!("EXPOSE {port}")),
            // caches are an evaluation concern only
            ContainerOp::MountCache { .. } => {}
        }
    }
    lines.join("\n") + "\n"
}

#[async_trait]
impl Engine for DockerEngine {
    fn name(&self) -> &str {
        "docker"
    }

    async fn evaluate(
        &self,
        container: &Container,
        capture: Option<&str>,
    ) -> EngineResult<Evaluation> {
        let scratch = tempfile::tempdir()?;
        let plan = RunPlan::resolve(container, scratch.path())?;

        let started = self.cli_ok(plan.run_args(container).as_slice()).await?;
        let guard = ContainerGuard {
            binary: self.binary.clone(),
            id: started.stdout.trim().to_string(),
            armed: true,
        };
        let id = guard.id.clone();
        debug!(container = %id, image = %container.image(), "started container");

        let result = async {
            self.copy_in(&plan, &id).await?;
            let mut eval = self.run_execs(container, &plan, &id).await?;
            if let Some(path) = capture {
                eval.captured = Some(self.capture(&plan, &id, scratch.path(), path).await?);
            }
            Ok::<_, EngineError>(eval)
        }
        .await;

        guard.remove(self).await;
        result
    }

    async fn publish(&self, container: &Container, address: &str) -> EngineResult<String> {
        if self.remote_tag_exists(address).await? {
            return Err(EngineError::TagExists {
                address: address.to_string(),
            });
        }

        let context = tempfile::tempdir()?;
        for (i, op) in container.ops().iter().enumerate() {
            if let ContainerOp::MountSnapshot { snapshot, .. }
            | ContainerOp::Directory { snapshot, .. } = op
            {
                snapshot.write_to(&context.path().join(format!("ctx-{i}")))?;
            }
        }
        tokio::fs::write(context.path().join("Dockerfile"), render_dockerfile(container)).await?;

        let context_dir = context.path().display().to_string();
        let built = self
            .cli(&["build", "--quiet", "-t", address, context_dir.as_str()])
            .await?;
        if !built.success() {
            return Err(EngineError::PublishFailed {
                address: address.to_string(),
                reason: built.stderr.trim().to_string(),
            });
        }

        let pushed = self.cli(&["push", address]).await?;
        if !pushed.success() {
            return Err(EngineError::PublishFailed {
                address: address.to_string(),
                reason: pushed.stderr.trim().to_string(),
            });
        }

        let inspected = self
            .cli(&["image", "inspect", "--format", "{{json .RepoDigests}}", address])
            .await?;
        let reference = serde_json::from_str::<Vec<String>>(inspected.stdout.trim())
            .ok()
            .and_then(|digests| digests.into_iter().next())
            .map(|digest| match digest.split_once('@') {
                Some((_, sha)) => format!("{address}@{sha}"),
                None => address.to_string(),
            })
            .unwrap_or_else(|| address.to_string());
        info!(reference = %reference, "pushed image");
        Ok(reference)
    }
}

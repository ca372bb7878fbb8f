//! Execution engine interface.
//!
//! A [`Container`] is an immutable description of an environment: a base
//! image followed by an ordered list of operations (mounts, directories,
//! working directory changes, execs, exposed ports). Nothing runs while a
//! container is being described; an [`Engine`] evaluates the description on
//! demand, runs every exec in order and stops at the first non-zero exit.
//!
//! Cache volumes are keyed by a logical name. The same key always refers to
//! the same physical cache for every container, every run and every process
//! that uses the engine. Concurrent writers are the engine's concern.

pub mod error;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::snapshot::{normalize_dir_path, SourceSnapshot};

pub use error::{EngineError, EngineResult};

/// A persistent cache identified by a process-wide key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheVolume {
    key: String,
}

impl CacheVolume {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// One step in a container description.
#[derive(Debug, Clone)]
pub enum ContainerOp {
    /// Mount a snapshot read-write at an absolute path.
    MountSnapshot { path: String, snapshot: SourceSnapshot },
    /// Mount a keyed cache volume at an absolute path.
    MountCache { path: String, volume: CacheVolume },
    /// Copy a snapshot into the image filesystem at an absolute path.
    Directory { path: String, snapshot: SourceSnapshot },
    /// Change the working directory for later execs.
    Workdir(String),
    /// Run a command, optionally feeding `input` on stdin; fails evaluation
    /// on non-zero exit.
    Exec {
        args: Vec<String>,
        input: Option<String>,
    },
    /// Declare a network port the image listens on.
    ExposePort(u16),
}

/// An immutable container description. Builder methods return a new value.
#[derive(Debug, Clone)]
pub struct Container {
    image: String,
    ops: Vec<ContainerOp>,
    privileged: bool,
}

impl Container {
    /// Start from a base image reference.
    pub fn from_image(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ops: Vec::new(),
            privileged: false,
        }
    }

    pub fn with_mounted_snapshot(self, path: &str, snapshot: SourceSnapshot) -> Self {
        let path = absolute_path("/", path);
        self.push(ContainerOp::MountSnapshot { path, snapshot })
    }

    pub fn with_mounted_cache(self, path: &str, volume: CacheVolume) -> Self {
        let path = absolute_path("/", path);
        self.push(ContainerOp::MountCache { path, volume })
    }

    pub fn with_directory(self, path: &str, snapshot: SourceSnapshot) -> Self {
        let path = absolute_path(&self.workdir(), path);
        self.push(ContainerOp::Directory { path, snapshot })
    }

    pub fn with_workdir(self, path: &str) -> Self {
        let path = absolute_path(&self.workdir(), path);
        self.push(ContainerOp::Workdir(path))
    }

    pub fn with_exec<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args = args.into_iter().map(Into::into).collect();
        self.push(ContainerOp::Exec { args, input: None })
    }

    /// Like [`Container::with_exec`], with `input` written to the command's
    /// stdin.
    pub fn with_exec_input<I, S>(self, args: I, input: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args = args.into_iter().map(Into::into).collect();
        self.push(ContainerOp::Exec {
            args,
            input: Some(input.into()),
        })
    }

    pub fn with_exposed_port(self, port: u16) -> Self {
        self.push(ContainerOp::ExposePort(port))
    }

    /// Run execs with extended privileges.
    pub fn with_privileges(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    fn push(mut self, op: ContainerOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn ops(&self) -> &[ContainerOp] {
        &self.ops
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// Current working directory (`/` when never set).
    pub fn workdir(&self) -> String {
        self.ops
            .iter()
            .rev()
            .find_map(|op| match op {
                ContainerOp::Workdir(p) => Some(p.clone()),
                _ => None,
            })
            .unwrap_or_else(|| "/".to_string())
    }

    /// Commands in execution order.
    pub fn execs(&self) -> Vec<&[String]> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                ContainerOp::Exec { args, .. } => Some(args.as_slice()),
                _ => None,
            })
            .collect()
    }

    pub fn exposed_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self
            .ops
            .iter()
            .filter_map(|op| match op {
                ContainerOp::ExposePort(p) => Some(*p),
                _ => None,
            })
            .collect();
        ports.sort_unstable();
        ports.dedup();
        ports
    }

    /// Cache volumes mounted anywhere in the container.
    pub fn cache_volumes(&self) -> Vec<&CacheVolume> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                ContainerOp::MountCache { volume, .. } => Some(volume),
                _ => None,
            })
            .collect()
    }

    /// Find the snapshot mount or directory that contains `path`.
    ///
    /// Relative paths resolve against the working directory. The deepest
    /// matching mount wins; ties go to the latest operation.
    pub fn locate(&self, path: &str) -> Option<MountPoint> {
        let target = absolute_path(&self.workdir(), path);
        let mut best: Option<MountPoint> = None;
        for op in &self.ops {
            let mount = match op {
                ContainerOp::MountSnapshot { path, .. } | ContainerOp::Directory { path, .. } => {
                    path
                }
                _ => continue,
            };
            let Some(relative) = relative_to(mount, &target) else {
                continue;
            };
            let deeper = best.as_ref().map_or(true, |b| mount.len() >= b.mount.len());
            if deeper {
                best = Some(MountPoint {
                    mount: mount.clone(),
                    relative,
                });
            }
        }
        best
    }
}

/// Location of a path inside a container's mounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    /// Absolute mount path.
    pub mount: String,
    /// Path relative to the mount (`""` for the mount root).
    pub relative: String,
}

/// Resolve `path` against `base` into a normalized absolute path.
///
/// `..` segments are dropped rather than resolved; container paths in this
/// system never need them.
pub fn absolute_path(base: &str, path: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{base}/{path}")
    };
    let segments: Vec<&str> = joined
        .split('/')
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .collect();
    format!("/{}", segments.join("/"))
}

/// Path of `target` relative to `mount`, or `None` when it lies outside.
/// Both paths must be absolute and normalized.
pub fn relative_to(mount: &str, target: &str) -> Option<String> {
    if mount == "/" {
        return normalize_dir_path(target).ok();
    }
    if target == mount {
        return Some(String::new());
    }
    target
        .strip_prefix(mount)
        .and_then(|rest| rest.strip_prefix('/'))
        .map(str::to_string)
}

/// Output of evaluating a container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// Stdout of the last exec (empty when there were none).
    pub stdout: String,
    /// Stderr of the last exec.
    pub stderr: String,
    /// Snapshot captured at the requested path after every exec ran.
    pub captured: Option<SourceSnapshot>,
}

/// Container execution backend.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Run every exec of `container` in order. When `capture` is set, the
    /// snapshot at that path is read back after the last exec.
    async fn evaluate(&self, container: &Container, capture: Option<&str>)
        -> EngineResult<Evaluation>;

    /// Push `container` as an image to `address` and return the published
    /// reference. Never overwrites an existing tag.
    async fn publish(&self, container: &Container, address: &str) -> EngineResult<String>;

    /// Stdout of the last exec.
    async fn stdout(&self, container: &Container) -> EngineResult<String> {
        Ok(self.evaluate(container, None).await?.stdout)
    }

    /// Snapshot at `path` after every exec ran.
    async fn directory(&self, container: &Container, path: &str) -> EngineResult<SourceSnapshot> {
        self.evaluate(container, Some(path))
            .await?
            .captured
            .ok_or_else(|| EngineError::PathNotMounted {
                path: path.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src() -> SourceSnapshot {
        SourceSnapshot::from_files([("package.json", "{}")]).unwrap()
    }

    #[test]
    fn builder_is_ordered_and_immutable() {
        let base = Container::from_image("node:21-slim")
            .with_mounted_snapshot("/src", src())
            .with_mounted_cache("/root/.npm", CacheVolume::new("node"))
            .with_workdir("/src");
        let installed = base.clone().with_exec(["npm", "install"]);

        assert!(base.execs().is_empty());
        assert_eq!(installed.execs(), vec![&["npm".to_string(), "install".to_string()][..]]);
        assert_eq!(installed.workdir(), "/src");
        assert_eq!(installed.cache_volumes()[0].key(), "node");
    }

    #[test]
    fn exec_input_is_kept_with_the_command() {
        let c = Container::from_image("node:21-slim").with_exec_input(["agent"], "prompt");
        assert_eq!(c.execs(), vec![&["agent".to_string()][..]]);
        assert!(matches!(
            &c.ops()[0],
            ContainerOp::Exec { input: Some(input), .. } if input == "prompt"
        ));
    }

    #[test]
    fn relative_paths_resolve_against_workdir() {
        let c = Container::from_image("node:21-slim")
            .with_mounted_snapshot("/src", src())
            .with_workdir("/src");
        assert_eq!(
            c.locate("./dist"),
            Some(MountPoint {
                mount: "/src".into(),
                relative: "dist".into()
            })
        );
        assert_eq!(
            c.locate("/src"),
            Some(MountPoint {
                mount: "/src".into(),
                relative: String::new()
            })
        );
        assert_eq!(c.locate("/srcfoo"), None);
    }

    #[test]
    fn deepest_mount_wins() {
        let c = Container::from_image("nginx:1.25-alpine")
            .with_directory("/usr/share", src())
            .with_directory("/usr/share/nginx/html", src());
        let mp = c.locate("/usr/share/nginx/html/assets").unwrap();
        assert_eq!(mp.mount, "/usr/share/nginx/html");
        assert_eq!(mp.relative, "assets");
    }

    #[test]
    fn exposed_ports_are_deduplicated() {
        let c = Container::from_image("nginx:1.25-alpine")
            .with_exposed_port(80)
            .with_exposed_port(80);
        assert_eq!(c.exposed_ports(), vec![80]);
    }

    #[test]
    fn absolute_path_normalizes() {
        assert_eq!(absolute_path("/src", "./dist/"), "/src/dist");
        assert_eq!(absolute_path("/src", "/root/.npm"), "/root/.npm");
        assert_eq!(absolute_path("/", "."), "/");
    }
}

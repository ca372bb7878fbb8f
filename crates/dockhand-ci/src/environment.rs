//! Hermetic, cache-accelerated execution environments.
//!
//! An [`ExecutionEnvironment`] is a container description with the source
//! mounted, the shared package cache attached and dependencies installed.
//! Nothing runs until the environment is evaluated; a failed install then
//! surfaces as [`DockhandError::EnvironmentSetup`] from whichever operation
//! evaluated it.

use std::sync::Arc;

use dockhand_core::agent::Workspace;
use dockhand_core::config::EnvironmentConfig;
use dockhand_core::engine::{CacheVolume, Container, Engine, EngineError};
use dockhand_core::{DockhandError, Result, SourceSnapshot};

/// Assembles execution environments from source snapshots.
#[derive(Clone)]
pub struct EnvironmentBuilder {
    engine: Arc<dyn Engine>,
    config: EnvironmentConfig,
}

impl EnvironmentBuilder {
    pub fn new(engine: Arc<dyn Engine>, config: EnvironmentConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// The runtime image with the shared package cache attached.
    pub fn base(&self) -> Container {
        Container::from_image(&self.config.base_image).with_mounted_cache(
            &self.config.cache_path,
            CacheVolume::new(&self.config.cache_key),
        )
    }

    /// Environment for `source` with dependencies installed.
    pub fn build(&self, source: &SourceSnapshot) -> ExecutionEnvironment {
        let container = self
            .base()
            .with_mounted_snapshot(&self.config.mount_path, source.clone())
            .with_workdir(&self.config.mount_path)
            .with_exec(self.config.install_command.iter().map(String::as_str));
        ExecutionEnvironment {
            engine: self.engine.clone(),
            container,
            setup_steps: 1,
        }
    }

    /// An editable workspace over `source` sharing this environment's image
    /// and cache.
    pub fn workspace(&self, source: SourceSnapshot, privileged: bool) -> Workspace {
        Workspace::new(
            self.engine.clone(),
            self.base().with_privileges(privileged),
            self.config.mount_path.clone(),
            source,
        )
    }
}

/// A prepared environment plus the commands applied to it so far.
#[derive(Clone)]
pub struct ExecutionEnvironment {
    engine: Arc<dyn Engine>,
    container: Container,
    setup_steps: usize,
}

impl ExecutionEnvironment {
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// A new environment with `args` appended.
    pub fn with_exec<I, S>(&self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            engine: self.engine.clone(),
            container: self.container.clone().with_exec(args),
            setup_steps: self.setup_steps,
        }
    }

    /// Run every command and return stdout of the last one.
    pub async fn stdout(&self) -> Result<String> {
        self.engine
            .stdout(&self.container)
            .await
            .map_err(|e| self.classify(e))
    }

    /// Run every command and read back the directory at `path`.
    pub async fn directory(&self, path: &str) -> Result<SourceSnapshot> {
        self.engine
            .directory(&self.container, path)
            .await
            .map_err(|e| self.classify(e))
    }

    /// Map an engine error onto the domain taxonomy. A failing setup exec
    /// invalidates the environment itself.
    pub fn classify(&self, err: EngineError) -> DockhandError {
        match err {
            EngineError::ExecFailed {
                index,
                command,
                exit_code,
                stdout,
                stderr,
            } if index < self.setup_steps => DockhandError::EnvironmentSetup {
                command: command.join(" "),
                exit_code,
                stdout,
                stderr,
            },
            other => other.into(),
        }
    }
}

//! Test, build and publish operations over execution environments.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dockhand_core::config::{BuildConfig, PublishConfig};
use dockhand_core::deadline::with_timeout;
use dockhand_core::engine::{Container, Engine};
use dockhand_core::obs::{self, OperationSpan};
use dockhand_core::{DockhandConfig, Result, SourceSnapshot};
use tracing::{debug, info};

use crate::environment::EnvironmentBuilder;
use crate::stage::{BuiltinStage, StageConfig};
use crate::tag::next_address;

/// Delivery pipeline for one application.
#[derive(Clone)]
pub struct Pipeline {
    engine: Arc<dyn Engine>,
    environment: EnvironmentBuilder,
    config: DockhandConfig,
    timeout: Option<Duration>,
}

impl Pipeline {
    pub fn new(engine: Arc<dyn Engine>, config: DockhandConfig) -> Self {
        let environment = EnvironmentBuilder::new(engine.clone(), config.environment.clone());
        let timeout = config.timeout_secs.map(Duration::from_secs);
        Self {
            engine,
            environment,
            config,
            timeout,
        }
    }

    /// Override the per-operation time limit.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn environment(&self) -> &EnvironmentBuilder {
        &self.environment
    }

    pub fn config(&self) -> &DockhandConfig {
        &self.config
    }

    fn build_config(&self) -> &BuildConfig {
        &self.config.build
    }

    fn publish_config(&self) -> &PublishConfig {
        &self.config.publish
    }

    fn stage(&self, stage: BuiltinStage) -> StageConfig {
        StageConfig::from_builtin(stage, &self.config)
    }

    /// Run the unit tests and return their stdout.
    pub async fn test(&self, source: &SourceSnapshot) -> Result<String> {
        let op = OperationSpan::new("test");
        op.run(self.timed("test", self.run_tests(source)))
            .await
    }

    /// Build the static-serving image. Does not run the tests.
    pub async fn build(&self, source: &SourceSnapshot) -> Result<Container> {
        let op = OperationSpan::new("build");
        op.run(self.timed("build", self.build_image(source)))
            .await
    }

    /// Test, build and push under a fresh tag. Returns the published
    /// reference. Nothing is pushed unless the tests pass.
    pub async fn publish(&self, source: &SourceSnapshot) -> Result<String> {
        let op = OperationSpan::new("publish");
        op.run(self.timed("publish", async {
            self.run_tests(source).await?;
            let image = self.build_image(source).await?;

            let address = next_address(
                &self.publish_config().address_template,
                &self.publish_config().tag,
            );
            debug!(address = %address, "publishing image");
            let reference = self.engine.publish(&image, &address).await?;
            obs::emit_pipeline_published(&reference);
            Ok(reference)
        }))
        .await
    }

    async fn run_tests(&self, source: &SourceSnapshot) -> Result<String> {
        let install = self.stage(BuiltinStage::Install);
        let test = self.stage(BuiltinStage::UnitTest);
        obs::emit_pipeline_step(&install.name, &install.command);
        obs::emit_pipeline_step(&test.name, &test.command);

        self.environment
            .build(source)
            .with_exec(test.command)
            .stdout()
            .await
    }

    async fn build_image(&self, source: &SourceSnapshot) -> Result<Container> {
        let install = self.stage(BuiltinStage::Install);
        let build = self.stage(BuiltinStage::Build);
        obs::emit_pipeline_step(&install.name, &install.command);
        obs::emit_pipeline_step(&build.name, &build.command);

        let config = self.build_config();
        let output = self
            .environment
            .build(source)
            .with_exec(build.command)
            .directory(&config.output_dir)
            .await?;
        info!(files = output.len(), digest = %output.digest().short(), "build output ready");

        Ok(Container::from_image(&config.serve_image)
            .with_directory(&config.serve_path, output)
            .with_exposed_port(config.port))
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        let start = Instant::now();
        let result = with_timeout(operation, self.timeout, fut).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_pipeline_finished(operation, duration_ms, result.is_ok());
        if let Err(e) = &result {
            obs::emit_operation_failed(operation, e);
        }
        result
    }
}

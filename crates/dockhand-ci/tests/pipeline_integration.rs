//! Integration tests for the delivery pipeline with MemoryEngine.

use std::sync::Arc;
use std::time::Duration;

use dockhand_ci::{Pipeline, ValidationGate};
use dockhand_core::engine::{ContainerOp, EngineError};
use dockhand_core::fakes::{MemoryEngine, ScriptedExec};
use dockhand_core::{DockhandConfig, DockhandError, SourceSnapshot, TagStrategy};

fn app_source() -> SourceSnapshot {
    SourceSnapshot::from_files([
        ("package.json", r#"{"name":"hello-dagger"}"#),
        ("index.html", "<div id=\"app\"></div>"),
        ("src/main.ts", "createApp(App).mount('#app')"),
    ])
    .unwrap()
}

/// Engine where `npm run build` writes a dist/ tree next to the source.
fn building_engine() -> MemoryEngine {
    MemoryEngine::new()
        .on_exec_result(
            ["npm", "run", "test:unit", "run"],
            ScriptedExec::ok("Test Files  1 passed (1)"),
        )
        .on_exec(["npm", "run", "build"], |ctx| {
            let source = ctx.source.clone().unwrap_or_default();
            let built = source
                .with_file("dist/index.html", "<html>built</html>")
                .and_then(|s| s.with_file("dist/assets/index.js", "console.log(1)"))
                .unwrap();
            ScriptedExec {
                source: Some(built),
                ..ScriptedExec::default()
            }
        })
}

fn pipeline(engine: &Arc<MemoryEngine>) -> Pipeline {
    Pipeline::new(engine.clone(), DockhandConfig::default())
}

/// Test: test runs install then the unit tests in the cached environment
#[tokio::test]
async fn test_runs_in_cached_environment() {
    let engine = Arc::new(building_engine());
    let stdout = pipeline(&engine).test(&app_source()).await.unwrap();

    assert_eq!(stdout, "Test Files  1 passed (1)");
    assert_eq!(
        engine.executed_commands(),
        vec!["npm install", "npm run test:unit run"]
    );
    let records = engine.executed();
    assert!(records.iter().all(|r| r.image == "node:21-slim" && r.workdir == "/src"));
    assert_eq!(engine.cache_keys_used(), vec!["node"]);
}

/// Test: failing unit tests surface as a command failure with output
#[tokio::test]
async fn test_failure_carries_output() {
    let engine = Arc::new(MemoryEngine::new().on_exec_result(
        ["npm", "run", "test:unit", "run"],
        ScriptedExec::fail(1, "FAIL src/components/Header.spec.ts", ""),
    ));
    let err = pipeline(&engine).test(&app_source()).await.unwrap_err();

    match &err {
        DockhandError::CommandFailed {
            command, exit_code, ..
        } => {
            assert_eq!(command, "npm run test:unit run");
            assert_eq!(*exit_code, 1);
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }
    assert_eq!(err.stdout(), Some("FAIL src/components/Header.spec.ts"));
}

/// Test: install failure invalidates every downstream operation
#[tokio::test]
async fn install_failure_is_environment_setup_error() {
    let engine = Arc::new(MemoryEngine::new().on_exec_result(
        ["npm", "install"],
        ScriptedExec::fail(1, "", "npm ERR! 404 Not Found - @vue/nonexistent"),
    ));
    let pipeline = pipeline(&engine);

    let test_err = pipeline.test(&app_source()).await.unwrap_err();
    assert!(matches!(test_err, DockhandError::EnvironmentSetup { .. }));
    assert!(test_err.stderr().unwrap().contains("404"));

    let build_err = pipeline.build(&app_source()).await.unwrap_err();
    assert!(matches!(build_err, DockhandError::EnvironmentSetup { .. }));
}

/// Test: build layers exactly the build output into the serving image
#[tokio::test]
async fn build_serves_exactly_the_build_output() {
    let engine = Arc::new(building_engine());
    let image = pipeline(&engine).build(&app_source()).await.unwrap();

    assert_eq!(image.image(), "nginx:1.25-alpine");
    assert_eq!(image.exposed_ports(), vec![80]);

    let directories: Vec<_> = image
        .ops()
        .iter()
        .filter_map(|op| match op {
            ContainerOp::Directory { path, snapshot } => Some((path.clone(), snapshot.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(directories.len(), 1);
    let (path, served) = &directories[0];
    assert_eq!(path, "/usr/share/nginx/html");
    assert_eq!(
        served.paths().collect::<Vec<_>>(),
        vec!["assets/index.js", "index.html"]
    );

    // build never runs the unit tests
    assert!(!engine
        .executed_commands()
        .contains(&"npm run test:unit run".to_string()));
}

/// Test: a build that produces no output directory fails
#[tokio::test]
async fn build_without_output_fails() {
    let engine = Arc::new(MemoryEngine::new());
    let err = pipeline(&engine).build(&app_source()).await.unwrap_err();
    assert!(matches!(
        err,
        DockhandError::Engine(EngineError::Snapshot(_))
    ));
}

/// Test: publish tests, builds and pushes under the ttl.sh template
#[tokio::test]
async fn publish_pushes_after_tests() {
    let engine = Arc::new(building_engine());
    let reference = pipeline(&engine).publish(&app_source()).await.unwrap();

    assert!(reference.starts_with("ttl.sh/hello-dagger-"));
    assert!(reference.contains("@sha256:"));

    let published = engine.published();
    assert_eq!(published.len(), 1);
    let tag: u64 = published[0]
        .address
        .trim_start_matches("ttl.sh/hello-dagger-")
        .parse()
        .unwrap();
    assert!(tag < 10_000_000);
    assert_eq!(published[0].exposed_ports, vec![80]);

    let commands = engine.executed_commands();
    let test_pos = commands.iter().position(|c| c == "npm run test:unit run");
    let build_pos = commands.iter().position(|c| c == "npm run build");
    assert!(test_pos.unwrap() < build_pos.unwrap());
}

/// Test: a failing test aborts publish before build or push
#[tokio::test]
async fn publish_never_pushes_when_tests_fail() {
    let engine = Arc::new(building_engine().on_exec_result(
        ["npm", "run", "test:unit", "run"],
        ScriptedExec::fail(1, "Tests  1 failed", ""),
    ));
    let result = pipeline(&engine).publish(&app_source()).await;

    assert!(matches!(result, Err(DockhandError::CommandFailed { .. })));
    assert!(engine.published().is_empty());
    assert!(!engine
        .executed_commands()
        .contains(&"npm run build".to_string()));
}

/// Test: two publishes yield different addresses
#[tokio::test]
async fn repeated_publish_uses_fresh_tags() {
    let engine = Arc::new(building_engine());
    let mut config = DockhandConfig::default();
    config.publish.tag = TagStrategy::Uuid;
    let pipeline = Pipeline::new(engine.clone(), config);

    let first = pipeline.publish(&app_source()).await.unwrap();
    let second = pipeline.publish(&app_source()).await.unwrap();
    assert_ne!(first, second);
    assert_eq!(engine.published().len(), 2);
}

/// Test: an existing tag is refused rather than overwritten
#[tokio::test]
async fn publish_refuses_existing_tag() {
    let mut config = DockhandConfig::default();
    config.publish.tag = TagStrategy::BoundedRandom { upper: 2 };
    let engine = Arc::new(
        building_engine()
            .with_existing_tag("ttl.sh/hello-dagger-0")
            .with_existing_tag("ttl.sh/hello-dagger-1"),
    );
    let err = Pipeline::new(engine.clone(), config)
        .publish(&app_source())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DockhandError::Engine(EngineError::TagExists { .. })
    ));
    assert!(engine.published().is_empty());
}

/// Test: a registry failure surfaces with its reason
#[tokio::test]
async fn publish_reports_push_failure() {
    let engine = Arc::new(building_engine().failing_publish("denied: requested access to the resource is denied"));
    let err = pipeline(&engine).publish(&app_source()).await.unwrap_err();

    match err {
        DockhandError::Engine(EngineError::PublishFailed { reason, .. }) => {
            assert!(reason.contains("denied"))
        }
        other => panic!("expected PublishFailed, got {other:?}"),
    }
    assert!(engine.published().is_empty());
}

/// Test: an elapsed operation timeout is a failure
#[tokio::test(start_paused = true)]
async fn publish_times_out() {
    struct SlowEngine(MemoryEngine);

    #[async_trait::async_trait]
    impl dockhand_core::Engine for SlowEngine {
        fn name(&self) -> &str {
            "slow"
        }

        async fn evaluate(
            &self,
            container: &dockhand_core::Container,
            capture: Option<&str>,
        ) -> dockhand_core::EngineResult<dockhand_core::Evaluation> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            self.0.evaluate(container, capture).await
        }

        async fn publish(
            &self,
            container: &dockhand_core::Container,
            address: &str,
        ) -> dockhand_core::EngineResult<String> {
            self.0.publish(container, address).await
        }
    }

    let engine = Arc::new(SlowEngine(building_engine()));
    let pipeline = Pipeline::new(engine, DockhandConfig::default())
        .with_timeout(Some(Duration::from_secs(10)));

    let err = pipeline.publish(&app_source()).await.unwrap_err();
    assert!(matches!(err, DockhandError::Timeout { limit_secs: 10, .. }));
}

/// Test: the validation gate reports failing tests as a verdict
#[tokio::test]
async fn gate_reports_failing_tests() {
    let engine = Arc::new(MemoryEngine::new().on_exec_result(
        ["npm", "run", "test:unit", "run"],
        ScriptedExec::fail(1, "AssertionError: expected 2 headers", ""),
    ));
    let pipeline = pipeline(&engine);
    let verdict = ValidationGate::new(&pipeline)
        .evaluate(&app_source())
        .await
        .unwrap();

    assert!(!verdict.passed);
    assert_eq!(verdict.snapshot, app_source().digest().to_hex());
    assert!(verdict.stdout.contains("expected 2 headers"));
    assert!(matches!(
        verdict.into_result(1),
        Err(DockhandError::ValidationFailed { attempts: 1, .. })
    ));
}

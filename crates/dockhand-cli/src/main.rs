//! Dockhand CLI
//!
//! The `dockhand` command drives the delivery pipeline and the coding agent
//! against a local source directory.
//!
//! ## Commands
//!
//! - `test`: run the unit tests
//! - `build`: build the static-serving image
//! - `publish`: test, build and push the image under a fresh tag
//! - `develop`: complete an assignment with the agent and write the result
//! - `develop-issue`: develop a GitHub issue and open a pull request

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use dockhand_agent::{Dockhand, ProcessAgent};
use dockhand_ci::{DockerEngine, Pipeline};
use dockhand_core::config::split_command;
use dockhand_core::engine::{Container, ContainerOp, Engine};
use dockhand_core::telemetry::init_tracing;
use dockhand_core::tracker::TrackerCredential;
use dockhand_core::{DockhandConfig, SourceSnapshot};

/// Directories never loaded from the source directory, on top of whatever
/// its ignore files exclude.
const SOURCE_EXCLUDES: &[&str] = &["node_modules", ".git"];

#[derive(Parser)]
#[command(name = "dockhand")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Container-native delivery pipeline with an issue-driven coding agent", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file (DOCKHAND_* variables still apply)
    #[arg(short, long, global = true, env = "DOCKHAND_CONFIG")]
    config: Option<PathBuf>,

    /// Application source directory
    #[arg(short, long, global = true, default_value = ".")]
    source: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the unit tests and print their output
    Test,

    /// Build the static-serving image (does not run tests)
    Build,

    /// Test, build and push the image; prints the published reference
    Publish,

    /// Complete an assignment with the coding agent
    Develop {
        /// The assignment to complete
        assignment: String,

        /// Directory the validated result is written to
        #[arg(short, long)]
        output: PathBuf,

        /// Agent command line, overriding the configured one
        #[arg(long)]
        agent_command: Option<String>,
    },

    /// Develop a GitHub issue and open a pull request
    DevelopIssue {
        /// Issue number
        #[arg(long)]
        issue: u64,

        /// Repository as `owner/name` or URL
        #[arg(long)]
        repo: String,

        /// GitHub token
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: String,

        /// Agent command line, overriding the configured one
        #[arg(long)]
        agent_command: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;
    let docker = DockerEngine::new();
    docker
        .ping()
        .await
        .context("Docker daemon is not reachable")?;
    let engine: Arc<dyn Engine> = Arc::new(docker);

    match cli.command {
        Commands::Test => {
            let pipeline = Pipeline::new(engine, config);
            cmd_test(&pipeline, &cli.source).await
        }
        Commands::Build => {
            let pipeline = Pipeline::new(engine, config);
            cmd_build(&pipeline, &cli.source).await
        }
        Commands::Publish => {
            let pipeline = Pipeline::new(engine, config);
            cmd_publish(&pipeline, &cli.source).await
        }
        Commands::Develop {
            assignment,
            output,
            agent_command,
        } => {
            let dockhand = dockhand_with_agent(engine, config, agent_command.as_deref())?;
            cmd_develop(&dockhand, &cli.source, &assignment, &output).await
        }
        Commands::DevelopIssue {
            issue,
            repo,
            token,
            agent_command,
        } => {
            let dockhand = dockhand_with_agent(engine, config, agent_command.as_deref())?;
            let credential = TrackerCredential::new(token);
            cmd_develop_issue(&dockhand, &cli.source, &credential, issue, &repo).await
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<DockhandConfig> {
    match path {
        Some(path) => DockhandConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => DockhandConfig::from_env().context("Failed to read DOCKHAND_* variables"),
    }
}

fn dockhand_with_agent(
    engine: Arc<dyn Engine>,
    mut config: DockhandConfig,
    agent_command: Option<&str>,
) -> Result<Dockhand> {
    if let Some(raw) = agent_command {
        config.agent.command = split_command("agent command", raw)?;
    }
    let agent = ProcessAgent::from_config(&config.agent)
        .context("No agent configured (set DOCKHAND_AGENT_COMMAND or --agent-command)")?
        .with_timeout(config.timeout_secs.map(std::time::Duration::from_secs));
    Ok(Dockhand::new(engine, Arc::new(agent), config))
}

fn load_source(dir: &Path) -> Result<SourceSnapshot> {
    let source = SourceSnapshot::from_checkout(dir, SOURCE_EXCLUDES)
        .with_context(|| format!("Failed to read source directory {}", dir.display()))?;
    info!(
        files = source.len(),
        digest = %source.digest().short(),
        "loaded source"
    );
    Ok(source)
}

async fn cmd_test(pipeline: &Pipeline, source_dir: &Path) -> Result<()> {
    let source = load_source(source_dir)?;
    let stdout = pipeline.test(&source).await.context("Unit tests failed")?;
    println!("{stdout}");
    Ok(())
}

/// What `build` reports about the image it produced.
#[derive(Debug, Serialize)]
struct BuildSummary {
    image: String,
    ports: Vec<u16>,
    served_path: String,
    files: usize,
    digest: String,
}

fn summarize_build(image: &Container) -> Option<BuildSummary> {
    image.ops().iter().find_map(|op| match op {
        ContainerOp::Directory { path, snapshot } => Some(BuildSummary {
            image: image.image().to_string(),
            ports: image.exposed_ports(),
            served_path: path.clone(),
            files: snapshot.len(),
            digest: snapshot.digest().to_hex(),
        }),
        _ => None,
    })
}

async fn cmd_build(pipeline: &Pipeline, source_dir: &Path) -> Result<()> {
    let source = load_source(source_dir)?;
    let image = pipeline.build(&source).await.context("Build failed")?;
    let summary = summarize_build(&image).context("Build produced no served directory")?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn cmd_publish(pipeline: &Pipeline, source_dir: &Path) -> Result<()> {
    let source = load_source(source_dir)?;
    let reference = pipeline.publish(&source).await.context("Publish failed")?;
    println!("{reference}");
    Ok(())
}

async fn cmd_develop(
    dockhand: &Dockhand,
    source_dir: &Path,
    assignment: &str,
    output: &Path,
) -> Result<()> {
    let source = load_source(source_dir)?;
    let developed = dockhand
        .develop(assignment, &source)
        .await
        .context("Develop failed")?;
    developed
        .write_to(output)
        .with_context(|| format!("Failed to write result to {}", output.display()))?;

    println!("✓ Assignment completed and validated");
    println!("  Files:  {}", developed.len());
    println!("  Digest: {}", developed.digest().short());
    println!("  Output: {}", output.display());
    Ok(())
}

async fn cmd_develop_issue(
    dockhand: &Dockhand,
    source_dir: &Path,
    credential: &TrackerCredential,
    issue: u64,
    repo: &str,
) -> Result<()> {
    let source = load_source(source_dir)?;
    let url = dockhand
        .develop_issue(credential, issue, repo, &source)
        .await
        .with_context(|| format!("Failed to develop issue #{issue} of {repo}"))?;
    println!("{url}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockhand_core::fakes::{MemoryEngine, MemoryTracker, ScriptedAgent, ScriptedExec};
    use dockhand_core::tracker::{RepoRef, Tracker, TrackerResult};

    fn write_app(dir: &Path) {
        std::fs::create_dir_all(dir.join("src")).unwrap();
        std::fs::create_dir_all(dir.join("node_modules/vue")).unwrap();
        std::fs::write(dir.join("package.json"), r#"{"name":"hello-dagger"}"#).unwrap();
        std::fs::write(dir.join("src/main.ts"), "createApp(App)").unwrap();
        std::fs::write(dir.join("node_modules/vue/index.js"), "").unwrap();
    }

    #[test]
    fn test_load_source_skips_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        write_app(dir.path());

        let source = load_source(dir.path()).unwrap();
        assert!(source.file("package.json").is_some());
        assert!(!source.has_directory("node_modules"));
    }

    #[tokio::test]
    async fn test_ignored_files_stay_out_of_the_pull_request() {
        let dir = tempfile::tempdir().unwrap();
        write_app(dir.path());
        std::fs::create_dir_all(dir.path().join("dist")).unwrap();
        std::fs::write(dir.path().join("dist/index.html"), "<html></html>").unwrap();
        std::fs::write(dir.path().join(".env"), "API_TOKEN=secret").unwrap();
        std::fs::write(dir.path().join(".gitignore"), ".env\ndist/\n").unwrap();

        let repo = RepoRef::parse("org/app").unwrap();
        let tracker = Arc::new(MemoryTracker::new().with_issue(&repo, 42, "Add a header", "Add a header"));
        let factory_tracker = tracker.clone();
        let agent = Arc::new(ScriptedAgent::writing(vec![(
            "src/Header.vue".to_string(),
            "<template><h1/></template>".to_string(),
        )]));
        let dockhand = Dockhand::new(Arc::new(MemoryEngine::new()), agent, DockhandConfig::default())
            .with_tracker_factory(Arc::new(
                move |_: &TrackerCredential| -> TrackerResult<Arc<dyn Tracker>> {
                    Ok(factory_tracker.clone() as Arc<dyn Tracker>)
                },
            ));

        cmd_develop_issue(&dockhand, dir.path(), &TrackerCredential::new("ghp_test"), 42, "org/app")
            .await
            .unwrap();

        let submitted = tracker.submitted();
        let snapshot = &submitted[0].1.snapshot;
        assert!(snapshot.file("src/Header.vue").is_some());
        assert!(snapshot.file(".gitignore").is_some());
        assert!(snapshot.file(".env").is_none());
        assert!(!snapshot.has_directory("dist"));
        assert!(!snapshot.has_directory("node_modules"));
    }

    #[test]
    fn test_agent_command_override() {
        let engine: Arc<dyn Engine> = Arc::new(MemoryEngine::new());
        assert!(dockhand_with_agent(engine.clone(), DockhandConfig::default(), None).is_err());

        let dockhand = dockhand_with_agent(
            engine,
            DockhandConfig::default(),
            Some("my-agent --model 'fast one'"),
        );
        assert!(dockhand.is_ok());
    }

    #[test]
    fn test_cli_parses_develop_issue() {
        let cli = Cli::try_parse_from([
            "dockhand",
            "develop-issue",
            "--issue",
            "42",
            "--repo",
            "org/app",
            "--token",
            "ghp_test",
        ])
        .unwrap();
        match cli.command {
            Commands::DevelopIssue { issue, repo, .. } => {
                assert_eq!(issue, 42);
                assert_eq!(repo, "org/app");
            }
            _ => panic!("expected develop-issue"),
        }
    }

    #[tokio::test]
    async fn test_cmd_build_succeeds_with_output() {
        let dir = tempfile::tempdir().unwrap();
        write_app(dir.path());
        let engine = Arc::new(MemoryEngine::new().on_exec(["npm", "run", "build"], |ctx| {
            let built = ctx
                .source
                .clone()
                .unwrap_or_default()
                .with_file("dist/index.html", "<html></html>")
                .unwrap();
            ScriptedExec {
                source: Some(built),
                ..ScriptedExec::default()
            }
        }));
        let pipeline = Pipeline::new(engine, DockhandConfig::default());

        let result = cmd_build(&pipeline, dir.path()).await;
        assert!(result.is_ok(), "Build failed: {:?}", result.err());
    }

    #[tokio::test]
    async fn test_cmd_develop_writes_result() {
        let dir = tempfile::tempdir().unwrap();
        write_app(dir.path());
        let out = tempfile::tempdir().unwrap();

        let engine = Arc::new(MemoryEngine::new());
        let agent = Arc::new(ScriptedAgent::writing(vec![(
            "src/Header.vue".to_string(),
            "<template><h1/></template>".to_string(),
        )]));
        let dockhand = Dockhand::new(engine, agent, DockhandConfig::default());

        cmd_develop(&dockhand, dir.path(), "Add a header", out.path())
            .await
            .unwrap();
        assert!(out.path().join("src/Header.vue").exists());
        assert!(!out.path().join("node_modules").exists());
    }
}

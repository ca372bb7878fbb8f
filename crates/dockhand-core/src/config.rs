//! Dockhand configuration.
//!
//! Defaults reproduce the stock Node pipeline. A TOML file can override any
//! subset of fields, and `DOCKHAND_*` environment variables override both.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{DockhandError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockhandConfig {
    pub environment: EnvironmentConfig,
    pub build: BuildConfig,
    pub publish: PublishConfig,
    pub agent: AgentConfig,
    pub tracker: TrackerConfig,
    /// Per-operation timeout in seconds. Unset means no limit.
    pub timeout_secs: Option<u64>,
}

/// How the execution environment is assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub base_image: String,
    pub mount_path: String,
    pub cache_key: String,
    pub cache_path: String,
    pub install_command: Vec<String>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            base_image: "node:21-slim".to_string(),
            mount_path: "/src".to_string(),
            cache_key: "node".to_string(),
            cache_path: "/root/.npm".to_string(),
            install_command: argv(&["npm", "install"]),
        }
    }
}

/// Test and build commands and the serving image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub test_command: Vec<String>,
    pub build_command: Vec<String>,
    /// Build output directory, relative to the mount path.
    pub output_dir: String,
    pub serve_image: String,
    pub serve_path: String,
    pub port: u16,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            test_command: argv(&["npm", "run", "test:unit", "run"]),
            build_command: argv(&["npm", "run", "build"]),
            output_dir: "./dist".to_string(),
            serve_image: "nginx:1.25-alpine".to_string(),
            serve_path: "/usr/share/nginx/html".to_string(),
            port: 80,
        }
    }
}

/// How published image tags are chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TagStrategy {
    /// A uniformly random integer in `0..upper`.
    BoundedRandom { upper: u64 },
    /// A random v4 UUID in simple form.
    Uuid,
}

impl Default for TagStrategy {
    fn default() -> Self {
        TagStrategy::BoundedRandom { upper: 10_000_000 }
    }
}

/// Where images are published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Registry address; `{tag}` is replaced by the generated tag.
    pub address_template: String,
    pub tag: TagStrategy,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            address_template: "ttl.sh/hello-dagger-{tag}".to_string(),
            tag: TagStrategy::default(),
        }
    }
}

/// Agent session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Prompt document to load. Unset uses the bundled develop prompt.
    pub prompt_path: Option<PathBuf>,
    /// Directory stripped from the agent's result before validation.
    pub dependency_dir: String,
    /// Attempts allowed before a failing validation is final.
    pub max_validation_attempts: u32,
    /// Command for the process-backed agent.
    pub command: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            prompt_path: None,
            dependency_dir: "node_modules".to_string(),
            max_validation_attempts: 1,
            command: Vec::new(),
        }
    }
}

/// Issue tracker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub api_base: String,
    pub default_branch: String,
    pub head_branch_prefix: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api_base: crate::tracker::github::DEFAULT_API_BASE.to_string(),
            default_branch: "main".to_string(),
            head_branch_prefix: "dockhand/issue".to_string(),
        }
    }
}

impl DockhandConfig {
    /// Defaults overlaid with `DOCKHAND_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Read a TOML file, then overlay `DOCKHAND_*` environment variables.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DockhandError::Config(format!("{}: {e}", path.display())))?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| DockhandError::Config(format!("{}: {e}", path.display())))?;
        config.overlay(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a variable lookup.
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DOCKHAND_BASE_IMAGE") {
            self.environment.base_image = v;
        }
        if let Some(v) = lookup("DOCKHAND_CACHE_KEY") {
            self.environment.cache_key = v;
        }
        if let Some(v) = lookup("DOCKHAND_INSTALL_COMMAND") {
            self.environment.install_command = split_command("DOCKHAND_INSTALL_COMMAND", &v)?;
        }
        if let Some(v) = lookup("DOCKHAND_TEST_COMMAND") {
            self.build.test_command = split_command("DOCKHAND_TEST_COMMAND", &v)?;
        }
        if let Some(v) = lookup("DOCKHAND_BUILD_COMMAND") {
            self.build.build_command = split_command("DOCKHAND_BUILD_COMMAND", &v)?;
        }
        if let Some(v) = lookup("DOCKHAND_PUBLISH_ADDRESS") {
            self.publish.address_template = v;
        }
        let strategy = lookup("DOCKHAND_TAG_STRATEGY");
        if let Some(v) = &strategy {
            self.publish.tag = match v.as_str() {
                "uuid" => TagStrategy::Uuid,
                "random" => TagStrategy::default(),
                other => {
                    return Err(DockhandError::Config(format!(
                        "DOCKHAND_TAG_STRATEGY: unknown strategy `{other}`"
                    )))
                }
            };
        }
        if let Some(v) = lookup("DOCKHAND_TAG_UPPER") {
            if strategy.as_deref() == Some("uuid") {
                return Err(DockhandError::Config(
                    "DOCKHAND_TAG_UPPER applies to random tags only, not DOCKHAND_TAG_STRATEGY=uuid"
                        .into(),
                ));
            }
            let upper = parse_number("DOCKHAND_TAG_UPPER", &v)?;
            self.publish.tag = TagStrategy::BoundedRandom { upper };
        }
        if let Some(v) = lookup("DOCKHAND_AGENT_COMMAND") {
            self.agent.command = split_command("DOCKHAND_AGENT_COMMAND", &v)?;
        }
        if let Some(v) = lookup("DOCKHAND_PROMPT_PATH") {
            self.agent.prompt_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("DOCKHAND_MAX_VALIDATION_ATTEMPTS") {
            self.agent.max_validation_attempts =
                parse_number("DOCKHAND_MAX_VALIDATION_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("DOCKHAND_GITHUB_API") {
            self.tracker.api_base = v;
        }
        if let Some(v) = lookup("DOCKHAND_DEFAULT_BRANCH") {
            self.tracker.default_branch = v;
        }
        if let Some(v) = lookup("DOCKHAND_TIMEOUT_SECS") {
            self.timeout_secs = Some(parse_number("DOCKHAND_TIMEOUT_SECS", &v)?);
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.environment.install_command.is_empty() {
            return Err(DockhandError::Config("install command is empty".into()));
        }
        if self.build.test_command.is_empty() || self.build.build_command.is_empty() {
            return Err(DockhandError::Config("test and build commands must be set".into()));
        }
        if !self.publish.address_template.contains("{tag}") {
            return Err(DockhandError::Config(format!(
                "publish address `{}` has no {{tag}} placeholder",
                self.publish.address_template
            )));
        }
        if let TagStrategy::BoundedRandom { upper } = self.publish.tag {
            if upper < 2 {
                return Err(DockhandError::Config(
                    "random tag upper bound must be at least 2".into(),
                ));
            }
        }
        if self.agent.max_validation_attempts == 0 {
            return Err(DockhandError::Config(
                "max_validation_attempts must be at least 1".into(),
            ));
        }
        if self.timeout_secs == Some(0) {
            return Err(DockhandError::Config("timeout must be positive".into()));
        }
        Ok(())
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Split a command line into argv without invoking a shell.
pub fn split_command(name: &str, raw: &str) -> Result<Vec<String>> {
    let args = shell_words::split(raw)
        .map_err(|e| DockhandError::Config(format!("{name}: cannot parse `{raw}`: {e}")))?;
    if args.is_empty() {
        return Err(DockhandError::Config(format!("{name}: command is empty")));
    }
    Ok(args)
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| DockhandError::Config(format!("{name}: `{raw}` is not a valid number")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_stock_pipeline() {
        let config = DockhandConfig::default();
        assert_eq!(config.environment.base_image, "node:21-slim");
        assert_eq!(config.environment.cache_key, "node");
        assert_eq!(config.environment.cache_path, "/root/.npm");
        assert_eq!(config.build.test_command, vec!["npm", "run", "test:unit", "run"]);
        assert_eq!(config.build.serve_image, "nginx:1.25-alpine");
        assert_eq!(config.build.port, 80);
        assert_eq!(config.publish.address_template, "ttl.sh/hello-dagger-{tag}");
        assert_eq!(
            config.publish.tag,
            TagStrategy::BoundedRandom { upper: 10_000_000 }
        );
        assert_eq!(config.agent.dependency_dir, "node_modules");
        assert_eq!(config.agent.max_validation_attempts, 1);
        assert_eq!(config.tracker.default_branch, "main");
        config.validate().unwrap();
    }

    #[test]
    fn overlay_applies_variables() {
        let config = DockhandConfig::default()
            .overlay(lookup(&[
                ("DOCKHAND_AGENT_COMMAND", "coder --prompt-stdin 'two words'"),
                ("DOCKHAND_TAG_STRATEGY", "uuid"),
                ("DOCKHAND_MAX_VALIDATION_ATTEMPTS", "3"),
                ("DOCKHAND_TIMEOUT_SECS", "600"),
            ]))
            .unwrap();
        assert_eq!(config.agent.command, vec!["coder", "--prompt-stdin", "two words"]);
        assert_eq!(config.publish.tag, TagStrategy::Uuid);
        assert_eq!(config.agent.max_validation_attempts, 3);
        assert_eq!(config.timeout_secs, Some(600));
    }

    #[test]
    fn overlay_rejects_bad_values() {
        for vars in [
            [("DOCKHAND_TAG_UPPER", "many")],
            [("DOCKHAND_MAX_VALIDATION_ATTEMPTS", "0")],
            [("DOCKHAND_PUBLISH_ADDRESS", "ttl.sh/fixed")],
            [("DOCKHAND_AGENT_COMMAND", "coder 'unterminated")],
            [("DOCKHAND_TAG_STRATEGY", "sequential")],
        ] {
            let result = DockhandConfig::default().overlay(lookup(&vars));
            assert!(matches!(result, Err(DockhandError::Config(_))), "{vars:?}");
        }
    }

    #[test]
    fn overlay_rejects_upper_bound_with_uuid_tags() {
        let result = DockhandConfig::default().overlay(lookup(&[
            ("DOCKHAND_TAG_STRATEGY", "uuid"),
            ("DOCKHAND_TAG_UPPER", "500"),
        ]));
        assert!(matches!(result, Err(DockhandError::Config(_))));

        let random = DockhandConfig::default()
            .overlay(lookup(&[
                ("DOCKHAND_TAG_STRATEGY", "random"),
                ("DOCKHAND_TAG_UPPER", "500"),
            ]))
            .unwrap();
        assert_eq!(random.publish.tag, TagStrategy::BoundedRandom { upper: 500 });
    }

    #[test]
    fn load_merges_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dockhand.toml");
        std::fs::write(
            &path,
            r#"
timeout_secs = 120

[publish]
address_template = "registry.example.com/app:{tag}"

[publish.tag]
kind = "uuid"

[build]
port = 8080
"#,
        )
        .unwrap();

        let config = DockhandConfig::load(&path).unwrap();
        assert_eq!(config.timeout_secs, Some(120));
        assert_eq!(config.publish.tag, TagStrategy::Uuid);
        assert_eq!(config.build.port, 8080);
        assert_eq!(config.build.serve_image, "nginx:1.25-alpine");
    }
}

//! Pipeline stage definitions.

use dockhand_core::DockhandConfig;
use serde::{Deserialize, Serialize};

/// Builtin pipeline stages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinStage {
    /// npm install
    Install,

    /// npm run test:unit run
    UnitTest,

    /// npm run build
    Build,
}

impl BuiltinStage {
    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinStage::Install => "install",
            BuiltinStage::UnitTest => "unit_test",
            BuiltinStage::Build => "build",
        }
    }

    /// Get the stage's command under `config`.
    pub fn command<'a>(&self, config: &'a DockhandConfig) -> &'a [String] {
        match self {
            BuiltinStage::Install => &config.environment.install_command,
            BuiltinStage::UnitTest => &config.build.test_command,
            BuiltinStage::Build => &config.build.build_command,
        }
    }
}

/// A stage resolved against a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Human-readable stage name.
    pub name: String,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,
}

impl StageConfig {
    /// Create a stage configuration from a builtin stage.
    pub fn from_builtin(stage: BuiltinStage, config: &DockhandConfig) -> Self {
        Self {
            name: stage.name().to_string(),
            command: stage.command(config).to_vec(),
        }
    }
}

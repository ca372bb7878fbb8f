//! Instructional prompt documents.

use std::path::Path;

use super::binding::AgentEnv;
use super::error::{AgentError, AgentResult};

/// A named markdown prompt attached to an agent run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptDocument {
    name: String,
    body: String,
}

impl PromptDocument {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
        }
    }

    /// Read a prompt from disk. Empty files are rejected.
    pub async fn load(path: &Path) -> AgentResult<Self> {
        let body = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AgentError::Prompt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if body.trim().is_empty() {
            return Err(AgentError::Prompt {
                path: path.to_path_buf(),
                reason: "prompt is empty".to_string(),
            });
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { name, body })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// The prompt followed by a description of the environment's bindings.
    pub fn render(&self, env: &AgentEnv) -> String {
        format!("{}\n\n{}", self.body.trim_end(), env.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_reads_file_and_names_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("develop_prompt.md");
        std::fs::write(&path, "You are a developer.\n").unwrap();

        let prompt = PromptDocument::load(&path).await.unwrap();
        assert_eq!(prompt.name(), "develop_prompt.md");
        assert_eq!(prompt.body(), "You are a developer.\n");
    }

    #[tokio::test]
    async fn load_rejects_missing_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.md");
        assert!(matches!(
            PromptDocument::load(&missing).await,
            Err(AgentError::Prompt { .. })
        ));

        let empty = dir.path().join("empty.md");
        std::fs::write(&empty, "  \n").unwrap();
        assert!(matches!(
            PromptDocument::load(&empty).await,
            Err(AgentError::Prompt { .. })
        ));
    }

    #[test]
    fn render_appends_bindings() {
        let env = AgentEnv::new().with_string_input("assignment", "fix it", "the assignment");
        let text = PromptDocument::new("p", "Do the work.\n").render(&env);
        assert!(text.starts_with("Do the work.\n\n## Inputs"));
        assert!(text.contains("fix it"));
    }
}

//! Typed input/output bindings handed to an agent.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{AgentError, AgentResult};
use super::workspace::Workspace;

/// The kind of value a binding carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    String,
    Workspace,
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingKind::String => write!(f, "string"),
            BindingKind::Workspace => write!(f, "workspace"),
        }
    }
}

/// A bound value: a plain string or a workspace capability.
#[derive(Debug, Clone)]
pub enum Binding {
    String(String),
    Workspace(Workspace),
}

impl Binding {
    pub fn kind(&self) -> BindingKind {
        match self {
            Binding::String(_) => BindingKind::String,
            Binding::Workspace(_) => BindingKind::Workspace,
        }
    }
}

/// A named declaration with its description and, once bound, its value.
#[derive(Debug, Clone)]
pub struct Slot {
    pub name: String,
    pub description: String,
    pub kind: BindingKind,
    value: Option<Binding>,
}

impl Slot {
    pub fn value(&self) -> Option<&Binding> {
        self.value.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.value.is_some()
    }
}

/// A resolved binding looked up by name.
#[derive(Debug, Clone, Copy)]
pub struct BoundValue<'a> {
    name: &'a str,
    value: &'a Binding,
}

impl<'a> BoundValue<'a> {
    pub fn as_str(&self) -> AgentResult<&'a str> {
        match self.value {
            Binding::String(s) => Ok(s),
            other => Err(self.mismatch(BindingKind::String, other)),
        }
    }

    pub fn as_workspace(&self) -> AgentResult<&'a Workspace> {
        match self.value {
            Binding::Workspace(w) => Ok(w),
            other => Err(self.mismatch(BindingKind::Workspace, other)),
        }
    }

    fn mismatch(&self, expected: BindingKind, actual: &Binding) -> AgentError {
        AgentError::KindMismatch {
            name: self.name.to_string(),
            expected,
            actual: actual.kind(),
        }
    }
}

/// Named inputs and outputs for one agent session.
///
/// Inputs are populated up front and never change. Outputs start empty and
/// must be bound by the agent before it reports completion.
#[derive(Debug, Clone, Default)]
pub struct AgentEnv {
    privileged: bool,
    inputs: Vec<Slot>,
    outputs: Vec<Slot>,
}

impl AgentEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow the agent to run privileged commands in its workspaces.
    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    pub fn with_string_input(
        self,
        name: impl Into<String>,
        value: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.with_input(name.into(), description.into(), Binding::String(value.into()))
    }

    pub fn with_workspace_input(
        self,
        name: impl Into<String>,
        workspace: Workspace,
        description: impl Into<String>,
    ) -> Self {
        self.with_input(name.into(), description.into(), Binding::Workspace(workspace))
    }

    pub fn with_string_output(self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.with_output(name.into(), description.into(), BindingKind::String)
    }

    pub fn with_workspace_output(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.with_output(name.into(), description.into(), BindingKind::Workspace)
    }

    fn with_input(mut self, name: String, description: String, value: Binding) -> Self {
        self.inputs.retain(|s| s.name != name);
        self.inputs.push(Slot {
            name,
            description,
            kind: value.kind(),
            value: Some(value),
        });
        self
    }

    fn with_output(mut self, name: String, description: String, kind: BindingKind) -> Self {
        self.outputs.retain(|s| s.name != name);
        self.outputs.push(Slot {
            name,
            description,
            kind,
            value: None,
        });
        self
    }

    pub fn inputs(&self) -> &[Slot] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Slot] {
        &self.outputs
    }

    /// Look up an input binding.
    pub fn input(&self, name: &str) -> AgentResult<BoundValue<'_>> {
        let slot = self
            .inputs
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| AgentError::UnknownBinding {
                name: name.to_string(),
            })?;
        let value = slot.value.as_ref().ok_or_else(|| AgentError::MissingOutput {
            name: name.to_string(),
        })?;
        Ok(BoundValue {
            name: &slot.name,
            value,
        })
    }

    /// Look up a populated output binding.
    pub fn output(&self, name: &str) -> AgentResult<BoundValue<'_>> {
        let slot = self
            .outputs
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| AgentError::UnknownBinding {
                name: name.to_string(),
            })?;
        let value = slot.value.as_ref().ok_or_else(|| AgentError::MissingOutput {
            name: name.to_string(),
        })?;
        Ok(BoundValue {
            name: &slot.name,
            value,
        })
    }

    /// Bind a declared output. The value kind must match the declaration.
    pub fn bind_output(&mut self, name: &str, value: Binding) -> AgentResult<()> {
        if self.inputs.iter().any(|s| s.name == name) {
            return Err(AgentError::InputImmutable {
                name: name.to_string(),
            });
        }
        let slot = self
            .outputs
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| AgentError::UnknownBinding {
                name: name.to_string(),
            })?;
        if slot.kind != value.kind() {
            return Err(AgentError::KindMismatch {
                name: name.to_string(),
                expected: slot.kind,
                actual: value.kind(),
            });
        }
        slot.value = Some(value);
        Ok(())
    }

    /// The first string input, typically the assignment.
    pub fn primary_text(&self) -> Option<&str> {
        self.inputs.iter().find_map(|slot| match &slot.value {
            Some(Binding::String(s)) => Some(s.as_str()),
            _ => None,
        })
    }

    /// The first workspace input.
    pub fn primary_workspace(&self) -> Option<&Workspace> {
        self.inputs.iter().find_map(|slot| match &slot.value {
            Some(Binding::Workspace(w)) => Some(w),
            _ => None,
        })
    }

    /// Bind `workspace` to every declared workspace output.
    pub fn bind_workspace_outputs(&mut self, workspace: &Workspace) {
        for slot in &mut self.outputs {
            if slot.kind == BindingKind::Workspace {
                slot.value = Some(Binding::Workspace(workspace.clone()));
            }
        }
    }

    /// Names of declared outputs that are still unbound.
    pub fn missing_outputs(&self) -> Vec<&str> {
        self.outputs
            .iter()
            .filter(|s| !s.is_bound())
            .map(|s| s.name.as_str())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.outputs.iter().all(Slot::is_bound)
    }

    /// Markdown description of every binding, for inclusion in a prompt.
    pub fn describe(&self) -> String {
        let mut out = String::from("## Inputs\n");
        for slot in &self.inputs {
            match &slot.value {
                Some(Binding::String(s)) => {
                    out.push_str(&format!("- `{}` ({}): {}\n\n", slot.name, slot.description, s));
                }
                _ => out.push_str(&format!(
                    "- `{}` ({}, {})\n",
                    slot.name, slot.kind, slot.description
                )),
            }
        }
        out.push_str("\n## Outputs\n");
        for slot in &self.outputs {
            out.push_str(&format!(
                "- `{}` ({}, {})\n",
                slot.name, slot.kind, slot.description
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> AgentEnv {
        AgentEnv::new()
            .privileged(true)
            .with_string_input("assignment", "add a footer", "the assignment to complete")
            .with_string_output("summary", "what changed")
    }

    #[test]
    fn string_inputs_resolve() {
        let env = env();
        assert!(env.is_privileged());
        assert_eq!(env.input("assignment").unwrap().as_str().unwrap(), "add a footer");
    }

    #[test]
    fn unbound_output_is_missing() {
        let env = env();
        assert!(!env.is_complete());
        assert_eq!(env.missing_outputs(), vec!["summary"]);
        assert!(matches!(
            env.output("summary"),
            Err(AgentError::MissingOutput { .. })
        ));
    }

    #[test]
    fn bind_output_checks_kind_and_declaration() {
        let mut env = env();
        env.bind_output("summary", Binding::String("done".into()))
            .unwrap();
        assert!(env.is_complete());
        assert_eq!(env.output("summary").unwrap().as_str().unwrap(), "done");

        assert!(matches!(
            env.bind_output("nope", Binding::String("x".into())),
            Err(AgentError::UnknownBinding { .. })
        ));
        assert!(matches!(
            env.bind_output("assignment", Binding::String("x".into())),
            Err(AgentError::InputImmutable { .. })
        ));
    }

    #[test]
    fn wrong_kind_accessor_is_rejected() {
        let env = env();
        let err = env.input("assignment").unwrap().as_workspace().unwrap_err();
        assert!(matches!(
            err,
            AgentError::KindMismatch {
                expected: BindingKind::Workspace,
                actual: BindingKind::String,
                ..
            }
        ));
    }

    #[test]
    fn redeclaring_replaces_binding() {
        let env = AgentEnv::new()
            .with_string_input("assignment", "first", "d")
            .with_string_input("assignment", "second", "d");
        assert_eq!(env.inputs().len(), 1);
        assert_eq!(env.input("assignment").unwrap().as_str().unwrap(), "second");
    }

    #[test]
    fn primary_text_is_first_string_input() {
        let env = env().with_string_input("style", "terse", "tone");
        assert_eq!(env.primary_text(), Some("add a footer"));
        assert!(env.primary_workspace().is_none());
    }

    #[test]
    fn describe_lists_every_binding() {
        let text = env().describe();
        assert!(text.contains("`assignment`"));
        assert!(text.contains("add a footer"));
        assert!(text.contains("`summary` (string, what changed)"));
    }
}

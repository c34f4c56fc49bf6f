//! Tool registry and trait definitions.
//!
//! Each tool is a self-contained module implementing the [`Tool`] trait.
//! The registry is assembled by a builder at process start and frozen; there
//! is no way to register a tool afterwards. Side-effecting executions only
//! ever run inside the reality verifier.

mod delete_file;
mod edit_file;
mod list_files;
mod read_file;
mod run_command;
mod write_file;

pub use delete_file::DeleteFileTool;
pub use edit_file::EditFileTool;
pub use list_files::ListFilesTool;
pub use read_file::ReadFileTool;
pub use run_command::{parse_exit_code, RunCommandTool};
pub use write_file::WriteFileTool;

use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::ErrorKind;
use crate::domain::models::task::AgentRole;
use crate::domain::ports::generative::ToolDescriptor;

/// Intended filesystem effect declared by a tool execution, checked by the
/// reality verifier before any event is emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    Create {
        path: String,
        byte_size: u64,
        sha256: String,
    },
    Update {
        path: String,
        byte_size: u64,
        sha256: String,
    },
    Delete {
        path: String,
    },
}

impl SideEffect {
    pub fn path(&self) -> &str {
        match self {
            Self::Create { path, .. } | Self::Update { path, .. } | Self::Delete { path } => path,
        }
    }
}

/// Raw result of a tool execution, before verification.
#[derive(Debug, Clone)]
pub struct ToolExecution {
    pub success: bool,
    pub result: String,
    pub error: Option<(ErrorKind, String)>,
    pub side_effects: Vec<SideEffect>,
}

impl ToolExecution {
    pub fn ok(result: impl Into<String>, side_effects: Vec<SideEffect>) -> Self {
        Self {
            success: true,
            result: result.into(),
            error: None,
            side_effects,
        }
    }

    pub fn fail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            success: false,
            result: String::new(),
            error: Some((kind, detail.into())),
            side_effects: Vec::new(),
        }
    }
}

/// Timeout class of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    FileOp,
    Command,
    ReadOnly,
}

/// A named capability an agent can invoke.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name (e.g. "write_file").
    fn name(&self) -> &'static str;

    /// Human-readable description sent to the model.
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters.
    fn input_schema(&self) -> Value;

    fn kind(&self) -> ToolKind;

    /// Execute against the repository root. Paths in `args` are
    /// repo-relative; implementations must resolve them through
    /// [`crate::services::verifier::resolve_repo_path`].
    async fn execute(
        &self,
        args: Value,
        repo_root: &Path,
        cancel: &CancellationToken,
    ) -> ToolExecution;
}

/// Immutable registry of tools, built once at startup.
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder { tools: Vec::new() }
    }

    /// The standard registry: every built-in tool.
    pub fn standard() -> Self {
        Self::builder()
            .register(ReadFileTool)
            .register(ListFilesTool)
            .register(WriteFileTool)
            .register(EditFileTool)
            .register(DeleteFileTool)
            .register(RunCommandTool)
            .build()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Descriptors for the tool set a role is allowed to use.
    ///
    /// Coders get the full set; qa cannot write; docs may edit but never
    /// create or delete; the planner only reads.
    pub fn descriptors_for(&self, role: AgentRole) -> Vec<ToolDescriptor> {
        self.allowed_names(role)
            .iter()
            .filter_map(|name| self.get(name))
            .map(|tool| ToolDescriptor {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    /// Whether a role may invoke the named tool.
    pub fn allowed(&self, role: AgentRole, name: &str) -> bool {
        self.allowed_names(role).contains(&name)
    }

    fn allowed_names(&self, role: AgentRole) -> &'static [&'static str] {
        match role {
            AgentRole::Planner => &["read_file", "list_files"],
            AgentRole::CoderBe | AgentRole::CoderFe | AgentRole::CoderInfra => &[
                "read_file",
                "list_files",
                "write_file",
                "edit_file",
                "delete_file",
                "run_command",
            ],
            AgentRole::Qa => &["read_file", "list_files", "run_command"],
            AgentRole::Docs => &["read_file", "list_files", "edit_file"],
        }
    }
}

/// Builder consumed by [`ToolRegistry::build`]; once built, the set is
/// sealed.
pub struct ToolRegistryBuilder {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistryBuilder {
    pub fn register(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn build(self) -> ToolRegistry {
        let mut tools: HashMap<&'static str, Arc<dyn Tool>> = HashMap::new();
        for tool in self.tools {
            tools.insert(tool.name(), tool);
        }
        ToolRegistry { tools }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_contents() {
        let registry = ToolRegistry::standard();
        for name in [
            "read_file",
            "list_files",
            "write_file",
            "edit_file",
            "delete_file",
            "run_command",
        ] {
            assert!(registry.get(name).is_some(), "missing tool {name}");
        }
        assert!(registry.get("bogus").is_none());
    }

    #[test]
    fn test_role_tool_policies() {
        let registry = ToolRegistry::standard();

        // Docs may edit but never create
        assert!(registry.allowed(AgentRole::Docs, "edit_file"));
        assert!(!registry.allowed(AgentRole::Docs, "write_file"));
        assert!(!registry.allowed(AgentRole::Docs, "delete_file"));

        // QA cannot write at all
        assert!(registry.allowed(AgentRole::Qa, "run_command"));
        assert!(!registry.allowed(AgentRole::Qa, "write_file"));

        // Planner only reads
        assert!(!registry.allowed(AgentRole::Planner, "run_command"));
        assert!(registry.allowed(AgentRole::Planner, "read_file"));

        // Coders get everything
        assert!(registry.allowed(AgentRole::CoderBe, "write_file"));
        assert!(registry.allowed(AgentRole::CoderInfra, "run_command"));
    }

    #[test]
    fn test_descriptors_match_policy() {
        let registry = ToolRegistry::standard();
        let docs_tools: Vec<String> = registry
            .descriptors_for(AgentRole::Docs)
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(docs_tools, vec!["read_file", "list_files", "edit_file"]);
    }
}

pub mod delete_file;
pub mod list_directory;
pub mod read_file;
pub mod write_file;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::agent::claude::ToolDefinition;
use crate::agent::FileChange;
use crate::error::Result;
use crate::workspace::manager::{is_git_internal, WorkspaceManager};

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn definition(&self) -> ToolDefinition;
    async fn execute(
        &self,
        workspace_root: &Path,
        input: serde_json::Value,
    ) -> Result<ToolOutput>;
}

pub enum ToolOutput {
    /// Normal text result returned to Claude.
    Success(String),
    /// Error result returned to Claude (the agent can recover).
    Error(String),
    /// The tool modified the working copy.
    Applied { message: String, change: FileChange },
}

/// Pull a required string parameter out of a tool input, or return a tool error.
macro_rules! require_param {
    ($input:expr, $name:literal) => {
        match $input[$name].as_str() {
            Some(value) => value,
            None => {
                return Ok($crate::agent::tools::ToolOutput::Error(format!(
                    "Missing '{}' parameter",
                    $name
                )))
            }
        }
    };
}
pub(crate) use require_param;

/// Resolve a tool path inside the workspace, as a tool error on failure.
pub(crate) fn verified_path(
    workspace_root: &Path,
    path_str: &str,
) -> std::result::Result<PathBuf, ToolOutput> {
    if is_git_internal(path_str) {
        return Err(ToolOutput::Error(format!(
            "Invalid path: {path_str} is inside git metadata"
        )));
    }
    WorkspaceManager::verify_path(workspace_root, Path::new(path_str))
        .map_err(|e| ToolOutput::Error(format!("Invalid path: {e}")))
}

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(max_file_size: usize) -> Self {
        let tools: Vec<Box<dyn Tool>> = vec![
            Box::new(read_file::ReadFileTool::new(max_file_size)),
            Box::new(list_directory::ListDirectoryTool),
            Box::new(write_file::WriteFileTool::new(max_file_size)),
            Box::new(delete_file::DeleteFileTool),
        ];

        Self { tools }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ChangeAction;
    use serde_json::json;

    #[test]
    fn test_registry_exposes_all_tools() {
        let registry = ToolRegistry::new(1024);
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["read_file", "list_directory", "write_file", "delete_file"]);
        assert!(registry.get("search_code").is_none());
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip_through_registry() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = ToolRegistry::new(1024);

        let out = registry
            .get("write_file")
            .unwrap()
            .execute(tmp.path(), json!({"path": "src/a.txt", "content": "hi"}))
            .await
            .unwrap();
        match out {
            ToolOutput::Applied { change, .. } => {
                assert_eq!(change.path, "src/a.txt");
                assert_eq!(
                    change.action,
                    ChangeAction::Write {
                        content: "hi".to_string()
                    }
                );
            }
            _ => panic!("expected applied change"),
        }

        let out = registry
            .get("read_file")
            .unwrap()
            .execute(tmp.path(), json!({"path": "src/a.txt"}))
            .await
            .unwrap();
        assert!(matches!(out, ToolOutput::Success(ref s) if s == "hi"));
    }

    #[tokio::test]
    async fn test_missing_param_is_tool_error() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = ToolRegistry::new(1024);
        let out = registry
            .get("delete_file")
            .unwrap()
            .execute(tmp.path(), json!({}))
            .await
            .unwrap();
        assert!(matches!(out, ToolOutput::Error(ref s) if s.contains("'path'")));
    }

    #[tokio::test]
    async fn test_traversal_is_tool_error() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = ToolRegistry::new(1024);
        let out = registry
            .get("write_file")
            .unwrap()
            .execute(tmp.path(), json!({"path": "../evil", "content": "x"}))
            .await
            .unwrap();
        assert!(matches!(out, ToolOutput::Error(_)));
    }
}

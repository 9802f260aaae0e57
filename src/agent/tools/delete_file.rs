use std::path::Path;

use async_trait::async_trait;
use serde_json::json;

use crate::agent::claude::ToolDefinition;
use crate::agent::tools::{require_param, verified_path, Tool, ToolOutput};
use crate::agent::FileChange;
use crate::error::Result;

pub struct DeleteFileTool;

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: "Remove a single file. Directories cannot be deleted.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "File path relative to the repository root"
                    }
                },
                "required": ["path"]
            }),
        }
    }

    async fn execute(
        &self,
        workspace_root: &Path,
        input: serde_json::Value,
    ) -> Result<ToolOutput> {
        let path_str = require_param!(input, "path");

        let full_path = match verified_path(workspace_root, path_str) {
            Ok(p) => p,
            Err(e) => return Ok(e),
        };

        if full_path.is_dir() {
            return Ok(ToolOutput::Error(format!(
                "{path_str} is a directory; delete its files one by one"
            )));
        }
        if !full_path.exists() {
            return Ok(ToolOutput::Error(format!("File not found: {path_str}")));
        }

        if let Err(e) = tokio::fs::remove_file(&full_path).await {
            return Ok(ToolOutput::Error(format!("Failed to delete {path_str}: {e}")));
        }
        Ok(ToolOutput::Applied {
            message: format!("Deleted {path_str}"),
            change: FileChange::delete(path_str),
        })
    }
}

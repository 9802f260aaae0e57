use std::path::Path;

use async_trait::async_trait;
use serde_json::json;

use crate::agent::claude::ToolDefinition;
use crate::agent::tools::{require_param, verified_path, Tool, ToolOutput};
use crate::agent::FileChange;
use crate::error::Result;

/// Creates or replaces a whole file.
pub struct WriteFileTool {
    max_file_size: usize,
}

impl WriteFileTool {
    pub fn new(max_file_size: usize) -> Self {
        Self { max_file_size }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: "Create a file or replace the full content of an existing one. Missing parent directories are created.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "File path relative to the repository root"
                    },
                    "content": {
                        "type": "string",
                        "description": "Complete file content after the change"
                    }
                },
                "required": ["path", "content"]
            }),
        }
    }

    async fn execute(
        &self,
        workspace_root: &Path,
        input: serde_json::Value,
    ) -> Result<ToolOutput> {
        let path_str = require_param!(input, "path");
        let content = require_param!(input, "content");

        if content.len() > self.max_file_size {
            return Ok(ToolOutput::Error(format!(
                "Content for {path_str} is {} bytes, over the {} byte limit",
                content.len(),
                self.max_file_size
            )));
        }

        let full_path = match verified_path(workspace_root, path_str) {
            Ok(p) => p,
            Err(e) => return Ok(e),
        };
        if full_path.is_dir() {
            return Ok(ToolOutput::Error(format!("{path_str} is a directory")));
        }

        let verb = if full_path.exists() { "Updated" } else { "Created" };
        if let Err(e) = tokio::fs::write(&full_path, content).await {
            return Ok(ToolOutput::Error(format!("Failed to write {path_str}: {e}")));
        }
        Ok(ToolOutput::Applied {
            message: format!("{verb} {path_str} ({} bytes)", content.len()),
            change: FileChange::write(path_str, content),
        })
    }
}

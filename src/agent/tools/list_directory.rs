use std::path::Path;

use async_trait::async_trait;
use serde_json::json;

use crate::agent::claude::ToolDefinition;
use crate::agent::tools::{verified_path, Tool, ToolOutput};
use crate::error::{AppError, Result};

const MAX_ENTRIES: usize = 500;

pub struct ListDirectoryTool;

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_directory".to_string(),
            description: "List a directory in the repository. Directories end with '/'. Hidden entries such as .git are omitted.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Relative directory path; defaults to the repository root"
                    }
                }
            }),
        }
    }

    async fn execute(
        &self,
        workspace_root: &Path,
        input: serde_json::Value,
    ) -> Result<ToolOutput> {
        let path_str = input["path"].as_str().unwrap_or(".");

        let full_path = match verified_path(workspace_root, path_str) {
            Ok(p) => p,
            Err(e) => return Ok(e),
        };

        if !full_path.is_dir() {
            return Ok(ToolOutput::Error(format!("Not a directory: {path_str}")));
        }

        let mut read_dir = tokio::fs::read_dir(&full_path)
            .await
            .map_err(|e| AppError::Workspace(format!("Failed to list {path_str}: {e}")))?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| AppError::Workspace(format!("Failed to list {path_str}: {e}")))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();

        if entries.is_empty() {
            return Ok(ToolOutput::Success("(empty)".to_string()));
        }
        let total = entries.len();
        entries.truncate(MAX_ENTRIES);
        let mut listing = entries.join("\n");
        if total > MAX_ENTRIES {
            listing.push_str(&format!("\n... {} more entries", total - MAX_ENTRIES));
        }
        Ok(ToolOutput::Success(listing))
    }
}

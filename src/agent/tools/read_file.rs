use std::path::Path;

use async_trait::async_trait;
use serde_json::json;

use crate::agent::claude::ToolDefinition;
use crate::agent::tools::{require_param, verified_path, Tool, ToolOutput};
use crate::error::{AppError, Result};

/// Reads a file from the working copy, optionally a 1-based inclusive line range.
pub struct ReadFileTool {
    max_file_size: usize,
}

impl ReadFileTool {
    pub fn new(max_file_size: usize) -> Self {
        Self { max_file_size }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".to_string(),
            description: "Read a file from the repository. Optionally restrict the result to a range of lines.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Relative path to the file from the repository root"
                    },
                    "start_line": {
                        "type": "integer",
                        "description": "First line to return (1-based, inclusive)"
                    },
                    "end_line": {
                        "type": "integer",
                        "description": "Last line to return (1-based, inclusive)"
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

        if !full_path.is_file() {
            return Ok(ToolOutput::Error(format!("File not found: {path_str}")));
        }

        let size = tokio::fs::metadata(&full_path)
            .await
            .map_err(|e| AppError::Workspace(format!("Failed to stat {path_str}: {e}")))?
            .len();
        if size > self.max_file_size as u64 {
            return Ok(ToolOutput::Error(format!(
                "{path_str} is {size} bytes, over the {} byte limit; request a line range instead",
                self.max_file_size
            )));
        }

        let content = match tokio::fs::read_to_string(&full_path).await {
            Ok(c) => c,
            Err(e) => return Ok(ToolOutput::Error(format!("Failed to read {path_str}: {e}"))),
        };

        let start = input["start_line"].as_u64();
        let end = input["end_line"].as_u64();
        if start.is_none() && end.is_none() {
            return Ok(ToolOutput::Success(content));
        }

        let start = start.unwrap_or(1).max(1) as usize;
        let end = end.map(|e| e as usize).unwrap_or(usize::MAX);
        if end < start {
            return Ok(ToolOutput::Error(format!(
                "end_line ({end}) is before start_line ({start})"
            )));
        }

        let selected: Vec<&str> = content
            .lines()
            .skip(start - 1)
            .take(end - start + 1)
            .collect();
        Ok(ToolOutput::Success(selected.join("\n")))
    }
}

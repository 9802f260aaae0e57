use std::path::Path;

use async_trait::async_trait;

use crate::agent::claude::{ClaudeClient, ContentBlock, Message, MessagesRequest, StopReason};
use crate::agent::prompt;
use crate::agent::tools::{ToolOutput, ToolRegistry};
use crate::agent::{CodeGenerator, FileChange, Generation};
use crate::config::ClaudeConfig;
use crate::error::{AppError, Result};
use crate::store::types::Ticket;

/// Generates changes by letting Claude edit the working copy through tools.
///
/// Tools write in place; every edit is also recorded as a [`FileChange`] so the
/// caller can re-apply the same set idempotently.
pub struct ClaudeGenerator {
    client: ClaudeClient,
    tools: ToolRegistry,
    max_turns: u32,
}

impl ClaudeGenerator {
    pub fn new(config: &ClaudeConfig) -> Self {
        Self {
            client: ClaudeClient::new(config),
            tools: ToolRegistry::new(config.max_file_size_bytes),
            max_turns: config.max_turns,
        }
    }

    async fn run_tool(
        &self,
        workspace_root: &Path,
        name: &str,
        input: &serde_json::Value,
    ) -> Result<ToolOutput> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| AppError::Generation(format!("Unknown tool: {name}")))?;
        tool.execute(workspace_root, input.clone()).await
    }
}

#[async_trait]
impl CodeGenerator for ClaudeGenerator {
    async fn generate(
        &self,
        ticket: &Ticket,
        working_copy: &Path,
        prior_feedback: Option<&str>,
    ) -> Result<Generation> {
        let system = prompt::system_prompt_for_ticket(ticket, prior_feedback);
        let tool_definitions = self.tools.definitions();
        let mut messages = vec![Message::user_text(prompt::initial_message(ticket))];
        let mut changes = ChangeLog::default();

        let mut total_input_tokens = 0u32;
        let mut total_output_tokens = 0u32;

        for turn in 0..self.max_turns {
            tracing::debug!(ticket_id = %ticket.id, turn, "Generator turn");

            let request = MessagesRequest {
                model: self.client.model().to_string(),
                max_tokens: self.client.max_tokens(),
                system: system.clone(),
                messages: messages.clone(),
                tools: tool_definitions.clone(),
            };

            let response = self
                .client
                .send_message(&request)
                .await
                .map_err(|e| AppError::Generation(format!("Claude request failed: {e}")))?;

            total_input_tokens += response.usage.input_tokens;
            total_output_tokens += response.usage.output_tokens;

            match response.stop_reason {
                Some(StopReason::EndTurn) => {
                    tracing::info!(
                        ticket_id = %ticket.id,
                        turns = turn + 1,
                        files = changes.len(),
                        total_input_tokens,
                        total_output_tokens,
                        "Generation completed"
                    );
                    return Ok(Generation {
                        changes: changes.into_vec(),
                        summary: extract_text(&response.content),
                    });
                }
                Some(StopReason::ToolUse) => {
                    let mut results = Vec::new();
                    for block in &response.content {
                        let ContentBlock::ToolUse { id, name, input } = block else {
                            continue;
                        };
                        let (content, is_error) =
                            match self.run_tool(working_copy, name, input).await {
                                Ok(ToolOutput::Success(text)) => (text, None),
                                Ok(ToolOutput::Applied { message, change }) => {
                                    tracing::debug!(tool = %name, path = %change.path, "Tool changed file");
                                    changes.record(change);
                                    (message, None)
                                }
                                Ok(ToolOutput::Error(error)) => {
                                    tracing::debug!(tool = %name, %error, "Tool returned error");
                                    (error, Some(true))
                                }
                                Err(e) => {
                                    tracing::warn!(tool = %name, error = %e, "Tool execution failed");
                                    (format!("Internal error: {e}"), Some(true))
                                }
                            };
                        results.push(ContentBlock::ToolResult {
                            tool_use_id: id.clone(),
                            content,
                            is_error,
                        });
                    }

                    messages.push(Message::assistant_blocks(response.content));
                    messages.push(Message::user_blocks(results));
                }
                Some(StopReason::MaxTokens) => {
                    tracing::warn!(ticket_id = %ticket.id, "Response hit max_tokens, continuing");
                    messages.push(Message::assistant_blocks(response.content));
                    messages.push(Message::user_text("Please continue."));
                }
                other => {
                    return Err(AppError::Generation(format!(
                        "Unexpected stop reason: {other:?}"
                    )));
                }
            }
        }

        Err(AppError::Generation(format!(
            "No result after {} turns",
            self.max_turns
        )))
    }
}

/// Changes made during one generation, last write per path wins.
#[derive(Default)]
struct ChangeLog {
    changes: Vec<FileChange>,
}

impl ChangeLog {
    fn record(&mut self, change: FileChange) {
        self.changes.retain(|c| c.path != change.path);
        self.changes.push(change);
    }

    fn len(&self) -> usize {
        self.changes.len()
    }

    fn into_vec(self) -> Vec<FileChange> {
        self.changes
    }
}

fn extract_text(content: &[ContentBlock]) -> String {
    content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

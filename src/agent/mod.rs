pub mod claude;
pub mod engine;
pub mod fixed;
pub mod prompt;
pub mod tools;

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{GeneratorConfig, GeneratorKind};
use crate::error::{AppError, Result};
use crate::store::types::Ticket;

use engine::ClaudeGenerator;
use fixed::FixedGenerator;

/// What to do with one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ChangeAction {
    Write { content: String },
    Delete,
}

/// A proposed change to a file, relative to the working-copy root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    pub path: String,
    #[serde(flatten)]
    pub action: ChangeAction,
}

impl FileChange {
    pub fn write(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            action: ChangeAction::Write {
                content: content.into(),
            },
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            action: ChangeAction::Delete,
        }
    }
}

/// Output of one generation attempt.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    pub changes: Vec<FileChange>,
    pub summary: String,
}

/// Turns a ticket into proposed file changes.
///
/// `prior_feedback` carries the reason the previous attempt was rejected, if any.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(
        &self,
        ticket: &Ticket,
        working_copy: &Path,
        prior_feedback: Option<&str>,
    ) -> Result<Generation>;
}

/// Generator strategy chosen from configuration at construction time.
pub enum Generator {
    Fixed(FixedGenerator),
    Claude(ClaudeGenerator),
}

impl Generator {
    pub fn from_config(config: &GeneratorConfig) -> Result<Self> {
        match config.kind {
            GeneratorKind::Fixed => Ok(Generator::Fixed(FixedGenerator::new(&config.fixed))),
            GeneratorKind::Claude => {
                let claude = config.claude.as_ref().ok_or_else(|| {
                    AppError::Config("Claude generator selected without [generator.claude]".to_string())
                })?;
                Ok(Generator::Claude(ClaudeGenerator::new(claude)))
            }
        }
    }
}

#[async_trait]
impl CodeGenerator for Generator {
    async fn generate(
        &self,
        ticket: &Ticket,
        working_copy: &Path,
        prior_feedback: Option<&str>,
    ) -> Result<Generation> {
        match self {
            Generator::Fixed(g) => g.generate(ticket, working_copy, prior_feedback).await,
            Generator::Claude(g) => g.generate(ticket, working_copy, prior_feedback).await,
        }
    }
}

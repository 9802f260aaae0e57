use std::path::Path;

use async_trait::async_trait;

use crate::agent::{CodeGenerator, FileChange, Generation};
use crate::config::FixedGeneratorConfig;
use crate::error::Result;
use crate::store::types::Ticket;

/// Proposes the same configured file set for every ticket.
#[derive(Debug, Clone)]
pub struct FixedGenerator {
    changes: Vec<FileChange>,
    summary: String,
}

impl FixedGenerator {
    pub fn new(config: &FixedGeneratorConfig) -> Self {
        Self {
            changes: config
                .files
                .iter()
                .map(|f| FileChange::write(f.path.clone(), f.content.clone()))
                .collect(),
            summary: config.summary.clone(),
        }
    }
}

#[async_trait]
impl CodeGenerator for FixedGenerator {
    async fn generate(
        &self,
        ticket: &Ticket,
        _working_copy: &Path,
        prior_feedback: Option<&str>,
    ) -> Result<Generation> {
        tracing::debug!(
            ticket_id = %ticket.id,
            files = self.changes.len(),
            has_feedback = prior_feedback.is_some(),
            "Fixed generator producing changes"
        );
        Ok(Generation {
            changes: self.changes.clone(),
            summary: self.summary.clone(),
        })
    }
}

//! Human review of a ticket that passed verification.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::notify::{LogLevel, Notifier, StatusUpdate};
use crate::store::types::{TicketMessage, TicketStatus};
use crate::store::TicketStore;
use crate::workflow::lock::WorkingCopyLocks;
use crate::workflow::types::WorkflowStatus;
use crate::workspace::{BranchManager, RepositorySync};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ValidationDecision {
    /// Accept the work; with `merge`, land the ticket branch on the default branch.
    Approve {
        #[serde(default)]
        merge: bool,
    },
    /// Send the ticket back with reviewer notes for the next run.
    Reject { feedback: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub ticket_id: String,
    pub status: TicketStatus,
    pub merged: bool,
    pub conflicts: Vec<String>,
    pub message: String,
}

pub struct ValidationHandler {
    store: Arc<dyn TicketStore>,
    sync: RepositorySync,
    notifier: Notifier,
    locks: WorkingCopyLocks,
    token: Option<String>,
}

impl ValidationHandler {
    pub fn new(
        store: Arc<dyn TicketStore>,
        sync: RepositorySync,
        notifier: Notifier,
        locks: WorkingCopyLocks,
        token: Option<String>,
    ) -> Self {
        Self {
            store,
            sync,
            notifier,
            locks,
            token,
        }
    }

    pub async fn validate(
        &self,
        ticket_id: &str,
        decision: ValidationDecision,
    ) -> Result<ValidationOutcome> {
        let ticket = self.store.get_ticket(ticket_id).await?;
        if ticket.status != TicketStatus::PendingValidation {
            return Err(AppError::InvalidState(format!(
                "ticket {ticket_id} is {}, expected {}",
                ticket.status,
                TicketStatus::PendingValidation
            )));
        }

        match decision {
            ValidationDecision::Reject { feedback } => {
                self.store
                    .append_message(ticket_id, TicketMessage::feedback(feedback))
                    .await?;
                self.store
                    .update_status(ticket_id, TicketStatus::Pending)
                    .await?;
                tracing::info!(ticket_id, "Validation rejected, ticket reopened");
                self.notifier
                    .status(StatusUpdate {
                        ticket_id: ticket_id.to_string(),
                        status: TicketStatus::Pending,
                        message: "Changes rejected by reviewer".to_string(),
                        step: None,
                        progress: None,
                        error: None,
                        data: None,
                    })
                    .await;
                Ok(ValidationOutcome {
                    ticket_id: ticket_id.to_string(),
                    status: TicketStatus::Pending,
                    merged: false,
                    conflicts: Vec::new(),
                    message: "Feedback recorded; the ticket will be retried".to_string(),
                })
            }
            ValidationDecision::Approve { merge } => {
                let mut merged = false;
                if merge {
                    let repository = self.store.get_repository(&ticket.repository_id).await?;
                    let branch = BranchManager::name_for(&ticket.id, &ticket.title);
                    let working_copy = self.sync.workspace().path_for(&repository.url)?;
                    let _guard = self.locks.acquire(&working_copy, &branch).await;
                    let token = self.token.as_deref();

                    self.sync.clone_or_pull(&repository.url, token, None).await?;
                    let outcome = self
                        .sync
                        .merge(&repository.url, &branch, &repository.default_branch, false, token)
                        .await?;

                    if !outcome.success {
                        if !outcome.conflicts.is_empty() {
                            self.sync.abort_merge(&repository.url).await?;
                        }
                        self.notifier
                            .log(ticket_id, LogLevel::Warning, outcome.message.clone())
                            .await;
                        return Ok(ValidationOutcome {
                            ticket_id: ticket_id.to_string(),
                            status: TicketStatus::PendingValidation,
                            merged: false,
                            conflicts: outcome.conflicts,
                            message: outcome.message,
                        });
                    }

                    self.sync
                        .push(&repository.url, &repository.default_branch, token, false)
                        .await?;
                    merged = true;
                    tracing::info!(
                        ticket_id,
                        branch = %branch,
                        target = %repository.default_branch,
                        "Merged ticket branch"
                    );
                }

                self.store
                    .update_status(ticket_id, TicketStatus::Completed)
                    .await?;
                self.notifier
                    .status(StatusUpdate::for_step(
                        ticket_id,
                        WorkflowStatus::Completed,
                        if merged {
                            "Approved and merged"
                        } else {
                            "Approved"
                        },
                    ))
                    .await;
                Ok(ValidationOutcome {
                    ticket_id: ticket_id.to_string(),
                    status: TicketStatus::Completed,
                    merged,
                    conflicts: Vec::new(),
                    message: if merged {
                        "Ticket branch merged and ticket completed".to_string()
                    } else {
                        "Ticket completed".to_string()
                    },
                })
            }
        }
    }
}

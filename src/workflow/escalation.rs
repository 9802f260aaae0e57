use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::store::types::{NewTicket, Priority, Ticket, TicketStatus, TicketType};
use crate::store::TicketStore;

/// Replaces a ticket whose run exhausted its retries with a new one for a human.
#[derive(Clone)]
pub struct EscalationHandler {
    store: Arc<dyn TicketStore>,
}

impl EscalationHandler {
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self { store }
    }

    /// Create the escalation ticket and mark the original `CANCELLED`.
    ///
    /// Returns the new ticket's id. If the ticket was created but the original
    /// could not be cancelled, the error is `EscalationIncomplete` and still
    /// carries the new id.
    pub async fn escalate(
        &self,
        original: &Ticket,
        errors: &[String],
        iteration_count: u32,
    ) -> Result<String> {
        let new_ticket = NewTicket {
            title: format!("[Escalated] {}", original.title),
            description: escalation_description(original, errors, iteration_count),
            ticket_type: TicketType::Task,
            priority: raised(original.priority),
            repository_id: original.repository_id.clone(),
        };

        let new_id = self.store.create_ticket(new_ticket).await?;
        if let Err(e) = self
            .store
            .update_status(&original.id, TicketStatus::Cancelled)
            .await
        {
            tracing::error!(
                ticket_id = %original.id,
                escalation_ticket_id = %new_id,
                error = %e,
                "Escalation ticket created but the original could not be cancelled"
            );
            return Err(AppError::EscalationIncomplete {
                escalation_ticket_id: new_id,
                reason: e.to_string(),
            });
        }

        tracing::warn!(
            ticket_id = %original.id,
            escalation_ticket_id = %new_id,
            iteration_count,
            "Escalated ticket after exhausting retries"
        );
        Ok(new_id)
    }
}

fn raised(priority: Priority) -> Priority {
    match priority {
        Priority::Low => Priority::Medium,
        Priority::Medium => Priority::High,
        Priority::High | Priority::Critical => Priority::Critical,
    }
}

fn escalation_description(original: &Ticket, errors: &[String], iteration_count: u32) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Automatic resolution of ticket {} gave up after {iteration_count} iterations.",
        original.id
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "## Original ticket");
    let _ = writeln!(out, "- ID: {}", original.id);
    let _ = writeln!(out, "- Title: {}", original.title);
    let _ = writeln!(out, "- Type: {}", original.ticket_type);
    let _ = writeln!(out, "- Priority: {}", original.priority);
    let _ = writeln!(out, "- Iterations: {iteration_count}");
    if !original.description.trim().is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", original.description.trim());
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "## Errors");
    if errors.is_empty() {
        let _ = writeln!(out, "(none recorded)");
    }
    for (i, error) in errors.iter().enumerate() {
        let _ = writeln!(out, "{}. {error}", i + 1);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::{Repository, TicketMessage};
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    /// Creates tickets normally but refuses every status change.
    struct FrozenStatusStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl TicketStore for FrozenStatusStore {
        async fn get_ticket(&self, ticket_id: &str) -> Result<Ticket> {
            self.inner.get_ticket(ticket_id).await
        }

        async fn get_repository(&self, repository_id: &str) -> Result<Repository> {
            self.inner.get_repository(repository_id).await
        }

        async fn update_status(&self, _ticket_id: &str, _status: TicketStatus) -> Result<()> {
            Err(AppError::Store("status column is read-only".to_string()))
        }

        async fn create_ticket(&self, ticket: NewTicket) -> Result<String> {
            self.inner.create_ticket(ticket).await
        }

        async fn append_message(&self, ticket_id: &str, message: TicketMessage) -> Result<()> {
            self.inner.append_message(ticket_id, message).await
        }

        async fn messages(&self, ticket_id: &str) -> Result<Vec<TicketMessage>> {
            self.inner.messages(ticket_id).await
        }
    }

    fn original() -> Ticket {
        Ticket {
            id: "abc12345-0000".to_string(),
            title: "Fix login bug!!".to_string(),
            description: "Users cannot log in".to_string(),
            ticket_type: TicketType::Bug,
            priority: Priority::High,
            repository_id: "repo-1".to_string(),
            status: TicketStatus::InProgress,
        }
    }

    #[tokio::test]
    async fn test_escalate_creates_ticket_and_cancels_original() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_repository(Repository {
                id: "repo-1".to_string(),
                url: "file:///tmp/x.git".to_string(),
                full_name: "acme/x".to_string(),
                default_branch: "main".to_string(),
            })
            .await;
        store.insert_ticket(original()).await;

        let handler = EscalationHandler::new(store.clone());
        let errors = vec![
            "[verifying] iteration 1: `make test` failed (exit 2)".to_string(),
            "[escalating] reached the limit of 1 iterations".to_string(),
        ];
        let new_id = handler.escalate(&original(), &errors, 1).await.unwrap();

        let escalated = store.get_ticket(&new_id).await.unwrap();
        assert_eq!(escalated.status, TicketStatus::Pending);
        assert_eq!(escalated.priority, Priority::Critical);
        assert_eq!(escalated.repository_id, "repo-1");
        assert!(escalated.description.contains("abc12345-0000"));
        assert!(escalated.description.contains("- Type: bug"));
        assert!(escalated.description.contains("- Priority: high"));
        assert!(escalated.description.contains("- Iterations: 1"));
        assert!(escalated.description.contains("1. [verifying]"));

        let cancelled = store.get_ticket("abc12345-0000").await.unwrap();
        assert_eq!(cancelled.status, TicketStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_failed_cancel_still_reports_new_ticket() {
        let inner = MemoryStore::new();
        inner.insert_ticket(original()).await;
        let store = Arc::new(FrozenStatusStore { inner });

        let handler = EscalationHandler::new(store.clone());
        let err = handler.escalate(&original(), &[], 3).await.unwrap_err();

        let AppError::EscalationIncomplete { escalation_ticket_id, .. } = err else {
            panic!("expected EscalationIncomplete, got {err:?}");
        };
        let escalated = store.get_ticket(&escalation_ticket_id).await.unwrap();
        assert_eq!(escalated.title, "[Escalated] Fix login bug!!");
        let untouched = store.get_ticket("abc12345-0000").await.unwrap();
        assert_eq!(untouched.status, TicketStatus::InProgress);
    }
}

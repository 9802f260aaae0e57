use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::{AppError, Result};
use crate::store::types::*;
use crate::store::TicketStore;

/// In-process ticket store, optionally seeded from a TOML file.
#[derive(Default)]
pub struct MemoryStore {
    tickets: RwLock<HashMap<String, Ticket>>,
    repositories: RwLock<HashMap<String, Repository>>,
    messages: RwLock<HashMap<String, Vec<TicketMessage>>>,
}

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    repositories: Vec<Repository>,
    #[serde(default)]
    tickets: Vec<Ticket>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a TOML document with `[[repositories]]` and `[[tickets]]`.
    pub fn from_toml(source: &str) -> Result<Self> {
        let seed: SeedFile =
            toml::from_str(source).map_err(|e| AppError::Store(format!("Invalid seed file: {e}")))?;

        let repositories = seed
            .repositories
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        let tickets = seed
            .tickets
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();

        Ok(Self {
            tickets: RwLock::new(tickets),
            repositories: RwLock::new(repositories),
            messages: RwLock::new(HashMap::new()),
        })
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let source = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::Store(format!("Failed to read seed file {}: {e}", path.display()))
        })?;
        Self::from_toml(&source)
    }

    pub async fn insert_repository(&self, repository: Repository) {
        self.repositories
            .write()
            .await
            .insert(repository.id.clone(), repository);
    }

    pub async fn insert_ticket(&self, ticket: Ticket) {
        self.tickets.write().await.insert(ticket.id.clone(), ticket);
    }

    /// Snapshot of every ticket, in no particular order.
    pub async fn tickets(&self) -> Vec<Ticket> {
        self.tickets.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl TicketStore for MemoryStore {
    async fn get_ticket(&self, ticket_id: &str) -> Result<Ticket> {
        self.tickets
            .read()
            .await
            .get(ticket_id)
            .cloned()
            .ok_or_else(|| AppError::TicketNotFound(ticket_id.to_string()))
    }

    async fn get_repository(&self, repository_id: &str) -> Result<Repository> {
        self.repositories
            .read()
            .await
            .get(repository_id)
            .cloned()
            .ok_or_else(|| AppError::RepositoryNotFound(repository_id.to_string()))
    }

    async fn update_status(&self, ticket_id: &str, status: TicketStatus) -> Result<()> {
        let mut tickets = self.tickets.write().await;
        let ticket = tickets
            .get_mut(ticket_id)
            .ok_or_else(|| AppError::TicketNotFound(ticket_id.to_string()))?;
        tracing::debug!(ticket_id, from = %ticket.status, to = %status, "Ticket status updated");
        ticket.status = status;
        Ok(())
    }

    async fn create_ticket(&self, ticket: NewTicket) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let ticket = Ticket {
            id: id.clone(),
            title: ticket.title,
            description: ticket.description,
            ticket_type: ticket.ticket_type,
            priority: ticket.priority,
            repository_id: ticket.repository_id,
            status: TicketStatus::Pending,
        };
        self.tickets.write().await.insert(id.clone(), ticket);
        Ok(id)
    }

    async fn append_message(&self, ticket_id: &str, message: TicketMessage) -> Result<()> {
        if !self.tickets.read().await.contains_key(ticket_id) {
            return Err(AppError::TicketNotFound(ticket_id.to_string()));
        }
        self.messages
            .write()
            .await
            .entry(ticket_id.to_string())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn messages(&self, ticket_id: &str) -> Result<Vec<TicketMessage>> {
        Ok(self
            .messages
            .read()
            .await
            .get(ticket_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = r#"
        [[repositories]]
        id = "repo-1"
        url = "https://github.com/acme/widgets.git"
        full_name = "acme/widgets"

        [[tickets]]
        id = "abc12345-0000-0000-0000-000000000000"
        title = "Fix login bug!!"
        description = "Users cannot log in"
        type = "bug"
        priority = "high"
        repository_id = "repo-1"
    "#;

    #[tokio::test]
    async fn test_seed_file_parses() {
        let store = MemoryStore::from_toml(SEED).unwrap();
        let ticket = store
            .get_ticket("abc12345-0000-0000-0000-000000000000")
            .await
            .unwrap();
        assert_eq!(ticket.ticket_type, TicketType::Bug);
        assert_eq!(ticket.priority, Priority::High);
        assert_eq!(ticket.status, TicketStatus::Pending);

        let repo = store.get_repository("repo-1").await.unwrap();
        assert_eq!(repo.default_branch, "main");
    }

    #[tokio::test]
    async fn test_missing_entities_are_typed_errors() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get_ticket("nope").await,
            Err(AppError::TicketNotFound(_))
        ));
        assert!(matches!(
            store.get_repository("nope").await,
            Err(AppError::RepositoryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_attempt_count_ignores_feedback() {
        let store = MemoryStore::from_toml(SEED).unwrap();
        let id = "abc12345-0000-0000-0000-000000000000";
        store.append_message(id, TicketMessage::attempt("run 1")).await.unwrap();
        store.append_message(id, TicketMessage::feedback("nope")).await.unwrap();
        store.append_message(id, TicketMessage::attempt("run 2")).await.unwrap();
        assert_eq!(store.attempt_count(id).await.unwrap(), 2);
        assert_eq!(store.messages(id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_create_ticket_starts_pending() {
        let store = MemoryStore::new();
        let id = store
            .create_ticket(NewTicket {
                title: "t".to_string(),
                description: "d".to_string(),
                ticket_type: TicketType::Task,
                priority: Priority::Low,
                repository_id: "repo-1".to_string(),
            })
            .await
            .unwrap();
        let ticket = store.get_ticket(&id).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Pending);
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&TicketStatus::PendingValidation).unwrap(),
            "\"PENDING_VALIDATION\""
        );
        assert_eq!(TicketStatus::InProgress.to_string(), "IN_PROGRESS");
    }
}

pub mod memory;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;
use types::*;

pub use memory::MemoryStore;

/// Persistent storage of tickets, their messages and repositories.
///
/// Passed into each component explicitly; implementations own their connection.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Fetch a ticket by id.
    async fn get_ticket(&self, ticket_id: &str) -> Result<Ticket>;

    /// Fetch a repository by id.
    async fn get_repository(&self, repository_id: &str) -> Result<Repository>;

    /// Overwrite the durable status of a ticket.
    async fn update_status(&self, ticket_id: &str, status: TicketStatus) -> Result<()>;

    /// Create a ticket and return its id.
    async fn create_ticket(&self, ticket: NewTicket) -> Result<String>;

    /// Append to a ticket's message history.
    async fn append_message(&self, ticket_id: &str, message: TicketMessage) -> Result<()>;

    /// All messages for a ticket, oldest first.
    async fn messages(&self, ticket_id: &str) -> Result<Vec<TicketMessage>>;

    /// Number of completed attempts recorded for a ticket.
    async fn attempt_count(&self, ticket_id: &str) -> Result<u32> {
        let messages = self.messages(ticket_id).await?;
        Ok(messages
            .iter()
            .filter(|m| m.kind == MessageKind::Attempt)
            .count() as u32)
    }
}

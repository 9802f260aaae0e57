use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable ticket status as surfaced to external observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    #[default]
    Pending,
    InProgress,
    PendingValidation,
    Completed,
    Cancelled,
    Failed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Pending => "PENDING",
            TicketStatus::InProgress => "IN_PROGRESS",
            TicketStatus::PendingValidation => "PENDING_VALIDATION",
            TicketStatus::Completed => "COMPLETED",
            TicketStatus::Cancelled => "CANCELLED",
            TicketStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TicketType {
    Feature,
    Bug,
    Improvement,
    #[default]
    Task,
}

impl fmt::Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TicketType::Feature => "feature",
            TicketType::Bug => "bug",
            TicketType::Improvement => "improvement",
            TicketType::Task => "task",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A unit of requested work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub ticket_type: TicketType,
    #[serde(default)]
    pub priority: Priority,
    pub repository_id: String,
    #[serde(default)]
    pub status: TicketStatus,
}

/// A remote repository tickets are resolved against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    pub url: String,
    /// `owner/name`
    pub full_name: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// One completed generate/verify cycle.
    Attempt,
    /// Reviewer feedback from a rejected validation.
    Feedback,
}

/// An entry in a ticket's append-only message history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketMessage {
    pub kind: MessageKind,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl TicketMessage {
    pub fn attempt(body: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Attempt,
            body: body.into(),
            created_at: Utc::now(),
        }
    }

    pub fn feedback(body: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Feedback,
            body: body.into(),
            created_at: Utc::now(),
        }
    }
}

/// Fields for a ticket the engine creates itself (escalations).
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub title: String,
    pub description: String,
    pub ticket_type: TicketType,
    pub priority: Priority,
    pub repository_id: String,
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Git operation failed: {0}")]
    Git(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Branch already exists: {0}")]
    BranchConflict(String),

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("Ticket not found: {0}")]
    TicketNotFound(String),

    #[error("Invalid ticket state: {0}")]
    InvalidState(String),

    #[error("Escalated as {escalation_ticket_id} but the original ticket was not cancelled: {reason}")]
    EscalationIncomplete {
        escalation_ticket_id: String,
        reason: String,
    },

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Claude API error: {0}")]
    ClaudeApi(String),

    #[error("GitHub API error: {0}")]
    GitHubApi(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<octocrab::Error> for AppError {
    fn from(e: octocrab::Error) -> Self {
        AppError::GitHubApi(e.to_string())
    }
}

impl From<git2::Error> for AppError {
    fn from(e: git2::Error) -> Self {
        AppError::Git(e.message().to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

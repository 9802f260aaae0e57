use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::platform::PullRequestResult;
use crate::store::types::TicketStatus;

/// Stage of a single ticket's workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Initialized,
    Preparing,
    ReadyForGeneration,
    Generating,
    Committing,
    Verifying,
    AwaitingValidation,
    Completed,
    Cancelled,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Preparing => "preparing",
            Self::ReadyForGeneration => "ready_for_generation",
            Self::Generating => "generating",
            Self::Committing => "committing",
            Self::Verifying => "verifying",
            Self::AwaitingValidation => "awaiting_validation",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Whether a run stops here. `awaiting_validation` hands off to a human.
    pub fn ends_run(self) -> bool {
        self.is_terminal() || self == Self::AwaitingValidation
    }

    /// The durable ticket status this stage is reported as.
    pub fn ticket_status(self) -> TicketStatus {
        match self {
            Self::AwaitingValidation => TicketStatus::PendingValidation,
            Self::Completed => TicketStatus::Completed,
            Self::Cancelled => TicketStatus::Cancelled,
            Self::Failed => TicketStatus::Failed,
            _ => TicketStatus::InProgress,
        }
    }

    /// Rough completion percentage reported with status events.
    pub fn progress(self) -> u8 {
        match self {
            Self::Initialized => 0,
            Self::Preparing => 10,
            Self::ReadyForGeneration => 25,
            Self::Generating => 30,
            Self::Committing => 60,
            Self::Verifying => 80,
            Self::AwaitingValidation | Self::Completed | Self::Cancelled | Self::Failed => 100,
        }
    }

    pub fn can_transition_to(self, to: WorkflowStatus) -> bool {
        use WorkflowStatus::*;

        // Any stage still in flight may fail or be cancelled.
        if matches!(to, Failed | Cancelled) && !self.ends_run() {
            return true;
        }

        matches!(
            (self, to),
            (Initialized, Preparing)
                | (Preparing, ReadyForGeneration)
                | (ReadyForGeneration, Generating)
                | (Generating, Committing)
                | (Committing, Verifying)
                | (Verifying, AwaitingValidation)
                | (Verifying, Initialized)
                | (AwaitingValidation, Completed)
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal workflow transition: {from} -> {to}")]
pub struct IllegalTransition {
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
}

/// Outcome of one verification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub passed: bool,
    pub summary: String,
    pub raw_output: Option<String>,
}

impl VerificationResult {
    pub fn pass(summary: impl Into<String>, raw_output: Option<String>) -> Self {
        Self {
            passed: true,
            summary: summary.into(),
            raw_output,
        }
    }

    pub fn fail(summary: impl Into<String>, raw_output: Option<String>) -> Self {
        Self {
            passed: false,
            summary: summary.into(),
            raw_output,
        }
    }

    /// Text handed to the next generation attempt.
    pub fn feedback(&self) -> String {
        match self.raw_output.as_deref().map(str::trim) {
            Some(output) if !output.is_empty() => {
                format!("Verification failed: {}\n\n{output}", self.summary)
            }
            _ => format!("Verification failed: {}", self.summary),
        }
    }
}

/// Stage failures recorded in a run's error list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error("[preparing] {0}")]
    RepositoryPreparation(String),

    #[error("[generating] {0}")]
    Generation(String),

    #[error("[committing] {0}")]
    Commit(String),

    #[error("[verifying] iteration {iteration}: {summary}")]
    VerificationFailure { iteration: u32, summary: String },

    #[error("[escalating] reached the limit of {cap} iterations")]
    IterationCapExceeded { cap: u32 },
}

/// Transient state of one ticket's run. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowState {
    pub ticket_id: String,
    pub status: WorkflowStatus,
    pub iteration_count: u32,
    pub repo_path: Option<PathBuf>,
    pub branch_name: Option<String>,
    pub commit_hash: Option<String>,
    pub verification_result: Option<VerificationResult>,
    pub errors: Vec<String>,
    /// Every status entered, in order, starting with `initialized`.
    pub history: Vec<WorkflowStatus>,
}

impl WorkflowState {
    pub fn new(ticket_id: impl Into<String>, iteration_count: u32) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            status: WorkflowStatus::Initialized,
            iteration_count,
            repo_path: None,
            branch_name: None,
            commit_hash: None,
            verification_result: None,
            errors: Vec::new(),
            history: vec![WorkflowStatus::Initialized],
        }
    }

    pub fn transition(&mut self, to: WorkflowStatus) -> Result<(), IllegalTransition> {
        if !self.status.can_transition_to(to) {
            return Err(IllegalTransition {
                from: self.status,
                to,
            });
        }
        tracing::debug!(
            ticket_id = %self.ticket_id,
            from = %self.status,
            to = %to,
            iteration = self.iteration_count,
            "Workflow transition"
        );
        self.status = to;
        self.history.push(to);
        Ok(())
    }

    pub fn record(&mut self, error: StageError) {
        tracing::warn!(ticket_id = %self.ticket_id, error = %error, "Workflow stage error");
        self.errors.push(error.to_string());
    }
}

/// What `run` returns to its caller.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub ticket_id: String,
    pub success: bool,
    pub final_status: WorkflowStatus,
    pub iteration_count: u32,
    pub errors: Vec<String>,
    pub commit_hash: Option<String>,
    pub branch_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_ticket_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<PullRequestResult>,
}

impl RunReport {
    pub fn from_state(state: WorkflowState) -> Self {
        Self {
            success: state.status == WorkflowStatus::AwaitingValidation,
            final_status: state.status,
            iteration_count: state.iteration_count,
            errors: state.errors,
            commit_hash: state.commit_hash,
            branch_name: state.branch_name,
            ticket_id: state.ticket_id,
            escalation_ticket_id: None,
            pull_request: None,
        }
    }
}

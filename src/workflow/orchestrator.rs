//! The per-ticket workflow: prepare, generate, commit, verify, and retry or escalate.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::agent::{CodeGenerator, Generation};
use crate::config::WorkflowConfig;
use crate::error::{AppError, Result};
use crate::notify::{LogLevel, Notifier, StatusUpdate};
use crate::platform::{CreatePullRequest, PullRequestCreator, PullRequestResult};
use crate::store::types::{MessageKind, Repository, Ticket, TicketMessage, TicketStatus};
use crate::store::TicketStore;
use crate::verify::TestRunner;
use crate::workflow::escalation::EscalationHandler;
use crate::workflow::lock::WorkingCopyLocks;
use crate::workflow::types::{
    RunReport, StageError, VerificationResult, WorkflowState, WorkflowStatus,
};
use crate::workspace::{BranchManager, RepositorySync, WorkspaceManager};

/// How the iteration loop ended.
enum Exit {
    Passed,
    Exhausted,
    Cancelled,
    Failed(StageError),
}

pub struct WorkflowOrchestrator {
    store: Arc<dyn TicketStore>,
    branches: BranchManager,
    sync: RepositorySync,
    generator: Arc<dyn CodeGenerator>,
    tests: Arc<dyn TestRunner>,
    escalation: EscalationHandler,
    pull_requests: Option<Arc<dyn PullRequestCreator>>,
    notifier: Notifier,
    locks: WorkingCopyLocks,
    settings: WorkflowConfig,
    token: Option<String>,
}

impl WorkflowOrchestrator {
    pub fn new(
        store: Arc<dyn TicketStore>,
        sync: RepositorySync,
        generator: Arc<dyn CodeGenerator>,
        tests: Arc<dyn TestRunner>,
        notifier: Notifier,
        settings: WorkflowConfig,
        token: Option<String>,
    ) -> Self {
        Self {
            escalation: EscalationHandler::new(store.clone()),
            branches: BranchManager::new(sync.workspace().clone()),
            store,
            sync,
            generator,
            tests,
            pull_requests: None,
            notifier,
            locks: WorkingCopyLocks::new(),
            settings,
            token,
        }
    }

    pub fn with_pull_requests(mut self, creator: Arc<dyn PullRequestCreator>) -> Self {
        self.pull_requests = Some(creator);
        self
    }

    /// Share working-copy locks with other users of the same checkouts.
    pub fn with_locks(mut self, locks: WorkingCopyLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn locks(&self) -> &WorkingCopyLocks {
        &self.locks
    }

    /// Drive one ticket to a resting state.
    ///
    /// Stage errors never escape: they are recorded in the report's `errors`
    /// and mapped onto the final status.
    pub async fn run(&self, ticket_id: &str, cancel: &CancellationToken) -> RunReport {
        let mut state = WorkflowState::new(ticket_id, 0);

        let ticket = match self.store.get_ticket(ticket_id).await {
            Ok(ticket) => ticket,
            Err(e) => {
                state.record(StageError::RepositoryPreparation(e.to_string()));
                self.enter(&mut state, WorkflowStatus::Failed, "Ticket could not be loaded")
                    .await;
                return RunReport::from_state(state);
            }
        };

        if ticket.status == TicketStatus::Cancelled {
            tracing::info!(ticket_id, "Ticket is already cancelled, not running");
            self.enter(&mut state, WorkflowStatus::Cancelled, "Ticket is already cancelled")
                .await;
            return RunReport::from_state(state);
        }

        let repository = match self.store.get_repository(&ticket.repository_id).await {
            Ok(repository) => repository,
            Err(e) => {
                state.record(StageError::RepositoryPreparation(e.to_string()));
                return self.finish_failed(state).await;
            }
        };

        let mut feedback = match self.resume_point(&mut state).await {
            Ok(feedback) => feedback,
            Err(e) => {
                state.record(StageError::RepositoryPreparation(format!(
                    "could not read ticket history: {e}"
                )));
                return self.finish_failed(state).await;
            }
        };

        self.persist(&mut state, TicketStatus::InProgress).await;
        tracing::info!(
            ticket_id,
            repo = %repository.full_name,
            iteration = state.iteration_count,
            max_iterations = self.settings.max_iterations,
            "Starting workflow run"
        );

        let branch_name = BranchManager::name_for(&ticket.id, &ticket.title);
        let working_copy = match self.sync.workspace().path_for(&repository.url) {
            Ok(path) => path,
            Err(e) => {
                state.record(StageError::RepositoryPreparation(e.to_string()));
                return self.finish_failed(state).await;
            }
        };
        let _guard = self.locks.acquire(&working_copy, &branch_name).await;

        let mut summary = String::new();
        let exit = loop {
            if cancel.is_cancelled() {
                break Exit::Cancelled;
            }
            if state.iteration_count >= self.settings.max_iterations {
                break Exit::Exhausted;
            }

            self.enter(&mut state, WorkflowStatus::Preparing, "Preparing working copy")
                .await;
            let repo_path = match self.prepare(&ticket, &repository, &mut state).await {
                Ok(path) => path,
                Err(e) => break Exit::Failed(StageError::RepositoryPreparation(e.to_string())),
            };
            let ready = format!(
                "Working copy ready on {}",
                state.branch_name.as_deref().unwrap_or(&branch_name)
            );
            self.enter(&mut state, WorkflowStatus::ReadyForGeneration, ready)
                .await;

            if cancel.is_cancelled() {
                break Exit::Cancelled;
            }
            self.enter(&mut state, WorkflowStatus::Generating, "Generating changes")
                .await;
            let generation = match self
                .generator
                .generate(&ticket, &repo_path, feedback.as_deref())
                .await
            {
                Ok(generation) => generation,
                Err(e) => break Exit::Failed(StageError::Generation(e.to_string())),
            };
            self.emit(
                &state,
                format!("Generated {} file change(s)", generation.changes.len()),
            )
            .await;
            summary = generation.summary.clone();

            if cancel.is_cancelled() {
                break Exit::Cancelled;
            }
            self.enter(&mut state, WorkflowStatus::Committing, "Committing changes")
                .await;
            if let Err(e) = self
                .commit(&ticket, &repository, &repo_path, &generation, &mut state)
                .await
            {
                break Exit::Failed(e);
            }

            if cancel.is_cancelled() {
                break Exit::Cancelled;
            }
            self.enter(&mut state, WorkflowStatus::Verifying, "Running verification")
                .await;
            let result = self.verify(&repo_path, state.commit_hash.as_deref()).await;
            state.iteration_count += 1;
            self.record_attempt(&mut state, &result).await;
            state.verification_result = Some(result.clone());
            self.emit(&state, result.summary.clone()).await;

            if result.passed {
                break Exit::Passed;
            }

            state.record(StageError::VerificationFailure {
                iteration: state.iteration_count,
                summary: result.summary.clone(),
            });
            feedback = Some(result.feedback());

            if state.iteration_count >= self.settings.max_iterations {
                break Exit::Exhausted;
            }
            let retry = format!(
                "Verification failed, retrying ({}/{})",
                state.iteration_count, self.settings.max_iterations
            );
            self.enter(&mut state, WorkflowStatus::Initialized, retry)
                .await;
        };

        match exit {
            Exit::Passed => self.finish_passed(state, &ticket, &repository, &summary).await,
            Exit::Exhausted => self.finish_exhausted(state, &ticket).await,
            Exit::Cancelled => self.finish_cancelled(state).await,
            Exit::Failed(error) => {
                state.record(error);
                self.finish_failed(state).await
            }
        }
    }

    /// Seed the iteration count from recorded attempts and pick up reviewer
    /// feedback left since the last attempt.
    async fn resume_point(&self, state: &mut WorkflowState) -> Result<Option<String>> {
        let messages = self.store.messages(&state.ticket_id).await?;
        state.iteration_count = messages
            .iter()
            .filter(|m| m.kind == MessageKind::Attempt)
            .count() as u32;
        Ok(messages
            .last()
            .filter(|m| m.kind == MessageKind::Feedback)
            .map(|m| m.body.clone()))
    }

    async fn prepare(
        &self,
        ticket: &Ticket,
        repository: &Repository,
        state: &mut WorkflowState,
    ) -> Result<PathBuf> {
        let token = self.token.as_deref();
        let (path, cloned) = self.sync.clone_or_pull(&repository.url, token, None).await?;
        state.repo_path = Some(path.clone());

        // New branches start from an up-to-date base.
        if !cloned {
            self.sync
                .sync_branch(&repository.url, &repository.default_branch, token)
                .await?;
        }

        let (branch, created) = self
            .branches
            .ensure(ticket, &repository.url, &repository.default_branch)
            .await?;

        if !created {
            self.sync.sync_branch(&repository.url, &branch, token).await?;
            if self.settings.rebase_existing_branch {
                self.rebase_onto_base(repository, &branch, state).await;
            }
        }

        state.branch_name = Some(branch);
        Ok(path)
    }

    /// Best effort: a failed rebase is aborted and the run continues on the old base.
    async fn rebase_onto_base(&self, repository: &Repository, branch: &str, state: &WorkflowState) {
        let base = &repository.default_branch;
        let rebased = match self.sync.rebase(&repository.url, branch, base).await {
            Ok(tip) => self
                .sync
                .push(&repository.url, branch, self.token.as_deref(), true)
                .await
                .map(|()| tip),
            Err(e) => Err(e),
        };

        match rebased {
            Ok(tip) => {
                self.notifier
                    .log(
                        &state.ticket_id,
                        LogLevel::Info,
                        format!("Rebased {branch} onto {base} ({tip})"),
                    )
                    .await;
            }
            Err(e) => {
                tracing::warn!(ticket_id = %state.ticket_id, branch, error = %e, "Rebase skipped");
                self.notifier
                    .log(
                        &state.ticket_id,
                        LogLevel::Warning,
                        format!("Could not rebase {branch} onto {base}: {e}"),
                    )
                    .await;
            }
        }
    }

    async fn commit(
        &self,
        ticket: &Ticket,
        repository: &Repository,
        repo_path: &Path,
        generation: &Generation,
        state: &mut WorkflowState,
    ) -> std::result::Result<(), StageError> {
        state.commit_hash = None;

        if generation.changes.is_empty() {
            self.emit(state, "No changes proposed, skipping commit").await;
            return Ok(());
        }

        let touched = WorkspaceManager::apply_changes(repo_path, &generation.changes)
            .await
            .map_err(|e| StageError::Generation(e.to_string()))?;

        let branch = state
            .branch_name
            .clone()
            .ok_or_else(|| StageError::Commit("no branch checked out".to_string()))?;
        let message = commit_message(ticket, generation, state.iteration_count + 1);

        let outcome = self
            .sync
            .add_commit_and_push(&repository.url, &message, &branch, self.token.as_deref())
            .await
            .map_err(|e| StageError::Commit(e.to_string()))?;

        match (outcome.success, outcome.commit_hash) {
            (true, hash) => {
                tracing::info!(
                    ticket_id = %ticket.id,
                    branch = %branch,
                    files = touched.len(),
                    commit = hash.as_deref().unwrap_or(""),
                    "Committed and pushed"
                );
                state.commit_hash = hash;
                self.emit(state, outcome.message).await;
                Ok(())
            }
            // The changes matched what was already committed.
            (false, None) => {
                self.emit(state, outcome.message).await;
                Ok(())
            }
            (false, Some(hash)) => {
                state.commit_hash = Some(hash);
                Err(StageError::Commit(outcome.message))
            }
        }
    }

    async fn verify(&self, repo_path: &Path, commit_hash: Option<&str>) -> VerificationResult {
        match self.tests.run(repo_path, commit_hash).await {
            Ok(result) => result,
            Err(e) => VerificationResult::fail(format!("Test runner error: {e}"), None),
        }
    }

    async fn record_attempt(&self, state: &mut WorkflowState, result: &VerificationResult) {
        let body = format!(
            "Attempt {}: {} ({})",
            state.iteration_count,
            if result.passed { "passed" } else { "failed" },
            result.summary
        );
        if let Err(e) = self
            .store
            .append_message(&state.ticket_id, TicketMessage::attempt(body))
            .await
        {
            tracing::error!(ticket_id = %state.ticket_id, error = %e, "Failed to record attempt");
            state.errors.push(format!("[store] failed to record attempt: {e}"));
        }
    }

    async fn finish_passed(
        &self,
        mut state: WorkflowState,
        ticket: &Ticket,
        repository: &Repository,
        summary: &str,
    ) -> RunReport {
        self.enter(
            &mut state,
            WorkflowStatus::AwaitingValidation,
            "Verification passed, awaiting validation",
        )
        .await;
        self.persist(&mut state, TicketStatus::PendingValidation).await;

        let pull_request = self.open_pull_request(&state, ticket, repository, summary).await;
        tracing::info!(
            ticket_id = %state.ticket_id,
            iteration = state.iteration_count,
            "Workflow run succeeded"
        );

        let mut report = RunReport::from_state(state);
        report.pull_request = pull_request;
        report
    }

    async fn finish_exhausted(&self, mut state: WorkflowState, ticket: &Ticket) -> RunReport {
        state.record(StageError::IterationCapExceeded {
            cap: self.settings.max_iterations,
        });
        let message = format!(
            "Giving up after {} iterations, escalating",
            state.iteration_count
        );
        self.enter(&mut state, WorkflowStatus::Cancelled, message)
            .await;

        let escalation = match self
            .escalation
            .escalate(ticket, &state.errors, state.iteration_count)
            .await
        {
            Ok(id) => {
                self.notifier
                    .log(
                        &state.ticket_id,
                        LogLevel::Warning,
                        format!("Escalated as ticket {id}"),
                    )
                    .await;
                Some(id)
            }
            Err(e) => {
                tracing::error!(ticket_id = %state.ticket_id, error = %e, "Escalation failed");
                state.errors.push(format!("[escalating] {e}"));
                self.persist(&mut state, TicketStatus::Cancelled).await;
                match e {
                    AppError::EscalationIncomplete {
                        escalation_ticket_id,
                        ..
                    } => Some(escalation_ticket_id),
                    _ => None,
                }
            }
        };

        let mut report = RunReport::from_state(state);
        report.escalation_ticket_id = escalation;
        report
    }

    async fn finish_cancelled(&self, mut state: WorkflowState) -> RunReport {
        tracing::info!(ticket_id = %state.ticket_id, status = %state.status, "Workflow run cancelled");
        self.enter(&mut state, WorkflowStatus::Cancelled, "Run cancelled")
            .await;
        self.persist(&mut state, TicketStatus::Cancelled).await;
        RunReport::from_state(state)
    }

    async fn finish_failed(&self, mut state: WorkflowState) -> RunReport {
        let error = state.errors.last().cloned().unwrap_or_default();
        tracing::warn!(ticket_id = %state.ticket_id, status = %state.status, %error, "Workflow run failed");
        self.enter_with_error(&mut state, WorkflowStatus::Failed, "Run failed", error)
            .await;
        self.persist(&mut state, TicketStatus::Failed).await;
        RunReport::from_state(state)
    }

    async fn open_pull_request(
        &self,
        state: &WorkflowState,
        ticket: &Ticket,
        repository: &Repository,
        summary: &str,
    ) -> Option<PullRequestResult> {
        if !self.settings.open_pull_request {
            return None;
        }
        let creator = self.pull_requests.as_ref()?;
        let head_branch = state.branch_name.clone()?;

        let request = CreatePullRequest {
            repo_full_name: repository.full_name.clone(),
            title: ticket.title.clone(),
            body: format!(
                "Resolves ticket {}.\n\n{}\n\nVerified after {} iteration(s).",
                ticket.id,
                summary.trim(),
                state.iteration_count
            ),
            head_branch,
            base_branch: repository.default_branch.clone(),
            draft: self.settings.draft_pull_requests,
        };

        let result = match creator.create_pull_request(&request).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(ticket_id = %ticket.id, error = %e, "Pull request creation failed");
                PullRequestResult::failed(e.to_string())
            }
        };
        self.notifier
            .log(
                &ticket.id,
                if result.success {
                    LogLevel::Info
                } else {
                    LogLevel::Warning
                },
                result.message.clone(),
            )
            .await;
        Some(result)
    }

    async fn enter(
        &self,
        state: &mut WorkflowState,
        to: WorkflowStatus,
        message: impl Into<String>,
    ) {
        if let Err(e) = state.transition(to) {
            tracing::error!(ticket_id = %state.ticket_id, error = %e, "Refusing transition");
            return;
        }
        tracing::info!(
            ticket_id = %state.ticket_id,
            status = %to,
            iteration = state.iteration_count,
            "Entered stage"
        );
        self.emit(state, message).await;
    }

    async fn enter_with_error(
        &self,
        state: &mut WorkflowState,
        to: WorkflowStatus,
        message: &str,
        error: String,
    ) {
        if let Err(e) = state.transition(to) {
            tracing::error!(ticket_id = %state.ticket_id, error = %e, "Refusing transition");
            return;
        }
        self.notifier
            .status(
                StatusUpdate::for_step(&state.ticket_id, to, message)
                    .error(error)
                    .data(json!({"iteration": state.iteration_count})),
            )
            .await;
    }

    async fn emit(&self, state: &WorkflowState, message: impl Into<String>) {
        self.notifier
            .status(
                StatusUpdate::for_step(&state.ticket_id, state.status, message)
                    .data(json!({"iteration": state.iteration_count})),
            )
            .await;
    }

    async fn persist(&self, state: &mut WorkflowState, status: TicketStatus) {
        if let Err(e) = self.store.update_status(&state.ticket_id, status).await {
            tracing::error!(ticket_id = %state.ticket_id, %status, error = %e, "Failed to update ticket status");
            state
                .errors
                .push(format!("[store] failed to set status {status}: {e}"));
        }
    }
}

fn commit_message(ticket: &Ticket, generation: &Generation, attempt: u32) -> String {
    let short_id: String = ticket.id.chars().take(8).collect();
    let mut message = format!("{short_id}: {}\n\nTicket: {}\nAttempt: {attempt}\n", ticket.title, ticket.id);
    if !generation.summary.trim().is_empty() {
        message.push('\n');
        message.push_str(generation.summary.trim());
        message.push('\n');
    }
    message
}

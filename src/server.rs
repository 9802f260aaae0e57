use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::agent::Generator;
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::notify::{HttpSink, LogSink, Notifier, StatusSink};
use crate::platform::GitHubPlatform;
use crate::store::types::TicketStatus;
use crate::store::{MemoryStore, TicketStore};
use crate::verify::CommandTestRunner;
use crate::workflow::{
    RunReport, ValidationDecision, ValidationHandler, WorkflowOrchestrator, WorkingCopyLocks,
};
use crate::workspace::{RepositorySync, WorkspaceManager};

/// A run started through the API and not yet finished.
pub struct InFlightRun {
    pub cancel: CancellationToken,
    pub handle: JoinHandle<RunReport>,
}

pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn TicketStore>,
    pub orchestrator: Arc<WorkflowOrchestrator>,
    pub validation: ValidationHandler,
    runs: Mutex<HashMap<String, InFlightRun>>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let store: Arc<dyn TicketStore> = match &config.store.seed_path {
            Some(path) => {
                let store = MemoryStore::load(path).await?;
                tracing::info!(path = %path.display(), "Loaded ticket store seed");
                Arc::new(store)
            }
            None => Arc::new(MemoryStore::new()),
        };

        let sink: Arc<dyn StatusSink> = match &config.notify.webhook_url {
            Some(url) => Arc::new(HttpSink::new(url.clone())),
            None => Arc::new(LogSink),
        };
        let (notifier, _sender) = Notifier::spawn(sink, config.workflow.notification_buffer);

        let sync = RepositorySync::new(WorkspaceManager::new(&config.workspace), &config.git);
        let generator = Arc::new(Generator::from_config(&config.generator)?);
        let tests = Arc::new(CommandTestRunner::new(&config.verification));
        let locks = WorkingCopyLocks::new();
        let token = config.git_token().map(str::to_string);

        let mut orchestrator = WorkflowOrchestrator::new(
            store.clone(),
            sync.clone(),
            generator,
            tests,
            notifier.clone(),
            config.workflow.clone(),
            token.clone(),
        )
        .with_locks(locks.clone());

        if config.workflow.open_pull_request {
            match config.git_token() {
                Some(token) => {
                    orchestrator =
                        orchestrator.with_pull_requests(Arc::new(GitHubPlatform::new(token)?));
                }
                None => tracing::warn!(
                    "workflow.open_pull_request is set but git.token is missing; pull requests disabled"
                ),
            }
        }

        let validation = ValidationHandler::new(store.clone(), sync, notifier, locks, token);

        Ok(Self {
            config,
            store,
            orchestrator: Arc::new(orchestrator),
            validation,
            runs: Mutex::new(HashMap::new()),
        })
    }

    /// Start a background run for `ticket_id`.
    pub async fn start_run(self: &Arc<Self>, ticket_id: &str) -> Result<()> {
        let ticket = self.store.get_ticket(ticket_id).await?;

        let mut runs = self.runs.lock().await;
        if runs.contains_key(ticket_id) {
            return Err(AppError::InvalidState(format!(
                "ticket {ticket_id} already has a run in progress"
            )));
        }
        if !matches!(ticket.status, TicketStatus::Pending | TicketStatus::Failed) {
            return Err(AppError::InvalidState(format!(
                "ticket {ticket_id} is {}; only PENDING or FAILED tickets can be run",
                ticket.status
            )));
        }

        let cancel = CancellationToken::new();
        let handle = {
            let state = Arc::clone(self);
            let cancel = cancel.clone();
            let ticket_id = ticket_id.to_string();
            tokio::spawn(async move {
                let report = state.orchestrator.run(&ticket_id, &cancel).await;
                tracing::info!(
                    ticket_id = %ticket_id,
                    success = report.success,
                    final_status = %report.final_status,
                    iterations = report.iteration_count,
                    "Run finished"
                );
                state.runs.lock().await.remove(&ticket_id);
                report
            })
        };
        runs.insert(ticket_id.to_string(), InFlightRun { cancel, handle });
        Ok(())
    }

    /// Ask an in-flight run to stop. Returns false when nothing is running.
    pub async fn cancel_run(&self, ticket_id: &str) -> bool {
        match self.runs.lock().await.get(ticket_id) {
            Some(run) => {
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn in_flight(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.runs.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Take every in-flight run out of the registry.
    pub async fn drain_runs(&self) -> Vec<(String, InFlightRun)> {
        self.runs.lock().await.drain().collect()
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/tickets/:id/run", post(run_ticket))
        .route("/tickets/:id/cancel", post(cancel_ticket))
        .route("/tickets/:id/validate", post(validate_ticket))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Maps crate errors onto HTTP responses.
pub struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::TicketNotFound(_) | AppError::RepositoryNotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidState(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn health_check() -> &'static str {
    "ok"
}

async fn run_ticket(
    State(state): State<Arc<AppState>>,
    Path(ticket_id): Path<String>,
) -> std::result::Result<(StatusCode, Json<Value>), ApiError> {
    state.start_run(&ticket_id).await?;
    tracing::info!(ticket_id = %ticket_id, "Run accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "ticket_id": ticket_id, "status": "accepted" })),
    ))
}

async fn cancel_ticket(
    State(state): State<Arc<AppState>>,
    Path(ticket_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    if state.cancel_run(&ticket_id).await {
        tracing::info!(ticket_id = %ticket_id, "Cancellation requested");
        (
            StatusCode::ACCEPTED,
            Json(json!({ "ticket_id": ticket_id, "cancelled": true })),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("No run in progress for ticket {ticket_id}") })),
        )
    }
}

async fn validate_ticket(
    State(state): State<Arc<AppState>>,
    Path(ticket_id): Path<String>,
    Json(decision): Json<ValidationDecision>,
) -> std::result::Result<Json<Value>, ApiError> {
    let outcome = state.validation.validate(&ticket_id, decision).await?;
    Ok(Json(serde_json::to_value(outcome).map_err(AppError::from)?))
}

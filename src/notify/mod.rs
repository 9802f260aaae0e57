//! Status events and their delivery.
//!
//! The orchestrator pushes events into a bounded channel; a dedicated sender
//! task drains it into a [`StatusSink`]. Delivery failures are logged and
//! dropped there, so they never reach the workflow.

pub mod sink;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::store::types::TicketStatus;
use crate::workflow::types::WorkflowStatus;

pub use sink::{HttpSink, LogSink, StatusSink};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    StatusUpdate(StatusUpdate),
    Log(LogEvent),
}

impl StatusEvent {
    pub fn ticket_id(&self) -> &str {
        match self {
            StatusEvent::StatusUpdate(u) => &u.ticket_id,
            StatusEvent::Log(l) => &l.ticket_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusUpdate {
    pub ticket_id: String,
    pub status: TicketStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<WorkflowStatus>,
    /// 0 to 100.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl StatusUpdate {
    /// An update for a workflow step, with status and progress derived from it.
    pub fn for_step(ticket_id: &str, step: WorkflowStatus, message: impl Into<String>) -> Self {
        Self {
            ticket_id: ticket_id.to_string(),
            status: step.ticket_status(),
            message: message.into(),
            step: Some(step),
            progress: Some(step.progress()),
            error: None,
            data: None,
        }
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    pub ticket_id: String,
    pub level: LogLevel,
    pub message: String,
}

/// Handle for queueing status events. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::Sender<StatusEvent>,
}

impl Notifier {
    /// Start the sender task. It exits once every `Notifier` clone is dropped
    /// and the queue is drained.
    pub fn spawn(sink: Arc<dyn StatusSink>, buffer: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<StatusEvent>(buffer.max(1));

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = sink.deliver(&event).await {
                    tracing::warn!(
                        ticket_id = %event.ticket_id(),
                        error = %e,
                        "Status event delivery failed"
                    );
                }
            }
            tracing::debug!("Status event sender stopped");
        });

        (Self { tx }, handle)
    }

    /// Queue an event, waiting for room when the buffer is full.
    pub async fn send(&self, event: StatusEvent) {
        if let Err(e) = self.tx.send(event).await {
            tracing::warn!(ticket_id = %e.0.ticket_id(), "Status channel closed, dropping event");
        }
    }

    pub async fn status(&self, update: StatusUpdate) {
        self.send(StatusEvent::StatusUpdate(update)).await;
    }

    pub async fn log(&self, ticket_id: &str, level: LogLevel, message: impl Into<String>) {
        self.send(StatusEvent::Log(LogEvent {
            ticket_id: ticket_id.to_string(),
            level,
            message: message.into(),
        }))
        .await;
    }
}

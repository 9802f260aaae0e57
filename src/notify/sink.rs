use async_trait::async_trait;
use reqwest::Client;

use crate::error::{AppError, Result};
use crate::notify::{LogLevel, StatusEvent};

/// Where status events end up.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn deliver(&self, event: &StatusEvent) -> Result<()>;
}

/// Writes events to the tracing subscriber.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl StatusSink for LogSink {
    async fn deliver(&self, event: &StatusEvent) -> Result<()> {
        match event {
            StatusEvent::StatusUpdate(update) => {
                tracing::info!(
                    ticket_id = %update.ticket_id,
                    status = %update.status,
                    step = update.step.map(|s| s.as_str()),
                    progress = update.progress,
                    error = update.error.as_deref(),
                    "{}",
                    update.message
                );
            }
            StatusEvent::Log(log) => match log.level {
                LogLevel::Debug => tracing::debug!(ticket_id = %log.ticket_id, "{}", log.message),
                LogLevel::Info => tracing::info!(ticket_id = %log.ticket_id, "{}", log.message),
                LogLevel::Warning => tracing::warn!(ticket_id = %log.ticket_id, "{}", log.message),
                LogLevel::Error => tracing::error!(ticket_id = %log.ticket_id, "{}", log.message),
            },
        }
        Ok(())
    }
}

/// POSTs each event as JSON to a subscriber URL, and mirrors it to the log.
pub struct HttpSink {
    client: Client,
    url: String,
}

impl HttpSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl StatusSink for HttpSink {
    async fn deliver(&self, event: &StatusEvent) -> Result<()> {
        LogSink.deliver(event).await?;

        let response = self.client.post(&self.url).json(event).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Internal(format!(
                "Status subscriber returned {status}"
            )));
        }
        Ok(())
    }
}

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;

use crate::server::AppState;

/// How long in-flight runs get to reach a stage boundary and stop.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Wait for a shutdown signal (SIGINT or SIGTERM).
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }
}

/// Cancel every in-flight run and wait for each to record its final status.
pub async fn graceful_shutdown(state: &Arc<AppState>) {
    tracing::info!("Starting graceful shutdown...");

    let runs = state.drain_runs().await;
    if runs.is_empty() {
        tracing::info!("No in-flight runs to stop");
        return;
    }

    tracing::info!(count = runs.len(), "Cancelling in-flight runs");
    for (_, run) in &runs {
        run.cancel.cancel();
    }

    for (ticket_id, run) in runs {
        match tokio::time::timeout(SHUTDOWN_GRACE, run.handle).await {
            Ok(Ok(report)) => tracing::info!(
                ticket_id = %ticket_id,
                final_status = %report.final_status,
                "Run stopped"
            ),
            Ok(Err(e)) => tracing::warn!(ticket_id = %ticket_id, error = %e, "Run task failed"),
            Err(_) => tracing::warn!(
                ticket_id = %ticket_id,
                "Run did not stop within the shutdown grace period"
            ),
        }
    }

    tracing::info!("Graceful shutdown complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::store::types::TicketStatus;

    #[tokio::test]
    async fn test_shutdown_without_runs() {
        let state = Arc::new(AppState::new(AppConfig::default()).await.unwrap());
        graceful_shutdown(&state).await;
        assert!(state.in_flight().await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_cancelled_run() {
        let dir = tempfile::tempdir().unwrap();
        let seed = dir.path().join("seed.toml");
        std::fs::write(
            &seed,
            r#"
[[repositories]]
id = "repo-1"
url = "file:///nonexistent/acme/widgets.git"
full_name = "acme/widgets"

[[tickets]]
id = "t-1"
title = "Anything"
repository_id = "repo-1"
"#,
        )
        .unwrap();
        let mut config = AppConfig::default();
        config.workspace.base_dir = dir.path().join("work");
        config.store.seed_path = Some(seed);
        let state = Arc::new(AppState::new(config).await.unwrap());

        // Hold the working copy so the run parks before its first stage.
        let working_copy = dir.path().join("work").join("acme__widgets");
        let locks_guard = state
            .orchestrator
            .locks()
            .acquire(&working_copy, "ticket/t-1")
            .await;
        state.start_run("t-1").await.unwrap();
        assert_eq!(state.in_flight().await, vec!["t-1".to_string()]);

        let shutdown = {
            let state = Arc::clone(&state);
            tokio::spawn(async move { graceful_shutdown(&state).await })
        };
        // The registry empties as soon as the runs are cancelled.
        while !state.in_flight().await.is_empty() {
            tokio::task::yield_now().await;
        }
        drop(locks_guard);
        shutdown.await.unwrap();

        let ticket = state.store.get_ticket("t-1").await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Cancelled);
        assert!(state.in_flight().await.is_empty());
    }
}

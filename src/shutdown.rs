use std::sync::Arc;

use tokio::signal;

use crate::server::AppState;

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

/// Perform graceful shutdown: mark in-flight runs as interrupted and report
/// the directories they leave behind.
pub async fn graceful_shutdown(state: &Arc<AppState>) {
    tracing::info!("Starting graceful shutdown...");

    let interrupted = state.registry.write().await.interrupt_running();
    let dropped = state.queue.read().await.len();

    if dropped > 0 {
        tracing::info!(count = dropped, "Discarding queued runs");
    }

    if interrupted.is_empty() {
        tracing::info!("No in-flight runs to clean up");
        return;
    }

    for (run_id, workspace) in interrupted {
        // Terraform may have been mid-apply; state in this directory is the
        // only record of what exists
        tracing::warn!(
            run_id = %run_id,
            workspace = %workspace.display(),
            "Run interrupted, inspect and clean up its directory manually"
        );
    }

    tracing::info!("Graceful shutdown complete");
}

pub mod task;

use std::collections::VecDeque;
use std::sync::Arc;

use uuid::Uuid;

use crate::server::AppState;
use crate::terraform::WorkspaceManager;
use crate::workflow;

use task::RunTask;

/// FIFO of submitted runs, drained one at a time by the processor.
#[derive(Debug, Default)]
pub struct RunQueue {
    pending: VecDeque<RunTask>,
    /// Notification channel for the processor.
    notify: Option<tokio::sync::mpsc::UnboundedSender<()>>,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_notifier(&mut self, tx: tokio::sync::mpsc::UnboundedSender<()>) {
        self.notify = Some(tx);
    }

    pub fn enqueue(&mut self, task: RunTask) {
        tracing::info!(task = %task.description(), "Enqueuing run");
        self.pending.push_back(task);

        if let Some(ref tx) = self.notify {
            let _ = tx.send(());
        }
    }

    /// Drop a queued run. Returns false if it is not (or no longer) queued.
    pub fn cancel(&mut self, id: &Uuid) -> bool {
        let before = self.pending.len();
        self.pending.retain(|task| task.id != *id);
        let removed = before != self.pending.len();
        if removed {
            tracing::info!(run_id = %id, "Cancelled queued run");
        }
        removed
    }

    pub fn take_next(&mut self) -> Option<RunTask> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Run the background queue processor.
pub async fn run_queue_processor(state: Arc<AppState>) {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();

    {
        let mut queue = state.queue.write().await;
        // Runs submitted before the notifier existed
        if !queue.is_empty() {
            let _ = tx.send(());
        }
        queue.set_notifier(tx);
    }

    tracing::info!("Queue processor started");

    while rx.recv().await.is_some() {
        // Process all available runs
        loop {
            let task = {
                let mut queue = state.queue.write().await;
                queue.take_next()
            };

            let Some(task) = task else {
                break;
            };

            process_task(&state, task).await;
        }
    }
}

async fn process_task(state: &AppState, task: RunTask) {
    tracing::info!(task = %task.description(), "Processing run");

    let workspace = WorkspaceManager::new(&state.config.workspace).workspace_path(task.id);
    state
        .registry
        .write()
        .await
        .mark_running(&task.id, workspace);

    let result = workflow::run_request(&state.config, task.id, task.request.clone()).await;

    let mut registry = state.registry.write().await;
    match result {
        Ok(summary) => {
            tracing::info!(
                task = %task.description(),
                outcome = summary.outcome.label(),
                "Run completed"
            );
            registry.mark_finished(&task.id, summary);
        }
        Err(e) => {
            tracing::error!(
                task = %task.description(),
                error = %e,
                "Run failed"
            );
            registry.mark_errored(&task.id, e.to_string());
        }
    }
}

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::pipeline::PipelineRequest;
use crate::queue::task::RunTask;
use crate::queue::RunQueue;
use crate::registry::{RunRecord, RunRegistry, RunStatus};

pub struct AppState {
    pub config: AppConfig,
    pub queue: RwLock<RunQueue>,
    pub registry: RwLock<RunRegistry>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let registry = RunRegistry::with_retention(config.server.run_retention);
        Self {
            config,
            queue: RwLock::new(RunQueue::new()),
            registry: RwLock::new(registry),
        }
    }

    /// Register and enqueue a run, returning its id.
    pub async fn submit(&self, request: PipelineRequest) -> Uuid {
        let task = RunTask::new(request);
        let id = task.id;
        // Register first so the processor never sees an unknown id
        self.registry
            .write()
            .await
            .insert_queued(id, &task.request.text);
        self.queue.write().await.enqueue(task);
        id
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitRun {
    pub request: String,
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Submitted {
    pub id: Uuid,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/runs", post(submit_run))
        .route("/runs/:id", get(get_run).delete(cancel_run))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn submit_run(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitRun>,
) -> Result<(StatusCode, Json<Submitted>), StatusCode> {
    if body.request.trim().is_empty() {
        tracing::warn!("Rejected run with empty request");
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    let request = PipelineRequest::new(body.request).with_feedback(body.feedback);
    let id = state.submit(request).await;

    Ok((StatusCode::ACCEPTED, Json(Submitted { id })))
}

async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunRecord>, StatusCode> {
    state
        .registry
        .read()
        .await
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn cancel_run(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> StatusCode {
    let mut registry = state.registry.write().await;
    let Some(record) = registry.get(&id) else {
        return StatusCode::NOT_FOUND;
    };
    if !matches!(record.status, RunStatus::Queued) {
        return StatusCode::CONFLICT;
    }

    if state.queue.write().await.cancel(&id) {
        registry.mark_cancelled(&id);
        StatusCode::NO_CONTENT
    } else {
        // Picked up by the processor in the meantime
        StatusCode::CONFLICT
    }
}

async fn health_check() -> &'static str {
    "ok"
}

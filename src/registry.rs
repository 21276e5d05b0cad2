use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::workflow::RunSummary;

/// Lifecycle of a submitted run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running { workspace: PathBuf },
    Finished { summary: Box<RunSummary> },
    /// The run could not be set up (workspace, config, persistence).
    Errored { error: String },
    Cancelled,
    /// The service stopped while the run was in progress.
    Interrupted { workspace: PathBuf },
}

impl RunStatus {
    /// Whether the run will never change status again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Queued | RunStatus::Running { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub request: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const DEFAULT_RUN_RETENTION: usize = 1000;

/// In-memory index of runs submitted since startup.
///
/// Queued and running runs are always kept; only the most recent
/// `retention` finished ones are.
#[derive(Debug)]
pub struct RunRegistry {
    runs: HashMap<Uuid, RunRecord>,
    /// Finished run ids, oldest first.
    finished: VecDeque<Uuid>,
    retention: usize,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RUN_RETENTION)
    }
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            runs: HashMap::new(),
            finished: VecDeque::new(),
            retention,
        }
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn insert_queued(&mut self, id: Uuid, request: &str) {
        let now = Utc::now();
        self.runs.insert(
            id,
            RunRecord {
                id,
                request: request.to_string(),
                status: RunStatus::Queued,
                created_at: now,
                updated_at: now,
            },
        );
    }

    pub fn get(&self, id: &Uuid) -> Option<&RunRecord> {
        self.runs.get(id)
    }

    fn set(&mut self, id: &Uuid, status: RunStatus) {
        let terminal = status.is_terminal();
        match self.runs.get_mut(id) {
            Some(record) => {
                record.status = status;
                record.updated_at = Utc::now();
            }
            None => {
                tracing::warn!(run_id = %id, "Status update for unknown run");
                return;
            }
        }
        if terminal {
            self.finished.push_back(*id);
            self.evict_finished();
        }
    }

    fn evict_finished(&mut self) {
        while self.finished.len() > self.retention {
            if let Some(oldest) = self.finished.pop_front() {
                self.runs.remove(&oldest);
                tracing::debug!(run_id = %oldest, "Evicted finished run record");
            }
        }
    }

    pub fn mark_running(&mut self, id: &Uuid, workspace: PathBuf) {
        self.set(id, RunStatus::Running { workspace });
    }

    pub fn mark_finished(&mut self, id: &Uuid, summary: RunSummary) {
        self.set(
            id,
            RunStatus::Finished {
                summary: Box::new(summary),
            },
        );
    }

    pub fn mark_errored(&mut self, id: &Uuid, error: String) {
        self.set(id, RunStatus::Errored { error });
    }

    pub fn mark_cancelled(&mut self, id: &Uuid) {
        self.set(id, RunStatus::Cancelled);
    }

    /// Flip every running run to `Interrupted` and return their directories.
    pub fn interrupt_running(&mut self) -> Vec<(Uuid, PathBuf)> {
        let now = Utc::now();
        let mut interrupted = Vec::new();
        for record in self.runs.values_mut() {
            if let RunStatus::Running { workspace } = &record.status {
                let workspace = workspace.clone();
                interrupted.push((record.id, workspace.clone()));
                record.status = RunStatus::Interrupted { workspace };
                record.updated_at = now;
            }
        }
        interrupted
    }
}

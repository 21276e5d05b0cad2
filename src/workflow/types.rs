use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::pipeline::TerminalOutcome;
use crate::terraform::cost::CostEstimate;

/// What a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub request: String,
    pub plan: Option<String>,
    pub files: Vec<String>,
    pub retry_count: u32,
    pub outcome: TerminalOutcome,
    /// Present only after a deployment with priced resources.
    pub cost: Option<CostEstimate>,
    /// Where the artifact set and manifest were saved, if anywhere.
    pub project_dir: Option<PathBuf>,
    /// Kept working directory of a run that attempted a deployment, holding
    /// its Terraform state.
    pub workspace: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// The `canopy-run.toml` written next to a saved artifact set.
#[derive(Debug, Serialize)]
pub struct RunManifest<'a> {
    pub run_id: Uuid,
    pub request: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<&'a str>,
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_monthly_cost: Option<f64>,
    pub outcome: &'a TerminalOutcome,
}

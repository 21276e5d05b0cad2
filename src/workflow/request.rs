use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::agent::generator::LlmGenerator;
use crate::agent::llm::LlmClient;
use crate::agent::planner::LlmPlanner;
use crate::agent::prompt;
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::pipeline::{Collaborators, PipelineController, PipelineRequest, RetryPolicy};
use crate::terraform::command::ToolCommand;
use crate::terraform::cost;
use crate::terraform::workdir::save_project;
use crate::terraform::{
    RunWorkspace, TerraformDeployer, TerraformValidator, TfsecScanner, WorkspaceManager,
};
use crate::workflow::types::{RunManifest, RunSummary};

/// Run one infrastructure request end to end with the configured LLM and
/// Terraform tooling.
pub async fn run_request(
    config: &AppConfig,
    run_id: Uuid,
    request: PipelineRequest,
) -> Result<RunSummary> {
    if config.llm_api_key().trim().is_empty() {
        return Err(AppError::Config("llm.api_key is empty".to_string()));
    }

    let workspace_mgr = WorkspaceManager::new(&config.workspace);
    let workspace = workspace_mgr.create(run_id).await?;

    let security_rules =
        prompt::load_security_rules(config.planner.security_rules_path.as_deref()).await;
    let collaborators = build_collaborators(config, &workspace, security_rules);

    run_in_workspace(config, &workspace_mgr, workspace, collaborators, request).await
}

/// Wire the LLM capabilities and Terraform runners for one run directory.
pub fn build_collaborators(
    config: &AppConfig,
    workspace: &RunWorkspace,
    security_rules: String,
) -> Collaborators {
    let client = Arc::new(LlmClient::new(&config.llm));
    let region = &config.planner.region;
    tracing::debug!(
        run_id = %workspace.run_id,
        model = client.model(),
        region = %region,
        "Building collaborators"
    );
    let cache = config.terraform.plugin_cache_dir.clone();
    let terraform = ToolCommand::new(&config.terraform.terraform_bin, cache.clone());
    let tfsec = ToolCommand::new(&config.terraform.tfsec_bin, cache);

    Collaborators {
        planner: Arc::new(LlmPlanner::new(Arc::clone(&client), security_rules, region)),
        generator: Arc::new(LlmGenerator::new(client, region)),
        validator: Arc::new(TerraformValidator::new(workspace.clone(), terraform.clone())),
        scanner: Arc::new(TfsecScanner::new(
            workspace.clone(),
            tfsec,
            &config.terraform,
        )),
        deployer: Arc::new(TerraformDeployer::new(workspace.clone(), terraform)),
    }
}

/// Drive the pipeline inside an already created run directory, then persist
/// the result and dispose of the directory.
///
/// The directory is kept whenever a deployment was attempted or left a state
/// file: a failed or timed-out apply may still have created resources, and
/// the state in that directory is what `destroy` needs.
pub async fn run_in_workspace(
    config: &AppConfig,
    workspace_mgr: &WorkspaceManager,
    workspace: RunWorkspace,
    collaborators: Collaborators,
    request: PipelineRequest,
) -> Result<RunSummary> {
    let run_id = workspace.run_id;
    let started_at = Utc::now();

    let policy = RetryPolicy::new(config.pipeline.max_retries)
        .with_deploy_failure(config.pipeline.deploy_failure);
    let controller = PipelineController::new(
        collaborators,
        policy,
        Duration::from_secs(config.pipeline.stage_timeout_secs),
    );

    tracing::info!(run_id = %run_id, dir = %workspace.path.display(), "Starting run");

    let completed = controller.execute(request).await;
    let finished_at = Utc::now();
    let (state, outcome) = completed.into_parts();

    tracing::info!(
        run_id = %run_id,
        outcome = outcome.label(),
        retries = state.retry_count(),
        "Run finished"
    );

    let cost = if outcome.is_deployed() {
        match cost::estimate_from_state(&workspace.state_file()).await {
            Ok(estimate) => estimate,
            Err(e) => {
                tracing::warn!(run_id = %run_id, error = %e, "Cost estimation unavailable");
                None
            }
        }
    } else {
        None
    };
    if let Some(estimate) = &cost {
        tracing::info!(run_id = %run_id, monthly = estimate.total, "Estimated monthly cost");
        if estimate.exceeds_threshold() {
            tracing::warn!(run_id = %run_id, "Estimated monthly cost exceeds threshold");
        }
    }

    let deploy_attempted = outcome.is_deployed() || state.deploy_output().is_some();
    let kept_workspace = (deploy_attempted || workspace.state_file().is_file())
        .then(|| workspace.path.clone());

    let project_dir = match &config.workspace.output_dir {
        Some(output_dir) if !state.generated_files().is_empty() => {
            let manifest = RunManifest {
                run_id,
                request: state.initial_request(),
                feedback: state.feedback(),
                plan: state.plan(),
                retry_count: state.retry_count(),
                started_at,
                finished_at,
                files: state.generated_files().keys().map(String::as_str).collect(),
                workspace: kept_workspace.clone(),
                estimated_monthly_cost: cost.as_ref().map(|c| c.total),
                outcome: &outcome,
            };
            let manifest = toml::to_string_pretty(&manifest)?;
            let dir = save_project(output_dir, run_id, state.generated_files(), &manifest).await?;
            tracing::info!(run_id = %run_id, dir = %dir.display(), "Saved project");
            Some(dir)
        }
        _ => None,
    };

    if kept_workspace.is_none() {
        if let Err(e) = workspace_mgr.cleanup(&workspace).await {
            tracing::warn!(run_id = %run_id, error = %e, "Failed to remove run directory");
        }
    } else {
        tracing::info!(
            run_id = %run_id,
            dir = %workspace.path.display(),
            "Keeping run directory with Terraform state"
        );
    }

    Ok(RunSummary {
        run_id,
        request: state.initial_request().to_string(),
        plan: state.plan().map(str::to_string),
        files: state.generated_files().keys().cloned().collect(),
        retry_count: state.retry_count(),
        outcome,
        cost,
        project_dir,
        workspace: kept_workspace,
        started_at,
        finished_at,
    })
}

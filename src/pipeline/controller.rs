use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::agent::{Generator, Planner, PlanningInput};
use crate::pipeline::generation::GenerationLoop;
use crate::pipeline::retry::{RetryDecision, RetryPolicy};
use crate::pipeline::stage::{Stage, StageResult};
use crate::pipeline::state::{FileQueue, Plan, PriorFailure, WorkflowState};
use crate::terraform::{Deployer, SecurityScanner, Validator};

/// Final, immutable result of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TerminalOutcome {
    Deployed {
        output: String,
    },
    Failed {
        stage: Stage,
        reason: String,
    },
    /// Each report is the most recent one its stage produced in this run,
    /// which may predate the final attempt: an attempt that fails validation
    /// never reaches the scanner, so an older security report is kept.
    RetriesExhausted {
        last_validation_report: Option<String>,
        last_security_report: Option<String>,
    },
}

/// Terminal outcomes that are not a deployment, as an error for callers that
/// want to use `?`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("{0}")]
    Planning(String),

    #[error("{0}")]
    Generation(String),

    #[error("{0}")]
    Deploy(String),

    #[error("gave up after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

impl TerminalOutcome {
    pub fn is_deployed(&self) -> bool {
        matches!(self, TerminalOutcome::Deployed { .. })
    }

    /// Short label used in logs and run manifests.
    pub fn label(&self) -> &'static str {
        match self {
            TerminalOutcome::Deployed { .. } => "deployed",
            TerminalOutcome::Failed { .. } => "failed",
            TerminalOutcome::RetriesExhausted { .. } => "retries_exhausted",
        }
    }

    pub fn into_result(self, attempts: u32) -> std::result::Result<String, PipelineError> {
        match self {
            TerminalOutcome::Deployed { output } => Ok(output),
            TerminalOutcome::Failed { stage, reason } => Err(match stage {
                Stage::Plan => PipelineError::Planning(reason),
                Stage::Generate => PipelineError::Generation(reason),
                // Validate/Scan never fail terminally, so anything left is a deploy fault
                Stage::Validate | Stage::Scan | Stage::Deploy => PipelineError::Deploy(reason),
            }),
            TerminalOutcome::RetriesExhausted { .. } => {
                Err(PipelineError::RetriesExhausted { attempts })
            }
        }
    }
}

/// A finished run: the last workflow snapshot and the outcome that ended it.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedRun {
    state: WorkflowState,
    outcome: TerminalOutcome,
}

impl CompletedRun {
    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn outcome(&self) -> &TerminalOutcome {
        &self.outcome
    }

    pub fn retry_count(&self) -> u32 {
        self.state.retry_count()
    }

    pub fn into_parts(self) -> (WorkflowState, TerminalOutcome) {
        (self.state, self.outcome)
    }
}

/// A request entering the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRequest {
    pub text: String,
    /// Free-form human guidance handed to the planner on every attempt.
    pub feedback: Option<String>,
}

impl PipelineRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            feedback: None,
        }
    }

    pub fn with_feedback(mut self, feedback: Option<String>) -> Self {
        self.feedback = feedback.filter(|f| !f.trim().is_empty());
        self
    }
}

/// The external capabilities the pipeline drives.
#[derive(Clone)]
pub struct Collaborators {
    pub planner: Arc<dyn Planner>,
    pub generator: Arc<dyn Generator>,
    pub validator: Arc<dyn Validator>,
    pub scanner: Arc<dyn SecurityScanner>,
    pub deployer: Arc<dyn Deployer>,
}

enum Step {
    Plan,
    Generate(Plan),
    Validate,
    Scan,
    Deploy,
    RouteBack(PriorFailure),
    Finish(TerminalOutcome),
}

pub struct PipelineController {
    collaborators: Collaborators,
    policy: RetryPolicy,
    stage_timeout: Duration,
}

impl PipelineController {
    pub fn new(collaborators: Collaborators, policy: RetryPolicy, stage_timeout: Duration) -> Self {
        Self {
            collaborators,
            policy,
            stage_timeout,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run a request to completion and return only its outcome.
    pub async fn run(&self, request: &str) -> TerminalOutcome {
        self.execute(PipelineRequest::new(request)).await.outcome
    }

    /// Run a request to completion.
    ///
    /// Stages run strictly in order and every retry re-enters at the planner.
    /// The loop ends after at most `max_retries + 1` attempts.
    pub async fn execute(&self, request: PipelineRequest) -> CompletedRun {
        let mut state = WorkflowState::new(request.text, request.feedback);

        let mut step = if state.initial_request().trim().is_empty() {
            Step::Finish(TerminalOutcome::Failed {
                stage: Stage::Plan,
                reason: "request is empty".to_string(),
            })
        } else {
            Step::Plan
        };

        loop {
            let (next_state, next_step) = match step {
                Step::Plan => self.plan(state).await,
                Step::Generate(plan) => self.generate(state, plan).await,
                Step::Validate => self.validate(state).await,
                Step::Scan => self.scan(state).await,
                Step::Deploy => self.deploy(state).await,
                Step::RouteBack(failure) => self.route_back(state, failure),
                Step::Finish(outcome) => {
                    tracing::info!(
                        outcome = outcome.label(),
                        attempts = state.attempt(),
                        retries = state.retry_count(),
                        "Pipeline finished"
                    );
                    return CompletedRun { state, outcome };
                }
            };
            state = next_state;
            step = next_step;
        }
    }

    async fn plan(&self, state: WorkflowState) -> (WorkflowState, Step) {
        let input = PlanningInput {
            request: state.initial_request(),
            feedback: state.feedback(),
            prior_plan: state.plan(),
            prior_failure: state.last_failure(),
        };
        let result = self.invoke(self.collaborators.planner.plan(input)).await;

        match result {
            Ok(plan) if plan.files.is_empty() => {
                log_stage(Stage::Plan, &state, false);
                let outcome = TerminalOutcome::Failed {
                    stage: Stage::Plan,
                    reason: "planning error: planner returned no files".to_string(),
                };
                (state, Step::Finish(outcome))
            }
            Ok(plan) => {
                log_stage(Stage::Plan, &state, true);
                tracing::info!(files = plan.files.len(), "Plan created");
                (state.with_plan(&plan), Step::Generate(plan))
            }
            Err(reason) => {
                log_stage(Stage::Plan, &state, false);
                let outcome = TerminalOutcome::Failed {
                    stage: Stage::Plan,
                    reason: format!("planning error: {reason}"),
                };
                (state, Step::Finish(outcome))
            }
        }
    }

    async fn generate(&self, state: WorkflowState, plan: Plan) -> (WorkflowState, Step) {
        let generation =
            GenerationLoop::new(self.collaborators.generator.as_ref(), self.stage_timeout);
        let result = generation
            .generate(FileQueue::from(plan.files), state.initial_request(), &plan.plan)
            .await;

        match result {
            Ok(files) => {
                log_stage(Stage::Generate, &state, true);
                (state.with_generated_files(files), Step::Validate)
            }
            Err(e) => {
                log_stage(Stage::Generate, &state, false);
                let outcome = TerminalOutcome::Failed {
                    stage: Stage::Generate,
                    reason: format!("generation error: {e}"),
                };
                (state, Step::Finish(outcome))
            }
        }
    }

    async fn validate(&self, state: WorkflowState) -> (WorkflowState, Step) {
        let result = self
            .invoke(self.collaborators.validator.validate(state.generated_files()))
            .await;

        let (verdict, formatted) = match result {
            Ok(validation) => (validation.result, validation.formatted),
            Err(reason) => (StageResult::fail(reason), None),
        };
        log_stage(Stage::Validate, &state, verdict.passed);

        if !verdict.passed {
            let failure = PriorFailure {
                stage: Stage::Validate,
                report: verdict.report.clone(),
            };
            return (
                state.with_validation(false, verdict.report),
                Step::RouteBack(failure),
            );
        }

        // The formatter may only rewrite content, never the file list
        let state = match formatted {
            Some(files) if same_file_names(&files, state.generated_files()) => {
                state.with_generated_files(files)
            }
            Some(_) => {
                tracing::warn!("Formatted files do not match the generated set, keeping originals");
                state
            }
            None => state,
        };

        (state.with_validation(true, verdict.report), Step::Scan)
    }

    async fn scan(&self, state: WorkflowState) -> (WorkflowState, Step) {
        let result = self
            .invoke(self.collaborators.scanner.scan(state.generated_files()))
            .await;

        let verdict = result.unwrap_or_else(StageResult::fail);
        log_stage(Stage::Scan, &state, verdict.passed);

        if verdict.passed {
            (state.with_security(true, verdict.report), Step::Deploy)
        } else {
            let failure = PriorFailure {
                stage: Stage::Scan,
                report: verdict.report.clone(),
            };
            (
                state.with_security(false, verdict.report),
                Step::RouteBack(failure),
            )
        }
    }

    async fn deploy(&self, state: WorkflowState) -> (WorkflowState, Step) {
        let result = self
            .invoke(self.collaborators.deployer.deploy(state.generated_files()))
            .await;

        let verdict = result.unwrap_or_else(StageResult::fail);
        log_stage(Stage::Deploy, &state, verdict.passed);

        let state = state.with_deploy_output(verdict.report.clone());

        if verdict.passed {
            let outcome = TerminalOutcome::Deployed {
                output: verdict.report,
            };
            (state, Step::Finish(outcome))
        } else if self.policy.routes_back(Stage::Deploy) {
            let failure = PriorFailure {
                stage: Stage::Deploy,
                report: verdict.report,
            };
            (state, Step::RouteBack(failure))
        } else {
            let outcome = TerminalOutcome::Failed {
                stage: Stage::Deploy,
                reason: format!("deploy error: {}", verdict.report),
            };
            (state, Step::Finish(outcome))
        }
    }

    fn route_back(&self, state: WorkflowState, failure: PriorFailure) -> (WorkflowState, Step) {
        match self.policy.decide(state.retry_count()) {
            RetryDecision::Exhausted => {
                tracing::warn!(
                    stage = %failure.stage,
                    max_retries = self.policy.max_retries(),
                    "Retry ceiling reached"
                );
                let outcome = TerminalOutcome::RetriesExhausted {
                    last_validation_report: state.validation_report().map(str::to_string),
                    last_security_report: state.security_report().map(str::to_string),
                };
                (state, Step::Finish(outcome))
            }
            RetryDecision::Retry => {
                let state = state.routed_back(failure);
                tracing::info!(
                    retry = state.retry_count(),
                    max_retries = self.policy.max_retries(),
                    "Routing back to planner"
                );
                (state, Step::Plan)
            }
        }
    }

    /// Await a collaborator call under the stage timeout, flattening errors
    /// and timeouts into a reason string.
    async fn invoke<T, F>(&self, call: F) -> std::result::Result<T, String>
    where
        F: Future<Output = crate::error::Result<T>>,
    {
        match tokio::time::timeout(self.stage_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", self.stage_timeout)),
        }
    }
}

fn log_stage(stage: Stage, state: &WorkflowState, passed: bool) {
    if passed {
        tracing::info!(stage = %stage, attempt = state.attempt(), passed, "Stage finished");
    } else {
        tracing::warn!(stage = %stage, attempt = state.attempt(), passed, "Stage finished");
    }
}

fn same_file_names(
    a: &crate::pipeline::state::ArtifactSet,
    b: &crate::pipeline::state::ArtifactSet,
) -> bool {
    a.len() == b.len() && a.keys().all(|k| b.contains_key(k))
}

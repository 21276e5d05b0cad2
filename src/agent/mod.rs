pub mod generator;
pub mod llm;
pub mod planner;
pub mod prompt;

use async_trait::async_trait;

use crate::error::Result;
use crate::pipeline::generation::GenerationContext;
use crate::pipeline::state::{FileSpec, Plan, PriorFailure};

/// Everything the planner sees for one attempt.
#[derive(Debug, Clone, Copy)]
pub struct PlanningInput<'a> {
    pub request: &'a str,
    pub feedback: Option<&'a str>,
    pub prior_plan: Option<&'a str>,
    pub prior_failure: Option<&'a PriorFailure>,
}

/// Turns a request (and what went wrong last time) into a plan and file queue.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, input: PlanningInput<'_>) -> Result<Plan>;
}

/// Produces the raw text for a single planned file.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, file: &FileSpec, context: &GenerationContext<'_>) -> Result<String>;
}

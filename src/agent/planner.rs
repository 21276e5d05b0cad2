use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::agent::llm::LlmClient;
use crate::agent::prompt;
use crate::agent::{Planner, PlanningInput};
use crate::error::{AppError, Result};
use crate::pipeline::state::{FileSpec, Plan};

pub struct LlmPlanner {
    client: Arc<LlmClient>,
    security_rules: String,
    region: String,
}

impl LlmPlanner {
    pub fn new(client: Arc<LlmClient>, security_rules: String, region: &str) -> Self {
        Self {
            client,
            security_rules,
            region: region.to_string(),
        }
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, input: PlanningInput<'_>) -> Result<Plan> {
        if let Some(failure) = input.prior_failure {
            tracing::info!(stage = %failure.stage, "Re-planning with previous failure report");
        }

        let prompt = prompt::planner_prompt(&input, &self.security_rules, &self.region);
        let response = self
            .client
            .complete(prompt::PLANNER_SYSTEM, &prompt)
            .await?;

        parse_plan(&response)
    }
}

#[derive(Deserialize)]
struct RawPlan {
    #[serde(default)]
    plan: String,
    #[serde(default)]
    files: Vec<FileSpec>,
}

/// Parse a planner reply that may wrap its JSON in prose or markdown fences.
pub fn parse_plan(response: &str) -> Result<Plan> {
    let json = extract_json_object(response)
        .ok_or_else(|| AppError::Planning("no JSON object in planner response".to_string()))?;

    let raw: RawPlan = serde_json::from_str(json)
        .map_err(|e| AppError::Planning(format!("malformed plan JSON: {e}")))?;

    if raw.plan.trim().is_empty() {
        return Err(AppError::Planning("plan is empty".to_string()));
    }
    if raw.files.is_empty() {
        return Err(AppError::Planning("plan lists no files".to_string()));
    }
    if let Some(bad) = raw.files.iter().find(|f| f.name.trim().is_empty()) {
        return Err(AppError::Planning(format!(
            "file entry without a name (brief: {})",
            bad.brief
        )));
    }

    Ok(Plan {
        plan: raw.plan,
        files: raw.files,
    })
}

/// Find the first balanced `{...}` object, skipping braces inside strings.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

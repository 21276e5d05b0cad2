use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;

use crate::agent::llm::LlmClient;
use crate::agent::prompt;
use crate::agent::Generator;
use crate::error::Result;
use crate::pipeline::generation::GenerationContext;
use crate::pipeline::state::FileSpec;

/// Per-file cap on listed resources, to keep prompts bounded.
const MAX_RESOURCES_PER_FILE: usize = 10;

pub struct LlmGenerator {
    client: Arc<LlmClient>,
    region: String,
}

impl LlmGenerator {
    pub fn new(client: Arc<LlmClient>, region: &str) -> Self {
        Self {
            client,
            region: region.to_string(),
        }
    }
}

#[async_trait]
impl Generator for LlmGenerator {
    async fn generate(&self, file: &FileSpec, context: &GenerationContext<'_>) -> Result<String> {
        let context_section = context_section(&file.name, context);
        let prompt =
            prompt::generator_prompt(&file.name, &file.brief, &context_section, &self.region);

        self.client
            .complete(prompt::GENERATOR_SYSTEM, &prompt)
            .await
    }
}

/// Describe the request, plan, and what earlier files already define.
pub fn context_section(current_file: &str, context: &GenerationContext<'_>) -> String {
    let mut parts = vec![
        format!("USER REQUEST: {}", context.request),
        format!("\nOVERALL PLAN:\n{}", context.plan),
    ];

    if !context.completed.is_empty() {
        parts.push("\nALREADY GENERATED FILES:".to_string());
        for (name, code) in context.completed {
            parts.push(format!("\n- {name}"));
            let resources = extract_resources(code);
            if !resources.is_empty() {
                parts.push("  Resources defined:".to_string());
                for resource in resources.iter().take(MAX_RESOURCES_PER_FILE) {
                    parts.push(format!("    - {resource}"));
                }
            }
        }
    }

    if !context.remaining.is_empty() {
        parts.push(format!(
            "\nREMAINING FILES: {}",
            context.remaining.names().join(", ")
        ));
    }

    parts.push(format!("\nCURRENT FILE: {current_file}\n"));
    parts.join("\n")
}

fn block_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?m)^\s*(resource|data)\s+"([^"]+)"\s+"([^"]+)""#)
            .expect("static regex is valid")
    })
}

/// List `resource` and `data` addresses declared in HCL, in source order.
pub fn extract_resources(code: &str) -> Vec<String> {
    block_pattern()
        .captures_iter(code)
        .map(|caps| match &caps[1] {
            "data" => format!("data.{}.{}", &caps[2], &caps[3]),
            _ => format!("{}.{}", &caps[2], &caps[3]),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::state::{ArtifactSet, FileQueue};

    const MAIN_TF: &str = r#"
resource "random_id" "suffix" {
  byte_length = 4
}

data "aws_vpc" "default" {
  default = true
}

resource "aws_s3_bucket" "data" {
  bucket = "data-${random_id.suffix.hex}"
}
"#;

    #[test]
    fn test_extract_resources_in_order() {
        assert_eq!(
            extract_resources(MAIN_TF),
            vec![
                "random_id.suffix".to_string(),
                "data.aws_vpc.default".to_string(),
                "aws_s3_bucket.data".to_string(),
            ]
        );
    }

    #[test]
    fn test_extract_resources_ignores_references() {
        let code = "output \"id\" {\n  value = aws_s3_bucket.data.id # resource \"x\" \"y\"\n}";
        assert!(extract_resources(code).is_empty());
    }

    #[test]
    fn test_context_section_lists_prior_files() {
        let mut completed = ArtifactSet::new();
        completed.insert("main.tf".to_string(), MAIN_TF.to_string());
        let remaining = FileQueue::from(vec![FileSpec::new("outputs.tf", "bucket id")]);
        let context = GenerationContext {
            request: "bucket",
            plan: "1. Bucket",
            completed: &completed,
            remaining: &remaining,
        };

        let section = context_section("variables.tf", &context);
        assert!(section.contains("USER REQUEST: bucket"));
        assert!(section.contains("- main.tf"));
        assert!(section.contains("    - aws_s3_bucket.data"));
        assert!(section.contains("REMAINING FILES: outputs.tf"));
        assert!(section.contains("CURRENT FILE: variables.tf"));
    }
}

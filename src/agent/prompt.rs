use std::path::Path;

use crate::agent::PlanningInput;
use crate::pipeline::stage::Stage;

/// Used when no rules file is configured or it cannot be read.
pub const DEFAULT_SECURITY_RULES: &str = "\
S3: 4 resources - bucket + encryption(AES256) + public_access_block(all true) + versioning(Enabled)
EC2: metadata_options{http_tokens=required}, no public IP, encrypted EBS, security group
DynamoDB: server_side_encryption + point_in_time_recovery
Lambda: IAM role + tracing_config(Active)
RDS: storage_encrypted + not publicly_accessible + backup_retention>=7";

pub const PLANNER_SYSTEM: &str = "You are an infrastructure architect. You design minimal, secure \
Terraform projects for AWS and answer with a single JSON object.";

pub const GENERATOR_SYSTEM: &str = "You are a Terraform engineer. You write complete, valid HCL \
files and answer with code only.";

/// Load the security rules handed to the planner.
pub async fn load_security_rules(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return DEFAULT_SECURITY_RULES.to_string();
    };

    match tokio::fs::read_to_string(path).await {
        Ok(rules) if !rules.trim().is_empty() => rules,
        Ok(_) => {
            tracing::warn!(path = %path.display(), "Security rules file is empty, using defaults");
            DEFAULT_SECURITY_RULES.to_string()
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not load security rules, using defaults");
            DEFAULT_SECURITY_RULES.to_string()
        }
    }
}

pub fn planner_prompt(input: &PlanningInput<'_>, security_rules: &str, region: &str) -> String {
    let request = input.request;

    let error_section = match input.prior_failure {
        Some(failure) => {
            let source = match failure.stage {
                Stage::Validate => "terraform validate",
                Stage::Scan => "the tfsec security scan",
                Stage::Deploy => "terraform apply",
                Stage::Plan | Stage::Generate => "the previous attempt",
            };
            format!(
                "\n## Previous Attempt Failed\nThe last plan was rejected by {source}:\n\n```\n{}\n```\n\nFix it by analyzing the exact error and being more specific in the resource briefs.\n",
                failure.report.trim()
            )
        }
        None => String::new(),
    };

    let prior_plan_section = match input.prior_plan {
        Some(plan) if input.prior_failure.is_some() => {
            format!("\n## Previous Plan\n{plan}\n")
        }
        _ => String::new(),
    };

    let feedback_section = match input.feedback {
        Some(feedback) => format!("\n## Human Feedback\n{feedback}\n"),
        None => String::new(),
    };

    format!(
        r#"Think step-by-step to create a MINIMAL Terraform architecture.

## Request
{request}
{error_section}{prior_plan_section}{feedback_section}
## Reasoning
1. What AWS resources are EXPLICITLY requested? Do not add extras.
2. What security configuration is MANDATORY for these resources?
3. What files are needed? provider.tf always, plus main.tf.

## Security Requirements
{security_rules}

## Keep It Simple
- No variables.tf or outputs.tf unless explicitly requested
- No KMS keys (use AES256)
- No log buckets unless asked
- 3-5 steps in the plan
- Be SPECIFIC in briefs: list each resource type with its key attributes
- File names must be unique
- Region: {region}

## Output
Respond with JSON only:
{{
  "plan": "1. Setup provider\n2. Create [specific resource]\n3. Add [specific security config]",
  "files": [
    {{"file_name": "provider.tf", "brief": "Standard AWS provider for region {region}"}},
    {{"file_name": "main.tf", "brief": "aws_s3_bucket 'data' bucket='name', aws_s3_bucket_server_side_encryption_configuration 'data' sse_algorithm=AES256, aws_s3_bucket_public_access_block 'data' all=true, aws_s3_bucket_versioning 'data' status=Enabled"}}
  ]
}}

GOOD brief: "aws_dynamodb_table 'users' hash_key='id':S billing_mode=PAY_PER_REQUEST server_side_encryption enabled=true point_in_time_recovery enabled=true"
BAD brief: "Create DynamoDB table"

The brief for main.tf MUST list EVERY resource that will be created with its key attributes."#
    )
}

pub fn generator_prompt(file_name: &str, brief: &str, context_section: &str, region: &str) -> String {
    format!(
        r#"Generate HCL code for {file_name}. Output ONLY code, no markdown, no explanations.

{context_section}

Brief: {brief}

## Rules
- Follow the brief exactly; it names every resource and its key attributes
- provider.tf: standard AWS provider in region {region} plus the random provider
- Use .id for resource references (e.g. aws_s3_bucket.name.id)
- If resources already exist in earlier files, reference them instead of duplicating them
- Keep the code clean and minimal

## Unique Names
main.tf must start with:

resource "random_id" "suffix" {{
  byte_length = 4
}}

and every globally or regionally unique name must use it, e.g.
bucket = "my-bucket-${{random_id.suffix.hex}}" or name_prefix = "my-sg-${{random_id.suffix.hex}}-".

## provider.tf

terraform {{
  required_providers {{
    aws = {{
      source  = "hashicorp/aws"
      version = "~> 5.0"
    }}
    random = {{
      source  = "hashicorp/random"
      version = "~> 3.0"
    }}
  }}
}}

provider "aws" {{
  region = "{region}"
}}

## Default VPC Subnets

data "aws_vpc" "default" {{
  default = true
}}

data "aws_subnets" "default" {{
  filter {{
    name   = "vpc-id"
    values = [data.aws_vpc.default.id]
  }}
}}

Reference a subnet with tolist(data.aws_subnets.default.ids)[0]. There is no "default_for_az" filter.

Now generate the complete and correct HCL for: {file_name}"#
    )
}

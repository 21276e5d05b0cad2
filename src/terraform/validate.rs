use async_trait::async_trait;

use crate::error::Result;
use crate::pipeline::stage::{StageResult, ValidationResult};
use crate::pipeline::state::ArtifactSet;
use crate::terraform::command::ToolCommand;
use crate::terraform::workdir::RunWorkspace;
use crate::terraform::Validator;

pub const VALIDATION_SUCCESS: &str = "Validation successful";

/// `terraform init` + `validate` + `fmt` over the staged artifact set.
pub struct TerraformValidator {
    workspace: RunWorkspace,
    terraform: ToolCommand,
}

impl TerraformValidator {
    pub fn new(workspace: RunWorkspace, terraform: ToolCommand) -> Self {
        Self {
            workspace,
            terraform,
        }
    }
}

#[async_trait]
impl Validator for TerraformValidator {
    async fn validate(&self, files: &ArtifactSet) -> Result<ValidationResult> {
        self.workspace.stage(files).await?;
        let dir = &self.workspace.path;

        let init = self
            .terraform
            .run(dir, &["init", "-no-color", "-input=false", "-upgrade=false"])
            .await?;
        if !init.success {
            return Ok(StageResult::fail(init.failure_report()).into());
        }

        let validate = self.terraform.run(dir, &["validate", "-no-color"]).await?;
        if !validate.success {
            return Ok(StageResult::fail(validate.failure_report()).into());
        }

        // Formatting is cosmetic: a failure here keeps the unformatted files
        let fmt = self.terraform.run(dir, &["fmt", "-recursive"]).await?;
        let formatted = if fmt.success {
            match self.workspace.read_files(files.keys()).await {
                Ok(formatted) => Some(formatted),
                Err(e) => {
                    tracing::warn!(error = %e, "Could not read formatted files back");
                    None
                }
            }
        } else {
            tracing::warn!(report = %fmt.failure_report(), "terraform fmt failed");
            None
        };

        Ok(ValidationResult {
            result: StageResult::pass(format!(
                "{VALIDATION_SUCCESS}. Code is syntactically correct and well-formed.\n\n{}",
                validate.stdout.trim()
            )),
            formatted,
        })
    }
}

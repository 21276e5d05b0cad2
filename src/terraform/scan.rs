use async_trait::async_trait;

use crate::config::TerraformConfig;
use crate::error::{AppError, Result};
use crate::pipeline::stage::StageResult;
use crate::pipeline::state::ArtifactSet;
use crate::terraform::command::ToolCommand;
use crate::terraform::workdir::RunWorkspace;
use crate::terraform::SecurityScanner;

pub const SECURITY_SUCCESS: &str = "No security issues detected";

/// tfsec over the directory prepared by validation.
pub struct TfsecScanner {
    workspace: RunWorkspace,
    tfsec: ToolCommand,
    minimum_severity: String,
    exclude: Vec<String>,
}

impl TfsecScanner {
    pub fn new(workspace: RunWorkspace, tfsec: ToolCommand, config: &TerraformConfig) -> Self {
        Self {
            workspace,
            tfsec,
            minimum_severity: config.tfsec_minimum_severity.clone(),
            exclude: config.tfsec_exclude.clone(),
        }
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![
            ".".to_string(),
            "--no-color".to_string(),
            "--format".to_string(),
            "default".to_string(),
            "--minimum-severity".to_string(),
            self.minimum_severity.clone(),
        ];
        if !self.exclude.is_empty() {
            args.push("--exclude".to_string());
            args.push(self.exclude.join(","));
        }
        args
    }
}

#[async_trait]
impl SecurityScanner for TfsecScanner {
    async fn scan(&self, files: &ArtifactSet) -> Result<StageResult> {
        // Validation stages the files; scanning anything else would be meaningless
        let staged = self.workspace.read_files(files.keys()).await.map_err(|e| {
            AppError::Tool(format!("Work directory not prepared, run validation first: {e}"))
        })?;
        if staged != *files {
            self.workspace.stage(files).await?;
        }

        let args = self.args();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.tfsec.run(&self.workspace.path, &args).await?;

        // tfsec exits 0 when no problems are detected
        if output.success {
            return Ok(StageResult::pass(format!(
                "Security scan passed. {SECURITY_SUCCESS} by tfsec."
            )));
        }

        let mut report = String::from("Security scan detected issues.\n");
        if !output.stdout.trim().is_empty() {
            report.push_str(&format!("\ntfsec Report:\n{}", output.stdout.trim()));
        }
        if !output.stderr.trim().is_empty() {
            report.push_str(&format!("\nErrors:\n{}", output.stderr.trim()));
        }

        Ok(StageResult::fail(report))
    }
}

use std::path::Path;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::pipeline::stage::StageResult;
use crate::pipeline::state::ArtifactSet;
use crate::terraform::command::ToolCommand;
use crate::terraform::workdir::RunWorkspace;
use crate::terraform::Deployer;

/// `terraform apply` over the initialized working directory.
pub struct TerraformDeployer {
    workspace: RunWorkspace,
    terraform: ToolCommand,
}

impl TerraformDeployer {
    pub fn new(workspace: RunWorkspace, terraform: ToolCommand) -> Self {
        Self {
            workspace,
            terraform,
        }
    }
}

#[async_trait]
impl Deployer for TerraformDeployer {
    async fn deploy(&self, files: &ArtifactSet) -> Result<StageResult> {
        if !self.workspace.is_initialized() {
            return Err(AppError::Tool(format!(
                "Terraform not initialized in {}, run validation first",
                self.workspace.path.display()
            )));
        }

        let staged = self.workspace.read_files(files.keys()).await?;
        if staged != *files {
            self.workspace.stage(files).await?;
        }

        tracing::info!(dir = %self.workspace.path.display(), "Applying Terraform configuration");

        // A half-finished apply leaves resources that no state file records
        let output = self
            .terraform
            .run_to_completion(
                &self.workspace.path,
                &["apply", "-auto-approve", "-no-color", "-input=false"],
            )
            .await?;

        if !output.success {
            return Ok(StageResult::fail(format!(
                "Terraform apply failed.\n{}",
                output.failure_report()
            )));
        }

        Ok(StageResult::pass(format!(
            "Terraform apply successful.\n\nOutput:\n{}",
            output.stdout.trim()
        )))
    }
}

/// Tear down everything a previous deployment created in `dir`.
pub async fn destroy(dir: &Path, terraform: &ToolCommand) -> Result<String> {
    if !dir.join(".terraform").is_dir() {
        return Err(AppError::Tool(format!(
            "{} is not an initialized Terraform directory",
            dir.display()
        )));
    }
    if !dir.join("terraform.tfstate").is_file() {
        return Err(AppError::Tool(format!(
            "No Terraform state in {}, nothing to destroy",
            dir.display()
        )));
    }

    tracing::info!(dir = %dir.display(), "Destroying Terraform-managed infrastructure");

    let output = terraform
        .run_to_completion(dir, &["destroy", "-auto-approve", "-no-color", "-input=false"])
        .await?;

    if !output.success {
        return Err(AppError::Tool(output.failure_report()));
    }

    Ok(output.stdout.trim().to_string())
}

#[cfg(all(test, unix))]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::config::WorkspaceConfig;
    use crate::terraform::testing::fake_tool;
    use crate::terraform::WorkspaceManager;

    const FAKE_TERRAFORM: &str = r#"
case "$1" in
  apply)
    if grep -q FAIL main.tf; then
      echo 'Error: creating S3 Bucket: BucketAlreadyExists' >&2
      exit 1
    fi
    echo '{"resources":[]}' > terraform.tfstate
    echo "Apply complete! Resources: 1 added, 0 changed, 0 destroyed." ;;
  destroy)
    rm -f terraform.tfstate
    echo "Destroy complete! Resources: 1 destroyed." ;;
esac
"#;

    fn main_tf(body: &str) -> ArtifactSet {
        let mut files = ArtifactSet::new();
        files.insert("main.tf".to_string(), body.to_string());
        files
    }

    async fn setup(tmp: &Path) -> (TerraformDeployer, RunWorkspace, ToolCommand) {
        setup_with(tmp, FAKE_TERRAFORM).await
    }

    async fn setup_with(tmp: &Path, script: &str) -> (TerraformDeployer, RunWorkspace, ToolCommand) {
        let mgr = WorkspaceManager::new(&WorkspaceConfig {
            base_dir: tmp.join("ws"),
            output_dir: None,
        });
        let ws = mgr.create(Uuid::new_v4()).await.unwrap();
        let terraform = fake_tool(tmp, "terraform", script);
        (
            TerraformDeployer::new(ws.clone(), terraform.clone()),
            ws,
            terraform,
        )
    }

    #[tokio::test]
    async fn test_deploy_requires_init() {
        let tmp = tempfile::tempdir().unwrap();
        let (deployer, _ws, _) = setup(tmp.path()).await;

        let err = deployer.deploy(&main_tf("ok")).await.unwrap_err();
        assert!(err.to_string().contains("not initialized"));
    }

    #[tokio::test]
    async fn test_deploy_then_destroy() {
        let tmp = tempfile::tempdir().unwrap();
        let (deployer, ws, terraform) = setup(tmp.path()).await;
        std::fs::create_dir_all(ws.path.join(".terraform")).unwrap();
        let files = main_tf("ok");
        ws.stage(&files).await.unwrap();

        let result = deployer.deploy(&files).await.unwrap();
        assert!(result.passed);
        assert!(result.report.contains("Apply complete!"));
        assert!(ws.state_file().exists());

        let out = destroy(&ws.path, &terraform).await.unwrap();
        assert!(out.contains("Destroy complete!"));
        assert!(!ws.state_file().exists());
    }

    #[tokio::test]
    async fn test_apply_failure_is_a_failed_result() {
        let tmp = tempfile::tempdir().unwrap();
        let (deployer, ws, _) = setup(tmp.path()).await;
        std::fs::create_dir_all(ws.path.join(".terraform")).unwrap();
        let files = main_tf("FAIL");
        ws.stage(&files).await.unwrap();

        let result = deployer.deploy(&files).await.unwrap();
        assert!(!result.passed);
        assert!(result.report.contains("BucketAlreadyExists"));
    }

    #[tokio::test]
    async fn test_destroy_without_state_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let (_, ws, terraform) = setup(tmp.path()).await;
        std::fs::create_dir_all(ws.path.join(".terraform")).unwrap();

        let err = destroy(&ws.path, &terraform).await.unwrap_err();
        assert!(err.to_string().contains("nothing to destroy"));
    }

    #[tokio::test]
    async fn test_abandoned_apply_still_writes_state() {
        const SLOW_TERRAFORM: &str = r#"
case "$1" in
  apply)
    sleep 1
    echo '{"resources":[]}' > terraform.tfstate
    echo "Apply complete!" ;;
esac
"#;
        let tmp = tempfile::tempdir().unwrap();
        let (deployer, ws, _) = setup_with(tmp.path(), SLOW_TERRAFORM).await;
        std::fs::create_dir_all(ws.path.join(".terraform")).unwrap();
        let files = main_tf("ok");
        ws.stage(&files).await.unwrap();

        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            deployer.deploy(&files),
        )
        .await;
        assert!(abandoned.is_err());

        for _ in 0..50 {
            if ws.state_file().exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        assert!(ws.state_file().exists());
    }
}

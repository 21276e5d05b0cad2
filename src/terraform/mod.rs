pub mod apply;
pub mod command;
pub mod cost;
pub mod scan;
pub mod validate;
pub mod workdir;

use async_trait::async_trait;

use crate::error::Result;
use crate::pipeline::stage::{StageResult, ValidationResult};
use crate::pipeline::state::ArtifactSet;

pub use apply::TerraformDeployer;
pub use scan::TfsecScanner;
pub use validate::TerraformValidator;
pub use workdir::{RunWorkspace, WorkspaceManager};

/// Checks generated code for structural and syntactic defects.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, files: &ArtifactSet) -> Result<ValidationResult>;
}

/// Checks validated code against security policy.
#[async_trait]
pub trait SecurityScanner: Send + Sync {
    async fn scan(&self, files: &ArtifactSet) -> Result<StageResult>;
}

/// Applies validated, secure code to the infrastructure provider.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, files: &ArtifactSet) -> Result<StageResult>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::Path;

    use super::command::ToolCommand;

    /// A stand-in tool: a shell script run through `sh`, receiving the
    /// subcommand as `$1`.
    pub fn fake_tool(dir: &Path, name: &str, body: &str) -> ToolCommand {
        let script = dir.join(format!("{name}.sh"));
        std::fs::write(&script, body).unwrap();
        ToolCommand::new(&format!("sh {}", script.display()), None)
    }
}

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{AppError, Result};

/// Captured result of a finished tool process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub command: String,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Human-readable failure report for the planner.
    pub fn failure_report(&self) -> String {
        format!(
            "Terraform command failed.\nCommand: '{}'\nStderr: {}\nStdout: {}",
            self.command,
            self.stderr.trim(),
            self.stdout.trim()
        )
    }
}

/// Runs one external tool inside a working directory.
///
/// The configured command line may carry leading arguments for wrappers
/// (e.g. `tfenv exec` or `sh ./terraform.sh`).
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    base_args: Vec<String>,
    plugin_cache_dir: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(command_line: &str, plugin_cache_dir: Option<PathBuf>) -> Self {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        Self {
            program: parts.next().unwrap_or_default(),
            base_args: parts.collect(),
            plugin_cache_dir,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run the tool and wait for it to exit.
    ///
    /// A non-zero exit is reported through `CommandOutput::success`; only a
    /// failure to start the process is an error. Dropping the returned future
    /// kills the process.
    pub async fn run(&self, dir: &Path, args: &[&str]) -> Result<CommandOutput> {
        self.execute(dir, args, true).await
    }

    /// Run the tool on its own task so that it always runs to completion.
    ///
    /// Dropping the returned future (e.g. on a stage timeout) detaches the
    /// process instead of killing it. Used for commands that change real
    /// infrastructure and record it in local state.
    pub async fn run_to_completion(&self, dir: &Path, args: &[&str]) -> Result<CommandOutput> {
        let tool = self.clone();
        let dir = dir.to_path_buf();
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();

        let handle = tokio::spawn(async move {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            tool.execute(&dir, &args, false).await
        });

        handle
            .await
            .map_err(|e| AppError::Tool(format!("Tool task failed: {e}")))?
    }

    async fn execute(&self, dir: &Path, args: &[&str], kill_on_drop: bool) -> Result<CommandOutput> {
        let command = std::iter::once(self.program.as_str())
            .chain(self.base_args.iter().map(String::as_str))
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");

        tracing::debug!(command = %command, dir = %dir.display(), "Running tool");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .env("TF_IN_AUTOMATION", "1")
            .kill_on_drop(kill_on_drop);

        if let Some(cache) = &self.plugin_cache_dir {
            cmd.env("TF_PLUGIN_CACHE_DIR", cache)
                .env("TF_PLUGIN_CACHE_MAY_BREAK_DEPENDENCY_LOCK_FILE", "true");
        }

        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::Tool(format!(
                    "`{}` executable not found. Please ensure it is installed and in PATH.",
                    self.program
                ))
            } else {
                AppError::Tool(format!("Failed to run `{command}`: {e}"))
            }
        })?;

        let result = CommandOutput {
            command,
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.success {
            tracing::debug!(command = %result.command, status = ?output.status, "Tool exited with failure");
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_tool_error() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = ToolCommand::new("canopy-definitely-not-installed", None);
        let err = tool.run(tmp.path(), &["version"]).await.unwrap_err();
        assert!(err.to_string().contains("executable not found"));
    }

    #[test]
    fn test_command_line_splits_wrapper_args() {
        let tool = ToolCommand::new("tfenv exec", None);
        assert_eq!(tool.program(), "tfenv");
        assert_eq!(tool.base_args, vec!["exec".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_exit_status_and_output() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = ToolCommand::new("sh", None);

        let ok = tool.run(tmp.path(), &["-c", "echo hello"]).await.unwrap();
        assert!(ok.success);
        assert_eq!(ok.stdout.trim(), "hello");

        let failed = tool
            .run(tmp.path(), &["-c", "echo broken >&2; exit 1"])
            .await
            .unwrap();
        assert!(!failed.success);
        assert!(failed.failure_report().contains("Stderr: broken"));
        assert!(failed.failure_report().contains("Command: 'sh -c"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_to_completion_survives_dropped_caller() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = ToolCommand::new("sh", None);

        let dropped = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            tool.run_to_completion(tmp.path(), &["-c", "sleep 0.5; echo done > marker"]),
        )
        .await;
        assert!(dropped.is_err());

        let marker = tmp.path().join("marker");
        for _ in 0..50 {
            if marker.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        assert!(marker.exists());
    }
}

use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub terraform: TerraformConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// How many finished runs the service remembers.
    #[serde(default = "default_run_retention")]
    pub run_retention: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            run_retention: default_run_retention(),
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_true")]
    pub rate_limit_retry: bool,
    #[serde(default = "default_rate_limit_max_retries")]
    pub rate_limit_max_retries: u32,
    #[serde(default = "default_rate_limit_backoff_secs")]
    pub rate_limit_backoff_secs: u64,
}

// Manual Debug impl to avoid leaking the API key
impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("api_url", &self.api_url)
            .field("rate_limit_retry", &self.rate_limit_retry)
            .field("rate_limit_max_retries", &self.rate_limit_max_retries)
            .field("rate_limit_backoff_secs", &self.rate_limit_backoff_secs)
            .finish()
    }
}

/// What a failed deployment does to the run.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeployFailurePolicy {
    /// Deploy failures end the run.
    #[default]
    Terminal,
    /// Deploy failures are routed back to the planner like validation failures.
    Retry,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    #[serde(default)]
    pub deploy_failure: DeployFailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            stage_timeout_secs: default_stage_timeout_secs(),
            deploy_failure: DeployFailurePolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_dir")]
    pub base_dir: PathBuf,
    /// Where finished runs save their artifact set. Nothing is saved when unset.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_dir: default_workspace_dir(),
            output_dir: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TerraformConfig {
    #[serde(default = "default_terraform_bin")]
    pub terraform_bin: String,
    #[serde(default = "default_tfsec_bin")]
    pub tfsec_bin: String,
    #[serde(default)]
    pub plugin_cache_dir: Option<PathBuf>,
    #[serde(default = "default_tfsec_minimum_severity")]
    pub tfsec_minimum_severity: String,
    #[serde(default = "default_tfsec_exclude")]
    pub tfsec_exclude: Vec<String>,
}

impl Default for TerraformConfig {
    fn default() -> Self {
        Self {
            terraform_bin: default_terraform_bin(),
            tfsec_bin: default_tfsec_bin(),
            plugin_cache_dir: None,
            tfsec_minimum_severity: default_tfsec_minimum_severity(),
            tfsec_exclude: default_tfsec_exclude(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlannerConfig {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub security_rules_path: Option<PathBuf>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            security_rules_path: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_run_retention() -> usize {
    crate::registry::DEFAULT_RUN_RETENTION
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_api_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_true() -> bool {
    true
}

fn default_rate_limit_max_retries() -> u32 {
    3
}

fn default_rate_limit_backoff_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_stage_timeout_secs() -> u64 {
    900
}

fn default_workspace_dir() -> PathBuf {
    PathBuf::from("/tmp/canopy-workspaces")
}

fn default_terraform_bin() -> String {
    "terraform".to_string()
}

fn default_tfsec_bin() -> String {
    "tfsec".to_string()
}

fn default_tfsec_minimum_severity() -> String {
    "HIGH".to_string()
}

fn default_tfsec_exclude() -> Vec<String> {
    vec![
        "aws-s3-encryption-customer-key".to_string(),
        "aws-s3-enable-bucket-logging".to_string(),
        "aws-ec2-no-public-egress-sgr".to_string(),
    ]
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Load from file if specified
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("canopy").required(false));
        }

        // Environment variable overrides with CANOPY_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("CANOPY")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("terraform.tfsec_exclude"),
        );

        let config = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))
    }

    pub fn llm_api_key(&self) -> &str {
        &self.llm.api_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_applies_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("canopy.toml");
        std::fs::write(&path, "[llm]\napi_key = \"sk-test\"\n").unwrap();

        let config = AppConfig::load(path.to_str()).unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.run_retention, 1000);
        assert_eq!(config.pipeline.max_retries, 3);
        assert_eq!(config.pipeline.deploy_failure, DeployFailurePolicy::Terminal);
        assert_eq!(config.terraform.tfsec_exclude.len(), 3);
        assert_eq!(config.planner.region, "us-east-1");
        assert!(config.workspace.output_dir.is_none());
    }

    #[test]
    fn test_load_reads_deploy_policy() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("canopy.toml");
        std::fs::write(
            &path,
            "[llm]\napi_key = \"sk-test\"\n\n[pipeline]\nmax_retries = 5\ndeploy_failure = \"retry\"\n",
        )
        .unwrap();

        let config = AppConfig::load(path.to_str()).unwrap();

        assert_eq!(config.pipeline.max_retries, 5);
        assert_eq!(config.pipeline.deploy_failure, DeployFailurePolicy::Retry);
    }

    #[test]
    fn test_load_requires_api_key() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("canopy.toml");
        std::fs::write(&path, "[server]\nport = 8080\n").unwrap();

        assert!(AppConfig::load(path.to_str()).is_err());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let llm = LlmConfig {
            api_key: "sk-secret".to_string(),
            model: default_model(),
            max_tokens: 1,
            api_url: default_api_url(),
            rate_limit_retry: true,
            rate_limit_max_retries: 1,
            rate_limit_backoff_secs: 1,
        };
        let rendered = format!("{llm:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}

use serde::{Deserialize, Serialize};

use crate::pipeline::state::ArtifactSet;

/// The five ordered pipeline steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Plan,
    Generate,
    Validate,
    Scan,
    Deploy,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Plan => "plan",
            Stage::Generate => "generate",
            Stage::Validate => "validate",
            Stage::Scan => "scan",
            Stage::Deploy => "deploy",
        }
    }

    /// Whether a failure at this stage is absorbed by the retry loop.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Stage::Validate | Stage::Scan)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Uniform pass/fail outcome of a tool-backed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageResult {
    pub passed: bool,
    pub report: String,
}

impl StageResult {
    pub fn pass(report: impl Into<String>) -> Self {
        Self {
            passed: true,
            report: report.into(),
        }
    }

    pub fn fail(report: impl Into<String>) -> Self {
        Self {
            passed: false,
            report: report.into(),
        }
    }
}

/// Validator output: the verdict plus, on success, the canonically formatted
/// artifact set when the tool produces one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub result: StageResult,
    pub formatted: Option<ArtifactSet>,
}

impl From<StageResult> for ValidationResult {
    fn from(result: StageResult) -> Self {
        Self {
            result,
            formatted: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_validate_and_scan_retry() {
        assert!(Stage::Validate.is_retryable());
        assert!(Stage::Scan.is_retryable());
        assert!(!Stage::Plan.is_retryable());
        assert!(!Stage::Generate.is_retryable());
        assert!(!Stage::Deploy.is_retryable());
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Scan.to_string(), "scan");
        assert_eq!(serde_json::to_string(&Stage::Deploy).unwrap(), "\"deploy\"");
    }
}

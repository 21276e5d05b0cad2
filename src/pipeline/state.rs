use std::collections::VecDeque;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::pipeline::stage::Stage;

/// One file the planner wants generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSpec {
    #[serde(rename = "file_name")]
    pub name: String,
    pub brief: String,
}

impl FileSpec {
    pub fn new(name: impl Into<String>, brief: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            brief: brief.into(),
        }
    }
}

/// FIFO of files still to be generated in the current attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileQueue {
    pending: VecDeque<FileSpec>,
}

impl FileQueue {
    pub fn pop_front(&mut self) -> Option<FileSpec> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.pending.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileSpec> {
        self.pending.iter()
    }
}

impl From<Vec<FileSpec>> for FileQueue {
    fn from(files: Vec<FileSpec>) -> Self {
        Self {
            pending: files.into(),
        }
    }
}

impl FromIterator<FileSpec> for FileQueue {
    fn from_iter<I: IntoIterator<Item = FileSpec>>(iter: I) -> Self {
        Self {
            pending: iter.into_iter().collect(),
        }
    }
}

/// Filename → generated content, in generation order.
pub type ArtifactSet = IndexMap<String, String>;

/// What the planner handed back for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub plan: String,
    pub files: Vec<FileSpec>,
}

/// Report from the stage that caused the previous attempt to be routed back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriorFailure {
    pub stage: Stage,
    pub report: String,
}

/// The record threaded through the pipeline for a single request.
///
/// Stages never mutate it in place: each transition consumes the current
/// snapshot and returns the next one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowState {
    initial_request: String,
    feedback: Option<String>,
    plan: Option<String>,
    planned_files: Vec<String>,
    generated_files: ArtifactSet,
    validation_report: Option<String>,
    security_report: Option<String>,
    deploy_output: Option<String>,
    validation_passed: bool,
    security_passed: bool,
    retry_count: u32,
    last_failure: Option<PriorFailure>,
}

impl WorkflowState {
    pub fn new(initial_request: impl Into<String>, feedback: Option<String>) -> Self {
        Self {
            initial_request: initial_request.into(),
            feedback,
            plan: None,
            planned_files: Vec::new(),
            generated_files: ArtifactSet::new(),
            validation_report: None,
            security_report: None,
            deploy_output: None,
            validation_passed: false,
            security_passed: false,
            retry_count: 0,
            last_failure: None,
        }
    }

    pub fn initial_request(&self) -> &str {
        &self.initial_request
    }

    pub fn feedback(&self) -> Option<&str> {
        self.feedback.as_deref()
    }

    pub fn plan(&self) -> Option<&str> {
        self.plan.as_deref()
    }

    pub fn planned_files(&self) -> &[String] {
        &self.planned_files
    }

    pub fn generated_files(&self) -> &ArtifactSet {
        &self.generated_files
    }

    pub fn validation_report(&self) -> Option<&str> {
        self.validation_report.as_deref()
    }

    pub fn security_report(&self) -> Option<&str> {
        self.security_report.as_deref()
    }

    pub fn deploy_output(&self) -> Option<&str> {
        self.deploy_output.as_deref()
    }

    pub fn validation_passed(&self) -> bool {
        self.validation_passed
    }

    pub fn security_passed(&self) -> bool {
        self.security_passed
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// 1-based number of the attempt currently executing.
    pub fn attempt(&self) -> u32 {
        self.retry_count + 1
    }

    pub fn last_failure(&self) -> Option<&PriorFailure> {
        self.last_failure.as_ref()
    }

    pub(crate) fn with_plan(self, plan: &Plan) -> Self {
        Self {
            plan: Some(plan.plan.clone()),
            planned_files: plan.files.iter().map(|f| f.name.clone()).collect(),
            ..self
        }
    }

    pub(crate) fn with_generated_files(self, generated_files: ArtifactSet) -> Self {
        Self {
            generated_files,
            ..self
        }
    }

    /// Record a validation result. A passing report is dropped so that the
    /// field only ever holds defects.
    pub(crate) fn with_validation(self, passed: bool, report: String) -> Self {
        Self {
            validation_passed: passed,
            validation_report: if passed { None } else { Some(report) },
            ..self
        }
    }

    pub(crate) fn with_security(self, passed: bool, report: String) -> Self {
        Self {
            security_passed: passed,
            security_report: if passed { None } else { Some(report) },
            ..self
        }
    }

    pub(crate) fn with_deploy_output(self, output: String) -> Self {
        Self {
            deploy_output: Some(output),
            ..self
        }
    }

    /// Start the next attempt: bump the retry count, remember why, and drop
    /// everything produced by the failed attempt.
    pub(crate) fn routed_back(self, failure: PriorFailure) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            last_failure: Some(failure),
            planned_files: Vec::new(),
            generated_files: ArtifactSet::new(),
            validation_passed: false,
            security_passed: false,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_with(names: &[&str]) -> Plan {
        Plan {
            plan: "1. Provider\n2. Bucket".to_string(),
            files: names.iter().map(|n| FileSpec::new(*n, "brief")).collect(),
        }
    }

    #[test]
    fn test_new_state_defaults() {
        let state = WorkflowState::new("create a bucket", None);
        assert_eq!(state.initial_request(), "create a bucket");
        assert_eq!(state.retry_count(), 0);
        assert_eq!(state.attempt(), 1);
        assert!(!state.validation_passed());
        assert!(!state.security_passed());
        assert!(state.plan().is_none());
        assert!(state.generated_files().is_empty());
    }

    #[test]
    fn test_routed_back_clears_attempt_output() {
        let mut files = ArtifactSet::new();
        files.insert("main.tf".to_string(), "resource {}".to_string());

        let state = WorkflowState::new("req", None)
            .with_plan(&plan_with(&["main.tf"]))
            .with_generated_files(files)
            .with_validation(true, "ok".to_string())
            .with_security(false, "missing versioning".to_string())
            .routed_back(PriorFailure {
                stage: Stage::Scan,
                report: "missing versioning".to_string(),
            });

        assert_eq!(state.retry_count(), 1);
        assert!(state.generated_files().is_empty());
        assert!(state.planned_files().is_empty());
        assert!(!state.validation_passed());
        assert!(!state.security_passed());
        // The prior plan and last report survive for the next planner call
        assert!(state.plan().is_some());
        assert_eq!(state.security_report(), Some("missing versioning"));
        assert_eq!(state.last_failure().unwrap().stage, Stage::Scan);
    }

    #[test]
    fn test_passing_validation_drops_report() {
        let state = WorkflowState::new("req", None)
            .with_validation(false, "bad syntax".to_string())
            .with_validation(true, "Validation successful".to_string());
        assert!(state.validation_passed());
        assert!(state.validation_report().is_none());
    }

    #[test]
    fn test_file_queue_preserves_order() {
        let mut queue = FileQueue::from(vec![
            FileSpec::new("provider.tf", "a"),
            FileSpec::new("main.tf", "b"),
        ]);
        assert_eq!(queue.names(), vec!["provider.tf", "main.tf"]);
        assert_eq!(queue.pop_front().unwrap().name, "provider.tf");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_file_spec_uses_file_name_key() {
        let spec: FileSpec =
            serde_json::from_str(r#"{"file_name": "main.tf", "brief": "bucket"}"#).unwrap();
        assert_eq!(spec, FileSpec::new("main.tf", "bucket"));
    }
}

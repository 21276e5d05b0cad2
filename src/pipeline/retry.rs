use crate::config::DeployFailurePolicy;
use crate::pipeline::stage::Stage;

/// The retry ceiling used when nothing else is configured.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// What to do with a retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enter the pipeline at the planner.
    Retry,
    /// The ceiling is reached; stop.
    Exhausted,
}

/// Tracks routed-back failures against a hard ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    deploy_failure: DeployFailurePolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            deploy_failure: DeployFailurePolicy::Terminal,
        }
    }

    pub fn with_deploy_failure(mut self, policy: DeployFailurePolicy) -> Self {
        self.deploy_failure = policy;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Upper bound on full attempts for one run.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Whether a failure at `stage` routes back to the planner.
    pub fn routes_back(&self, stage: Stage) -> bool {
        stage.is_retryable()
            || (stage == Stage::Deploy && self.deploy_failure == DeployFailurePolicy::Retry)
    }

    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        if retry_count >= self.max_retries {
            RetryDecision::Exhausted
        } else {
            RetryDecision::Retry
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_against_ceiling() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(0), RetryDecision::Retry);
        assert_eq!(policy.decide(2), RetryDecision::Retry);
        assert_eq!(policy.decide(3), RetryDecision::Exhausted);
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn test_zero_retries_exhausts_immediately() {
        let policy = RetryPolicy::new(0);
        assert_eq!(policy.decide(0), RetryDecision::Exhausted);
    }

    #[test]
    fn test_deploy_routing_follows_policy() {
        let terminal = RetryPolicy::default();
        assert!(!terminal.routes_back(Stage::Deploy));

        let retry = RetryPolicy::default().with_deploy_failure(DeployFailurePolicy::Retry);
        assert!(retry.routes_back(Stage::Deploy));
        assert!(!retry.routes_back(Stage::Plan));
        assert!(retry.routes_back(Stage::Validate));
    }
}

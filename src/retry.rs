// src/retry.rs
use std::collections::HashMap;
use std::time::Duration;

use crate::error::is_fatal;
use crate::job::Job;
use crate::result::{FailureKind, JobFailure};

/// Per-type retry settings. The delay is fixed between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryRule {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryRule {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Single attempt, no retry.
    pub fn none() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAction {
    /// Re-deliver the same job id after `delay`.
    Retry(Duration),
    /// Stop here; the failure is written as the job's final result.
    Fail(JobFailure),
}

/// Decides what happens to a job whose handler returned an error.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    rules: HashMap<String, RetryRule>,
    fallback: RetryRule,
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, job_type: impl Into<String>, rule: RetryRule) -> Self {
        self.rules.insert(job_type.into(), rule);
        self
    }

    pub fn with_rules(mut self, rules: HashMap<String, RetryRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Rule for types without one. Defaults to no retry.
    pub fn with_fallback(mut self, rule: RetryRule) -> Self {
        self.fallback = rule;
        self
    }

    pub fn rule_for(&self, job_type: &str) -> RetryRule {
        self.rules.get(job_type).copied().unwrap_or(self.fallback)
    }

    pub fn on_failure(&self, job: &Job, error: &anyhow::Error) -> RetryAction {
        if is_fatal(error) {
            return RetryAction::Fail(JobFailure::terminal(
                FailureKind::NonRetryable,
                format!("{error:#}"),
            ));
        }

        let rule = self.rule_for(&job.job_type);
        if job.retries_attempted < rule.max_retries {
            return RetryAction::Retry(rule.base_delay);
        }

        let message = if rule.max_retries == 0 {
            format!("{error:#}")
        } else {
            format!("{error:#} (gave up after {} retries)", job.retries_attempted)
        };
        RetryAction::Fail(JobFailure::terminal(FailureKind::Terminal, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::fatal;
    use crate::job::Priority;

    fn failing_job(retries: u32) -> Job {
        let mut job = Job::new("failing_task", vec![], "celery", Priority::Normal);
        job.retries_attempted = retries;
        job
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new().with_rule(
            "failing_task",
            RetryRule::new(3, Duration::from_secs(5)),
        )
    }

    #[test]
    fn test_retries_until_exhausted() {
        let policy = policy();
        let err = anyhow::anyhow!("random failure");

        for attempted in 0..3 {
            assert_eq!(
                policy.on_failure(&failing_job(attempted), &err),
                RetryAction::Retry(Duration::from_secs(5))
            );
        }

        match policy.on_failure(&failing_job(3), &err) {
            RetryAction::Fail(failure) => {
                assert_eq!(failure.kind, FailureKind::Terminal);
                assert!(failure.terminal);
                assert!(failure.message.contains("random failure"));
                assert!(failure.message.contains("3 retries"));
            }
            other => panic!("expected terminal failure, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_fails_immediately() {
        let policy = policy();
        let mut job = failing_job(0);
        job.job_type = "never_configured".to_string();

        assert!(matches!(
            policy.on_failure(&job, &anyhow::anyhow!("nope")),
            RetryAction::Fail(JobFailure {
                kind: FailureKind::Terminal,
                ..
            })
        ));
    }

    #[test]
    fn test_fatal_errors_skip_retries() {
        let policy = policy();
        match policy.on_failure(&failing_job(0), &fatal("bad arguments")) {
            RetryAction::Fail(failure) => assert_eq!(failure.kind, FailureKind::NonRetryable),
            other => panic!("expected non-retryable failure, got {other:?}"),
        }
    }

    #[test]
    fn test_fallback_rule() {
        let policy = RetryPolicy::new().with_fallback(RetryRule::new(1, Duration::ZERO));
        assert_eq!(
            policy.on_failure(&failing_job(0), &anyhow::anyhow!("x")),
            RetryAction::Retry(Duration::ZERO)
        );
    }
}

// src/error.rs
//! Error types for the task queue.
//!
//! Only submission errors reach a caller synchronously. Execution errors are
//! plain `anyhow::Error`s returned by handlers and stay inside the worker
//! pool; whatever ends a job for good is written to the result store as a
//! [`JobFailure`](crate::result::JobFailure).

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Failures talking to the queue or result store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// An entry was taken off a queue but does not decode as a job.
    #[error("Undecodable queue entry (job id {job_id:?}): {reason}")]
    Undecodable {
        job_id: Option<String>,
        job_type: Option<String>,
        raw: String,
        reason: String,
    },
}

/// Raised synchronously by `submit` / `submit_chain`.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("A chain needs at least one step")]
    EmptyChain,

    #[error("Queue store rejected job: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Handler '{0}' is already registered")]
    Duplicate(String),

    #[error("No handler registered for '{0}'")]
    Missing(String),
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("Pool is already running")]
    AlreadyRunning,

    #[error("Pool is not running")]
    NotRunning,

    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Interval for '{0}' must be greater than zero")]
    ZeroInterval(String),

    #[error("Interval for '{0}' is too long to schedule")]
    IntervalTooLong(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Marker a handler wraps its error in to skip the retry policy.
///
/// ```rust,ignore
/// if amount < 0 {
///     return Err(qtask::fatal("negative amount"));
/// }
/// ```
#[derive(Debug)]
pub struct Fatal(pub String);

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Fatal {}

/// Builds a non-retryable execution error.
pub fn fatal(msg: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(Fatal(msg.into()))
}

/// True when the error (or anything in its chain) was built with [`fatal`].
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.downcast_ref::<Fatal>().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_detected_through_context() {
        let err = fatal("bad input").context("while adding");
        assert!(is_fatal(&err));
        assert!(!is_fatal(&anyhow::anyhow!("flaky network")));
    }

    #[test]
    fn test_error_display() {
        let err = SubmissionError::EmptyChain;
        assert!(err.to_string().contains("at least one step"));

        let err = SubmissionError::from(StoreError::Unavailable("down".to_string()));
        assert!(err.to_string().contains("down"));

        let err = PoolError::ShutdownTimeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30"));

        let err = RegistryError::Duplicate("add".to_string());
        assert!(err.to_string().contains("add"));
    }
}

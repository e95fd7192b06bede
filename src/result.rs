// src/result.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::job::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Retries exhausted.
    Terminal,
    /// Handler asked not to be retried.
    NonRetryable,
    /// No handler registered for the job type.
    UnknownHandler,
    /// A chain step failed, so the rest of the chain never ran.
    ChainBroken,
    /// The job could not be handed to the queue store.
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
    pub terminal: bool,
}

impl JobFailure {
    pub fn terminal(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            terminal: true,
        }
    }
}

/// Stored at `result:{job_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Job id of the chain step this one handed its value to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<JobId>,
}

impl ResultRecord {
    pub fn pending(job_id: impl Into<JobId>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Pending,
            value: None,
            error: None,
            completed_at: None,
            next: None,
        }
    }

    pub fn success(job_id: impl Into<JobId>, value: Value, next: Option<JobId>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Success,
            value: Some(value),
            error: None,
            completed_at: Some(Utc::now()),
            next,
        }
    }

    pub fn failure(job_id: impl Into<JobId>, error: JobFailure) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Failure,
            value: None,
            error: Some(error),
            completed_at: Some(Utc::now()),
            next: None,
        }
    }
}

/// What a caller sees from `get_result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Pending,
    Success { value: Value },
    Failure { error: JobFailure, terminal: bool },
}

impl JobOutcome {
    pub fn is_ready(&self) -> bool {
        !matches!(self, JobOutcome::Pending)
    }
}

impl From<ResultRecord> for JobOutcome {
    fn from(record: ResultRecord) -> Self {
        match (record.status, record.value, record.error) {
            (JobStatus::Success, value, _) => JobOutcome::Success {
                value: value.unwrap_or(Value::Null),
            },
            (JobStatus::Failure, _, Some(error)) => {
                let terminal = error.terminal;
                JobOutcome::Failure { error, terminal }
            }
            (JobStatus::Failure, _, None) => JobOutcome::Failure {
                error: JobFailure::terminal(FailureKind::Terminal, "unknown failure"),
                terminal: true,
            },
            (JobStatus::Pending, _, _) => JobOutcome::Pending,
        }
    }
}

/// Key-value store for result records. Entries expire after the store's TTL.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn put(&self, record: &ResultRecord) -> Result<(), StoreError>;
    async fn get(&self, job_id: &str) -> Result<Option<ResultRecord>, StoreError>;
}

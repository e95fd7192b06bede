// src/queue.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::job::Job;

/// Named FIFO queues plus a delayed set, shared by every pool.
///
/// Implementations must make `pop` atomic per queue: one job is handed to
/// exactly one caller. `promote_due` must claim a delayed job before pushing
/// it so concurrent promoters never deliver it twice.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Appends to the tail of `queue:{job.queue}`.
    async fn push(&self, job: &Job) -> Result<(), StoreError>;

    /// Puts a reserved-but-unexecuted job back at the head of its queue.
    async fn push_front(&self, job: &Job) -> Result<(), StoreError>;

    async fn pop(&self, queue: &str) -> Result<Option<Job>, StoreError>;

    /// Parks a job until `run_at`; it reaches its queue on a later `promote_due`.
    async fn schedule(&self, job: &Job, run_at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Moves every delayed job due at `now` to the tail of its queue.
    ///
    /// Claiming and pushing happen as one step; an entry that names no queue
    /// goes to the dead-letter list instead.
    async fn promote_due(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Keeps an entry no worker can run, so it is never silently dropped.
    async fn dead_letter(&self, raw: &str) -> Result<(), StoreError>;

    async fn len(&self, queue: &str) -> Result<usize, StoreError>;
}

/// Pops from `queues` in the given order, returning the first job found.
pub async fn pop_first(
    store: &dyn QueueStore,
    queues: &[String],
) -> Result<Option<Job>, StoreError> {
    for queue in queues {
        if let Some(job) = store.pop(queue).await? {
            return Ok(Some(job));
        }
    }
    Ok(None)
}

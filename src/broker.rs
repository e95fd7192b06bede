// src/broker.rs
//! Submission path shared by callers, chain advancement and the scheduler.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{StoreError, SubmissionError};
use crate::job::{Job, JobId, Payload, Priority};
use crate::queue::QueueStore;
use crate::result::{FailureKind, JobFailure, JobOutcome, ResultRecord, ResultStore};
use crate::router::Router;

/// Anything that can turn a job type and payload into a queued job.
#[async_trait]
pub trait Submit: Send + Sync {
    async fn submit(
        &self,
        job_type: &str,
        payload: Payload,
        priority: Priority,
    ) -> Result<JobId, SubmissionError>;
}

pub struct Broker {
    router: Router,
    queues: Arc<dyn QueueStore>,
    results: Arc<dyn ResultStore>,
}

impl Broker {
    pub fn new(router: Router, queues: Arc<dyn QueueStore>, results: Arc<dyn ResultStore>) -> Self {
        Self {
            router,
            queues,
            results,
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn queues(&self) -> &Arc<dyn QueueStore> {
        &self.queues
    }

    pub fn results(&self) -> &Arc<dyn ResultStore> {
        &self.results
    }

    /// Routes a new job without submitting it.
    pub fn build(&self, job_type: &str, payload: Payload, priority: Priority) -> Job {
        let queue = self.router.route_with_priority(job_type, priority);
        Job::new(job_type, payload, queue, priority)
    }

    /// Writes the pending record, then enqueues.
    ///
    /// The record goes first so a worker finishing the job can never be
    /// overwritten by a late `pending`.
    pub async fn enqueue(&self, job: &Job) -> Result<(), SubmissionError> {
        self.results.put(&ResultRecord::pending(job.id.clone())).await?;
        self.queues.push(job).await?;
        debug!(job_id = %job.id, job_type = %job.job_type, queue = %job.queue, "Enqueued job");
        Ok(())
    }

    /// Raw record for `job_id`, without following chain links.
    pub async fn inspect(&self, job_id: &str) -> Result<Option<ResultRecord>, StoreError> {
        self.results.get(job_id).await
    }

    /// Outcome for `job_id`, following chain links to the live step.
    ///
    /// Reads one record per chain step; unknown ids read as pending.
    pub async fn get_result(&self, job_id: &str) -> Result<JobOutcome, StoreError> {
        let mut visited = HashSet::new();
        let mut current = job_id.to_string();
        loop {
            let Some(record) = self.results.get(&current).await? else {
                return Ok(JobOutcome::Pending);
            };
            visited.insert(current);
            let hops = visited.len() - 1;
            match record.next.clone() {
                None => return Ok(crate::chain::resolve_outcome(record, hops)),
                Some(next) if visited.contains(&next) => {
                    warn!(job_id, step = %record.job_id, next = %next, "Chain links form a cycle");
                    return Ok(JobOutcome::Failure {
                        error: JobFailure::terminal(
                            FailureKind::ChainBroken,
                            format!("chain step {} links back to {next}", record.job_id),
                        ),
                        terminal: true,
                    });
                }
                Some(next) => current = next,
            }
        }
    }
}

#[async_trait]
impl Submit for Broker {
    async fn submit(
        &self,
        job_type: &str,
        payload: Payload,
        priority: Priority,
    ) -> Result<JobId, SubmissionError> {
        let job = self.build(job_type, payload, priority);
        self.enqueue(&job).await?;
        Ok(job.id)
    }
}

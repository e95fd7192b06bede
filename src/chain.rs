// src/chain.rs
//! Multi-step pipelines where each step's value feeds the next step.
//!
//! Chain state travels with the jobs themselves: every step carries a
//! [`ChainLink`] naming the head id and the templates still to run. When a
//! step succeeds, the next template is materialized into a fresh job,
//! enqueued, and only then is the finished step's record written with
//! `next` pointing at it. A reader following `next` links from the head
//! therefore always lands on the live step or the final outcome.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use crate::broker::Broker;
use crate::error::SubmissionError;
use crate::job::{ChainLink, Job, JobId, JobTemplate};
use crate::result::{FailureKind, JobFailure, JobOutcome, ResultRecord};

pub struct ChainCoordinator {
    broker: Arc<Broker>,
}

impl ChainCoordinator {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }

    /// Submits the first step and returns its id, which identifies the chain.
    pub async fn submit_chain(&self, steps: Vec<JobTemplate>) -> Result<JobId, SubmissionError> {
        let mut steps = steps.into_iter();
        let first = steps.next().ok_or(SubmissionError::EmptyChain)?;
        let remaining: Vec<JobTemplate> = steps.collect();

        let job = self
            .broker
            .build(&first.job_type, first.payload_with(None), first.priority);
        let head = job.id.clone();
        let job = if remaining.is_empty() {
            job
        } else {
            job.with_chain(ChainLink {
                head: head.clone(),
                remaining,
            })
        };

        self.broker.enqueue(&job).await?;
        info!(
            chain = %head,
            steps = 1 + job.chain_next.as_ref().map_or(0, |l| l.remaining.len()),
            "Submitted chain"
        );
        Ok(head)
    }

    /// Hands `value` to the next step of `job`'s chain, if any.
    ///
    /// Returns the id of the submitted successor. If the successor cannot be
    /// enqueued its record is written as a `Lost` failure, so the chain ends
    /// in a visible terminal state instead of staying pending.
    pub async fn advance(&self, job: &Job, value: &Value) -> Option<JobId> {
        let link = job.chain_next.as_ref().filter(|l| l.has_successor())?;
        let (template, rest) = link.remaining.split_first()?;

        let next = self
            .broker
            .build(&template.job_type, template.payload_with(Some(value)), template.priority);
        let next = if rest.is_empty() {
            next
        } else {
            next.with_chain(ChainLink {
                head: link.head.clone(),
                remaining: rest.to_vec(),
            })
        };

        match self.broker.enqueue(&next).await {
            Ok(()) => {
                info!(
                    chain = %link.head,
                    from = %job.id,
                    to = %next.id,
                    job_type = %next.job_type,
                    "Advanced chain"
                );
            }
            Err(e) => {
                warn!(chain = %link.head, job_id = %next.id, error = %e, "Chain step lost");
                let failure = JobFailure::terminal(
                    FailureKind::Lost,
                    format!("step '{}' could not be enqueued: {e}", next.job_type),
                );
                if let Err(e) = self
                    .broker
                    .results()
                    .put(&ResultRecord::failure(next.id.clone(), failure))
                    .await
                {
                    error!(chain = %link.head, job_id = %next.id, error = %e, "Failed to record lost chain step");
                }
            }
        }
        Some(next.id)
    }
}

/// Outcome of the record a chain resolution stopped at, `hops` links away
/// from the id the caller asked about.
pub(crate) fn resolve_outcome(record: ResultRecord, hops: usize) -> JobOutcome {
    let step = record.job_id.clone();
    match JobOutcome::from(record) {
        JobOutcome::Failure { error, terminal } if hops > 0 && error.kind != FailureKind::ChainBroken => {
            JobOutcome::Failure {
                error: JobFailure {
                    kind: FailureKind::ChainBroken,
                    message: format!("chain step {step} failed: {}", error.message),
                    terminal: error.terminal,
                },
                terminal,
            }
        }
        outcome => outcome,
    }
}

/// Failure written for a chain step that still had successors.
pub(crate) fn broken_chain(job: &Job, cause: JobFailure) -> JobFailure {
    if !job.has_successor() {
        return cause;
    }
    let skipped = job.chain_next.as_ref().map_or(0, |l| l.remaining.len());
    JobFailure {
        kind: FailureKind::ChainBroken,
        message: format!("{} ({skipped} later step(s) not run)", cause.message),
        terminal: cause.terminal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueStore;
    use crate::memory_store::MemoryStore;
    use crate::router::Router;
    use serde_json::json;

    fn coordinator() -> (ChainCoordinator, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let broker = Arc::new(Broker::new(Router::default(), store.clone(), store.clone()));
        (ChainCoordinator::new(broker), store)
    }

    #[tokio::test]
    async fn test_only_first_step_submitted() {
        let (chains, store) = coordinator();
        let head = chains
            .submit_chain(vec![
                JobTemplate::new("add", vec![json!(5), json!(10)]),
                JobTemplate::new("multiply", vec![json!(2)]),
            ])
            .await
            .unwrap();

        let queued = store.peek("celery").unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, head);
        assert_eq!(queued[0].job_type, "add");
        let link = queued[0].chain_next.as_ref().unwrap();
        assert_eq!(link.head, head);
        assert_eq!(link.remaining.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_chain_rejected() {
        let (chains, _) = coordinator();
        assert!(matches!(
            chains.submit_chain(vec![]).await,
            Err(SubmissionError::EmptyChain)
        ));
    }

    #[tokio::test]
    async fn test_advance_materializes_next_step() {
        let (chains, store) = coordinator();
        chains
            .submit_chain(vec![
                JobTemplate::new("add", vec![json!(5), json!(10)]),
                JobTemplate::new("multiply", vec![json!(2)]),
            ])
            .await
            .unwrap();
        let head = store.pop("celery").await.unwrap().unwrap();

        let next_id = chains.advance(&head, &json!(15)).await.unwrap();
        let next = store.pop("celery").await.unwrap().unwrap();
        assert_eq!(next.id, next_id);
        assert_ne!(next.id, head.id);
        assert_eq!(next.payload, vec![json!(15), json!(2)]);
        assert!(next.chain_next.is_none());

        // The last step has nothing to advance to.
        assert!(chains.advance(&next, &json!(30)).await.is_none());
    }

    #[test]
    fn test_downstream_failure_surfaces_as_chain_broken() {
        let failure = JobFailure::terminal(FailureKind::Terminal, "boom");
        let record = ResultRecord::failure("step-2", failure.clone());

        assert_eq!(
            resolve_outcome(record.clone(), 0),
            JobOutcome::Failure {
                error: failure,
                terminal: true
            }
        );
        match resolve_outcome(record, 1) {
            JobOutcome::Failure { error, terminal } => {
                assert!(terminal);
                assert_eq!(error.kind, FailureKind::ChainBroken);
                assert!(error.message.contains("step-2"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}

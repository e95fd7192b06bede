// src/engine.rs
//! Collaborator-facing façade.
//!
//! An `Engine` owns one broker (router plus stores), the handler registry,
//! the retry policy and the periodic scheduler. Worker pools are created
//! from it and share all of those; each pool keeps its own dispatcher.

use std::sync::Arc;
use std::time::Duration;

use crate::broker::{Broker, Submit};
use crate::chain::ChainCoordinator;
use crate::config::{PoolConfig, Settings};
use crate::cron::{Registration, Scheduler};
use crate::error::{PoolError, ScheduleError, StoreError, SubmissionError};
use crate::job::{JobId, JobTemplate, Payload, Priority};
use crate::memory_store::MemoryStore;
use crate::queue::QueueStore;
use crate::redis_store::RedisStore;
use crate::registry::Registry;
use crate::result::{JobOutcome, ResultRecord, ResultStore};
use crate::retry::RetryPolicy;
use crate::runner::{WorkerContext, WorkerPool};

pub struct Engine {
    broker: Arc<Broker>,
    registry: Arc<Registry>,
    retry: Arc<RetryPolicy>,
    chains: Arc<ChainCoordinator>,
    scheduler: Scheduler,
}

impl Engine {
    pub fn new(
        settings: &Settings,
        registry: Registry,
        queues: Arc<dyn QueueStore>,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        let broker = Arc::new(Broker::new(settings.router(), queues, results));
        Self {
            chains: Arc::new(ChainCoordinator::new(Arc::clone(&broker))),
            scheduler: Scheduler::new(broker.clone()),
            broker,
            registry: Arc::new(registry),
            retry: Arc::new(settings.retry_policy()),
        }
    }

    /// Queues and results in this process only.
    pub fn in_memory(settings: &Settings, registry: Registry) -> Self {
        let store = Arc::new(MemoryStore::with_result_ttl(settings.result_ttl));
        Self::new(settings, registry, store.clone(), store)
    }

    /// Connects to `broker_url` for queues and `result_backend` for results.
    pub async fn redis(settings: &Settings, registry: Registry) -> Result<Self, StoreError> {
        let queues = RedisStore::connect(&settings.broker_url)
            .await?
            .with_result_ttl(settings.result_ttl);
        let results = if settings.result_backend == settings.broker_url {
            queues.clone()
        } else {
            RedisStore::connect(&settings.result_backend)
                .await?
                .with_result_ttl(settings.result_ttl)
        };
        Ok(Self::new(settings, registry, Arc::new(queues), Arc::new(results)))
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Routes, records `pending` and enqueues. Does not wait for execution.
    pub async fn submit(
        &self,
        job_type: &str,
        payload: Payload,
        priority: Option<Priority>,
    ) -> Result<JobId, SubmissionError> {
        self.broker
            .submit(job_type, payload, priority.unwrap_or_default())
            .await
    }

    /// Submits the first step; the returned head id resolves to the chain's outcome.
    pub async fn submit_chain(&self, steps: Vec<JobTemplate>) -> Result<JobId, SubmissionError> {
        self.chains.submit_chain(steps).await
    }

    pub async fn get_result(&self, job_id: &str) -> Result<JobOutcome, StoreError> {
        self.broker.get_result(job_id).await
    }

    pub async fn inspect(&self, job_id: &str) -> Result<Option<ResultRecord>, StoreError> {
        self.broker.inspect(job_id).await
    }

    /// See [`Scheduler::schedule`]. Must be called from within a Tokio runtime.
    pub fn schedule(
        &self,
        job_type: &str,
        payload: Payload,
        interval: Duration,
    ) -> Result<Registration, ScheduleError> {
        self.scheduler.schedule(job_type, payload, interval)
    }

    pub fn unschedule(&self, job_type: &str) -> bool {
        self.scheduler.unschedule(job_type)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Builds a stopped pool over this engine's stores and handlers.
    pub fn worker_pool(&self, config: PoolConfig) -> Result<WorkerPool, PoolError> {
        let ctx = Arc::new(WorkerContext {
            broker: Arc::clone(&self.broker),
            registry: Arc::clone(&self.registry),
            retry: Arc::clone(&self.retry),
            chains: Arc::clone(&self.chains),
        });
        WorkerPool::new(config, ctx)
    }
}

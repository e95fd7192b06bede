// src/runner.rs
//! Worker pool: `concurrency` slots pulling from the pool's queues.
//!
//! Each slot is its own task. It reserves jobs through the pool's
//! [`Dispatcher`], runs one at a time, and reports failures to the
//! [`RetryPolicy`]. A companion task promotes due delayed jobs (retries)
//! back onto their queues.
//!
//! Slot lifecycle: `Idle -> Reserved -> Executing -> Idle | Reserved`.
//! Shutdown closes the dispatcher, lets running jobs finish and pushes
//! unexecuted reservations back to the head of their queues.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::chain::{broken_chain, ChainCoordinator};
use crate::config::PoolConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{PoolError, StoreError};
use crate::job::Job;
use crate::queue::pop_first;
use crate::registry::{Handler, Registry};
use crate::result::{FailureKind, JobFailure, ResultRecord};
use crate::retry::{RetryAction, RetryPolicy};

/// Counters since the pool was created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub concurrency: usize,
    pub executing: usize,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
}

impl PoolStats {
    pub fn total_processed(&self) -> u64 {
        self.succeeded + self.failed
    }
}

#[derive(Default)]
struct SharedPoolStats {
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

/// Everything a slot needs to run jobs, shared by all slots of a pool.
pub(crate) struct WorkerContext {
    pub broker: Arc<Broker>,
    pub registry: Arc<Registry>,
    pub retry: Arc<RetryPolicy>,
    pub chains: Arc<ChainCoordinator>,
}

pub struct WorkerPool {
    config: PoolConfig,
    ctx: Arc<WorkerContext>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<SharedPoolStats>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
    is_running: AtomicBool,
}

impl WorkerPool {
    pub(crate) fn new(config: PoolConfig, ctx: Arc<WorkerContext>) -> Result<Self, PoolError> {
        config.validate()?;
        let dispatcher = Arc::new(Dispatcher::new(
            config.concurrency,
            config.prefetch_multiplier,
            config.fair_dispatch,
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            ctx,
            dispatcher,
            stats: Arc::new(SharedPoolStats::default()),
            shutdown_tx,
            handles: Vec::new(),
            is_running: AtomicBool::new(false),
        })
    }

    /// Spawns the slots and the delayed-job promoter.
    pub fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }
        self.dispatcher.reopen();
        let queues = self.config.drain_order();

        for index in 0..self.config.concurrency {
            let slot = Slot {
                index,
                pool: self.config.name.clone(),
                queues: queues.clone(),
                buffer: VecDeque::new(),
                ctx: Arc::clone(&self.ctx),
                dispatcher: Arc::clone(&self.dispatcher),
                stats: Arc::clone(&self.stats),
                shutdown_rx: self.shutdown_tx.subscribe(),
                poll_interval: self.config.poll_interval,
            };
            self.handles.push(tokio::spawn(slot.run()));
        }

        let promoter = Promoter {
            pool: self.config.name.clone(),
            broker: Arc::clone(&self.ctx.broker),
            shutdown_rx: self.shutdown_tx.subscribe(),
            poll_interval: self.config.poll_interval,
        };
        self.handles.push(tokio::spawn(promoter.run()));

        info!(
            pool = %self.config.name,
            queues = ?queues,
            concurrency = self.config.concurrency,
            prefetch = self.config.prefetch_multiplier,
            fair = self.config.fair_dispatch,
            "Worker pool started"
        );
        Ok(())
    }

    /// Stops reserving, waits for running jobs and returns reservations.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }
        info!(pool = %self.config.name, "Draining worker pool");
        self.dispatcher.close();
        let _ = self.shutdown_tx.send(());

        let handles: Vec<_> = self.handles.drain(..).collect();
        let drain = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(pool = %self.config.name, error = %e, "Worker task panicked during shutdown");
                }
            }
        };
        let outcome = tokio::time::timeout(self.config.shutdown_timeout, drain).await;
        self.is_running.store(false, Ordering::SeqCst);

        match outcome {
            Ok(()) => {
                info!(pool = %self.config.name, "Worker pool stopped");
                Ok(())
            }
            Err(_) => Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            concurrency: self.config.concurrency,
            executing: self.dispatcher.executing(),
            succeeded: self.stats.succeeded.load(Ordering::SeqCst),
            failed: self.stats.failed.load(Ordering::SeqCst),
            retried: self.stats.retried.load(Ordering::SeqCst),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

struct Slot {
    index: usize,
    pool: String,
    queues: Vec<String>,
    /// Reserved, not yet started. Mirrors the dispatcher's count for this slot.
    buffer: VecDeque<Job>,
    ctx: Arc<WorkerContext>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<SharedPoolStats>,
    shutdown_rx: broadcast::Receiver<()>,
    poll_interval: Duration,
}

impl Slot {
    async fn run(mut self) {
        debug!(pool = %self.pool, slot = self.index, "Slot started");
        loop {
            if self.shutdown_requested() {
                break;
            }

            if self.buffer.is_empty() {
                self.reserve().await;
            }
            let Some(job) = self.buffer.pop_front() else {
                tokio::select! {
                    _ = sleep(self.poll_interval) => {}
                    _ = self.shutdown_rx.recv() => break,
                }
                continue;
            };

            self.dispatcher.begin(self.index);
            // Pipelined: top up while this job runs.
            self.reserve().await;
            self.execute(job).await;
            self.dispatcher.finish(self.index);
        }
        self.return_reservations().await;
        debug!(pool = %self.pool, slot = self.index, "Slot stopped");
    }

    fn shutdown_requested(&mut self) -> bool {
        !matches!(
            self.shutdown_rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        )
    }

    /// Claims and pops until the dispatcher says stop or the queues run dry.
    async fn reserve(&mut self) {
        while self.dispatcher.try_claim(self.index) {
            match pop_first(self.ctx.broker.queues().as_ref(), &self.queues).await {
                Ok(Some(job)) => {
                    debug!(slot = self.index, job_id = %job.id, queue = %job.queue, "Reserved job");
                    self.buffer.push_back(job);
                }
                Ok(None) => {
                    self.dispatcher.release(self.index);
                    break;
                }
                Err(StoreError::Undecodable {
                    job_id,
                    job_type,
                    raw,
                    reason,
                }) => {
                    self.dispatcher.release(self.index);
                    self.set_aside(job_id, job_type, &raw, &reason).await;
                }
                Err(e) => {
                    self.dispatcher.release(self.index);
                    error!(pool = %self.pool, slot = self.index, error = %e, "Failed to reserve job");
                    break;
                }
            }
        }
    }

    /// An entry that left its queue but cannot run: dead-letter the raw
    /// text and, when its id survived, make the loss visible to callers.
    async fn set_aside(
        &self,
        job_id: Option<String>,
        job_type: Option<String>,
        raw: &str,
        reason: &str,
    ) {
        warn!(
            pool = %self.pool,
            slot = self.index,
            job_id = ?job_id,
            job_type = ?job_type,
            reason,
            "Setting aside undecodable queue entry"
        );
        if let Err(e) = self.ctx.broker.queues().dead_letter(raw).await {
            error!(job_id = ?job_id, error = %e, "Failed to dead-letter queue entry");
        }
        let Some(job_id) = job_id else {
            return;
        };
        let failure = JobFailure::terminal(
            FailureKind::Lost,
            format!("queue entry could not be decoded: {reason}"),
        );
        if let Err(e) = self
            .ctx
            .broker
            .results()
            .put(&ResultRecord::failure(job_id.clone(), failure))
            .await
        {
            error!(job_id = %job_id, error = %e, "Failed to store job failure");
        }
        self.stats.failed.fetch_add(1, Ordering::SeqCst);
    }

    async fn return_reservations(&mut self) {
        while let Some(job) = self.buffer.pop_back() {
            self.dispatcher.release(self.index);
            if let Err(e) = self.ctx.broker.queues().push_front(&job).await {
                self.record_lost(&job, &format!("could not return reservation: {e}"))
                    .await;
            }
        }
    }

    async fn execute(&self, job: Job) {
        info!(
            slot = self.index,
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempt(),
            "Executing job"
        );

        let Some(handler) = self.ctx.registry.get(&job.job_type) else {
            let failure = JobFailure::terminal(
                FailureKind::UnknownHandler,
                format!("no handler registered for '{}'", job.job_type),
            );
            self.fail(&job, failure).await;
            return;
        };

        match run_handler(handler.as_ref(), &job).await {
            Ok(value) => self.succeed(&job, value).await,
            Err(err) => match self.ctx.retry.on_failure(&job, &err) {
                RetryAction::Retry(delay) => self.retry(job, delay, &err).await,
                RetryAction::Fail(failure) => self.fail(&job, failure).await,
            },
        }
    }

    async fn succeed(&self, job: &Job, value: Value) {
        let next = self.ctx.chains.advance(job, &value).await;
        let record = ResultRecord::success(job.id.clone(), value, next);
        if let Err(e) = self.ctx.broker.results().put(&record).await {
            error!(job_id = %job.id, error = %e, "Failed to store job result");
        }
        self.stats.succeeded.fetch_add(1, Ordering::SeqCst);
        info!(slot = self.index, job_id = %job.id, "Job succeeded");
    }

    async fn retry(&self, job: Job, delay: Duration, err: &anyhow::Error) {
        let job = job.next_attempt();
        warn!(
            slot = self.index,
            job_id = %job.id,
            job_type = %job.job_type,
            retries_attempted = job.retries_attempted,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Job failed, scheduling retry"
        );

        let run_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
        match self.ctx.broker.queues().schedule(&job, run_at).await {
            Ok(()) => {
                self.stats.retried.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                self.record_lost(&job, &format!("retry could not be scheduled: {e}"))
                    .await;
            }
        }
    }

    async fn fail(&self, job: &Job, failure: JobFailure) {
        let failure = broken_chain(job, failure);
        error!(
            slot = self.index,
            job_id = %job.id,
            job_type = %job.job_type,
            kind = ?failure.kind,
            error = %failure.message,
            "Job failed terminally"
        );
        if let Err(e) = self
            .ctx
            .broker
            .results()
            .put(&ResultRecord::failure(job.id.clone(), failure))
            .await
        {
            error!(job_id = %job.id, error = %e, "Failed to store job failure");
        }
        self.stats.failed.fetch_add(1, Ordering::SeqCst);
    }

    async fn record_lost(&self, job: &Job, message: &str) {
        self.fail(job, JobFailure::terminal(FailureKind::Lost, message))
            .await;
    }
}

/// Runs the handler with its hooks. Panics come back as errors.
async fn run_handler(handler: &dyn Handler, job: &Job) -> anyhow::Result<Value> {
    let attempt = AssertUnwindSafe(async {
        handler.before(job).await?;
        handler.perform(job).await
    })
    .catch_unwind()
    .await;

    let result = match attempt {
        Ok(result) => result,
        Err(panic) => Err(anyhow::anyhow!("handler panicked: {}", panic_message(&*panic))),
    };

    match &result {
        Ok(value) => handler.after(job, value).await,
        Err(err) => handler.on_error(job, err).await,
    }
    handler.always(job).await;
    result
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Moves due delayed jobs onto their queues every `poll_interval`.
struct Promoter {
    pool: String,
    broker: Arc<Broker>,
    shutdown_rx: broadcast::Receiver<()>,
    poll_interval: Duration,
}

impl Promoter {
    async fn run(mut self) {
        loop {
            if let Err(e) = self.broker.queues().promote_due(Utc::now()).await {
                error!(pool = %self.pool, error = %e, "Failed to promote delayed jobs");
            }
            tokio::select! {
                _ = sleep(self.poll_interval) => {}
                _ = self.shutdown_rx.recv() => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::router::Router;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl Handler for Arc<Recorder> {
        async fn before(&self, _job: &Job) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push("before");
            Ok(())
        }

        async fn perform(&self, job: &Job) -> anyhow::Result<Value> {
            self.calls.lock().unwrap().push("perform");
            if job.payload.is_empty() {
                anyhow::bail!("no arguments");
            }
            Ok(json!("done"))
        }

        async fn after(&self, _job: &Job, _value: &Value) {
            self.calls.lock().unwrap().push("after");
        }

        async fn on_error(&self, _job: &Job, _err: &anyhow::Error) {
            self.calls.lock().unwrap().push("on_error");
        }

        async fn always(&self, _job: &Job) {
            self.calls.lock().unwrap().push("always");
        }
    }

    fn job(payload: Vec<Value>) -> Job {
        Job::new("record", payload, "celery", Default::default())
    }

    #[tokio::test]
    async fn test_hooks_run_in_order() {
        let recorder = Arc::new(Recorder::default());
        run_handler(&recorder, &job(vec![json!(1)])).await.unwrap();
        assert_eq!(
            *recorder.calls.lock().unwrap(),
            vec!["before", "perform", "after", "always"]
        );

        let recorder = Arc::new(Recorder::default());
        assert!(run_handler(&recorder, &job(vec![])).await.is_err());
        assert_eq!(
            *recorder.calls.lock().unwrap(),
            vec!["before", "perform", "on_error", "always"]
        );
    }

    struct Panics;

    #[async_trait]
    impl Handler for Panics {
        async fn perform(&self, _job: &Job) -> anyhow::Result<Value> {
            panic!("kaboom");
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let err = run_handler(&Panics, &job(vec![])).await.unwrap_err();
        assert!(err.to_string().contains("kaboom"));
    }

    fn context() -> Arc<WorkerContext> {
        let store = Arc::new(MemoryStore::new());
        let broker = Arc::new(Broker::new(Router::default(), store.clone(), store));
        Arc::new(WorkerContext {
            chains: Arc::new(ChainCoordinator::new(Arc::clone(&broker))),
            broker,
            registry: Arc::new(Registry::new()),
            retry: Arc::new(RetryPolicy::new()),
        })
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let result = WorkerPool::new(PoolConfig::default().with_concurrency(0), context());
        assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let mut pool = WorkerPool::new(
            PoolConfig::default()
                .with_concurrency(2)
                .with_poll_interval(Duration::from_millis(5)),
            context(),
        )
        .unwrap();

        assert!(matches!(pool.shutdown().await, Err(PoolError::NotRunning)));
        pool.start().unwrap();
        assert!(pool.is_running());
        assert!(matches!(pool.start(), Err(PoolError::AlreadyRunning)));

        pool.shutdown().await.unwrap();
        assert!(!pool.is_running());
        assert!(pool.dispatcher().is_closed());
        assert_eq!(pool.stats().total_processed(), 0);
    }
}

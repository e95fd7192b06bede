// src/lib.rs
//! Task queue engine on Tokio and Redis.
//!
//! Jobs are routed to named queues, reserved by worker pools under a
//! prefetch limit (optionally fair across slots), retried through a delayed
//! set and chained so each step's value feeds the next. Results live in a
//! TTL'd result store and are read back by job id.

pub mod broker;
pub mod chain;
pub mod config;
pub mod cron;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod job;
pub mod memory_store;
pub mod queue;
pub mod redis_store;
pub mod registry;
pub mod result;
pub mod retry;
pub mod router;
pub mod runner;
pub mod utils;

pub use broker::{Broker, Submit};
pub use config::{PoolConfig, QueueConfig, Settings};
pub use cron::{Registration, Scheduler};
pub use engine::Engine;
pub use error::{
    fatal, is_fatal, ConfigError, PoolError, RegistryError, ScheduleError, StoreError,
    SubmissionError,
};
pub use job::{Job, JobId, JobTemplate, Merge, Payload, Priority};
pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;
pub use registry::{FnHandler, Handler, Registry};
pub use result::{FailureKind, JobFailure, JobOutcome, JobStatus, ResultRecord};
pub use retry::{RetryAction, RetryPolicy, RetryRule};
pub use runner::{PoolStats, WorkerPool};

// src/config.rs
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{ConfigError, PoolError};
use crate::retry::{RetryPolicy, RetryRule};
use crate::router::Router;
use crate::utils::constants::{
    DEFAULT_BROKER_URL, DEFAULT_CONCURRENCY, DEFAULT_POLL_INTERVAL, DEFAULT_PREFETCH_MULTIPLIER,
    DEFAULT_QUEUE, DEFAULT_RESULT_TTL, DEFAULT_SHUTDOWN_TIMEOUT, HIGH_PRIORITY_QUEUE,
};

/// A queue a pool subscribes to. Higher `priority` is drained first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueConfig {
    pub name: String,
    pub priority: usize,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>, priority: usize) -> Self {
        Self {
            name: name.into(),
            priority,
        }
    }

    pub fn from_configs(configs: Vec<(&str, usize)>) -> Vec<Self> {
        configs
            .into_iter()
            .map(|(name, priority)| Self::new(name, priority))
            .collect()
    }
}

/// Shape of one worker pool.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub name: String,
    pub queues: Vec<QueueConfig>,
    /// Execution slots.
    pub concurrency: usize,
    /// Unexecuted reservations a slot may hold beyond the job it is running.
    pub prefetch_multiplier: usize,
    pub fair_dispatch: bool,
    /// Idle wait between reservation attempts and between delayed-set sweeps.
    pub poll_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            queues: vec![QueueConfig::new(DEFAULT_QUEUE, 0)],
            concurrency: DEFAULT_CONCURRENCY,
            prefetch_multiplier: DEFAULT_PREFETCH_MULTIPLIER,
            fair_dispatch: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl PoolConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_queues(mut self, queues: Vec<QueueConfig>) -> Self {
        self.queues = queues;
        self
    }

    /// Subscribes to `names`, earlier names drained first.
    pub fn with_queue_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let count = names.len();
        self.queues = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| QueueConfig::new(name, count - i))
            .collect();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_prefetch_multiplier(mut self, prefetch: usize) -> Self {
        self.prefetch_multiplier = prefetch;
        self
    }

    pub fn with_fair_dispatch(mut self, fair: bool) -> Self {
        self.fair_dispatch = fair;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.concurrency == 0 {
            return Err(PoolError::InvalidConfig("concurrency must be at least 1".into()));
        }
        if self.prefetch_multiplier == 0 {
            return Err(PoolError::InvalidConfig(
                "prefetch_multiplier must be at least 1".into(),
            ));
        }
        if self.queues.is_empty() {
            return Err(PoolError::InvalidConfig("pool subscribes to no queue".into()));
        }
        Ok(())
    }

    /// Queue names in drain order: highest priority first, ties keep
    /// declaration order.
    pub fn drain_order(&self) -> Vec<String> {
        let mut queues = self.queues.clone();
        queues.sort_by(|a, b| b.priority.cmp(&a.priority));
        let mut names: Vec<String> = Vec::with_capacity(queues.len());
        for queue in queues {
            if !names.contains(&queue.name) {
                names.push(queue.name);
            }
        }
        names
    }
}

/// Engine-wide settings: where the stores live, routing and retry rules.
#[derive(Clone, Debug)]
pub struct Settings {
    pub broker_url: String,
    pub result_backend: String,
    pub default_queue: String,
    pub high_priority_queue: String,
    pub result_ttl: Duration,
    pub task_routes: HashMap<String, String>,
    pub retry_rules: HashMap<String, RetryRule>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            result_backend: DEFAULT_BROKER_URL.to_string(),
            default_queue: DEFAULT_QUEUE.to_string(),
            high_priority_queue: HIGH_PRIORITY_QUEUE.to_string(),
            result_ttl: DEFAULT_RESULT_TTL,
            task_routes: HashMap::new(),
            retry_rules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Reads `QTASK_*` variables on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        if let Some(url) = lookup("QTASK_BROKER_URL") {
            settings.broker_url = url;
        }
        if let Some(url) = lookup("QTASK_RESULT_BACKEND") {
            settings.result_backend = url;
        }
        if let Some(queue) = lookup("QTASK_DEFAULT_QUEUE") {
            settings.default_queue = queue;
        }
        if let Some(queue) = lookup("QTASK_HIGH_PRIORITY_QUEUE") {
            settings.high_priority_queue = queue;
        }
        if let Some(raw) = lookup("QTASK_RESULT_TTL_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "QTASK_RESULT_TTL_SECS".to_string(),
                reason: format!("'{raw}' is not a number of seconds"),
            })?;
            settings.result_ttl = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("QTASK_ROUTES") {
            settings.task_routes.extend(parse_routes(&raw)?);
        }
        Ok(settings)
    }

    pub fn with_broker_url(mut self, url: impl Into<String>) -> Self {
        self.broker_url = url.into();
        self
    }

    pub fn with_default_queue(mut self, queue: impl Into<String>) -> Self {
        self.default_queue = queue.into();
        self
    }

    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = ttl;
        self
    }

    pub fn with_route(mut self, job_type: impl Into<String>, queue: impl Into<String>) -> Self {
        self.task_routes.insert(job_type.into(), queue.into());
        self
    }

    pub fn with_retry(mut self, job_type: impl Into<String>, rule: RetryRule) -> Self {
        self.retry_rules.insert(job_type.into(), rule);
        self
    }

    pub fn router(&self) -> Router {
        Router::new(self.default_queue.clone())
            .with_high_priority_queue(self.high_priority_queue.clone())
            .with_routes(self.task_routes.clone())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new().with_rules(self.retry_rules.clone())
    }
}

/// Parses `type=queue,type=queue`.
fn parse_routes(raw: &str) -> Result<HashMap<String, String>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(job_type, queue)| (job_type.trim().to_string(), queue.trim().to_string()))
                .filter(|(job_type, queue)| !job_type.is_empty() && !queue.is_empty())
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: "QTASK_ROUTES".to_string(),
                    reason: format!("expected type=queue, got '{entry}'"),
                })
        })
        .collect()
}

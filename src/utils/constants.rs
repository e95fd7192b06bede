use std::time::Duration;

/// Queue for job types without an explicit route.
pub const DEFAULT_QUEUE: &str = "celery";
pub const HIGH_PRIORITY_QUEUE: &str = "high_priority";

pub const PREFIX_QUEUE: &str = "queue";
pub const PREFIX_RESULT: &str = "result";
pub const DELAYED_JOBS_KEY: &str = "delayed";
pub const DEAD_LETTER_KEY: &str = "dead_letter";

pub const DEFAULT_BROKER_URL: &str = "redis://localhost:6379/0";
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_PREFETCH_MULTIPLIER: usize = 4;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

pub fn queue_key(name: &str) -> String {
    format!("{PREFIX_QUEUE}:{name}")
}

pub fn result_key(job_id: &str) -> String {
    format!("{PREFIX_RESULT}:{job_id}")
}

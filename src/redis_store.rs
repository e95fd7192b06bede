// src/redis_store.rs
//! Redis-backed queue and result store.
//!
//! Layout: `queue:{name}` lists of serialized jobs (RPUSH / LPOP),
//! `delayed` sorted set scored by due time in ms, `dead_letter` list of
//! entries no worker can run, `result:{job_id}` strings written with
//! `SET .. EX ttl`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::MultiplexedConnection, AsyncCommands, Client, Script};
use tracing::debug;

use crate::error::StoreError;
use crate::job::Job;
use crate::queue::QueueStore;
use crate::result::{ResultRecord, ResultStore};
use crate::utils::constants::{
    queue_key, result_key, DEAD_LETTER_KEY, DEFAULT_RESULT_TTL, DELAYED_JOBS_KEY, PREFIX_QUEUE,
};
use crate::utils::jconfig::{decode_queued_job, decode_record, encode_job, encode_record};

/// KEYS: delayed set, dead-letter list. ARGV: now in ms, queue key prefix.
///
/// Runs atomically, so a due job is either still delayed or already queued.
/// Queue keys are built from the stored job and must match `queue_key`.
const PROMOTE_DUE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], 0, ARGV[1])
local promoted = 0
for _, raw in ipairs(due) do
    redis.call('ZREM', KEYS[1], raw)
    local ok, job = pcall(cjson.decode, raw)
    if ok and type(job) == 'table' and type(job.queue) == 'string' then
        redis.call('RPUSH', ARGV[2] .. ':' .. job.queue, raw)
        promoted = promoted + 1
    else
        redis.call('RPUSH', KEYS[2], raw)
    end
end
return promoted
"#;

#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    result_ttl: Duration,
    promote: Script,
}

impl RedisStore {
    /// Connects once; the multiplexed connection is cloned per command.
    ///
    /// `Client::open` handles `rediss://` URLs through the TLS feature.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            result_ttl: DEFAULT_RESULT_TTL,
            promote: Script::new(PROMOTE_DUE_SCRIPT),
        })
    }

    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = ttl;
        self
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn push(&self, job: &Job) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(queue_key(&job.queue), encode_job(job)?)
            .await?;
        Ok(())
    }

    async fn push_front(&self, job: &Job) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(queue_key(&job.queue), encode_job(job)?)
            .await?;
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<Option<Job>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.lpop(queue_key(queue), None).await?;
        raw.map(decode_queued_job).transpose()
    }

    async fn schedule(&self, job: &Job, run_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(DELAYED_JOBS_KEY, encode_job(job)?, run_at.timestamp_millis())
            .await?;
        Ok(())
    }

    async fn promote_due(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let promoted: usize = self
            .promote
            .key(DELAYED_JOBS_KEY)
            .key(DEAD_LETTER_KEY)
            .arg(now.timestamp_millis())
            .arg(PREFIX_QUEUE)
            .invoke_async(&mut conn)
            .await?;
        if promoted > 0 {
            debug!(promoted, "Promoted delayed jobs");
        }
        Ok(promoted)
    }

    async fn dead_letter(&self, raw: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(DEAD_LETTER_KEY, raw).await?;
        Ok(())
    }

    async fn len(&self, queue: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(queue_key(queue)).await?)
    }
}

#[async_trait]
impl ResultStore for RedisStore {
    async fn put(&self, record: &ResultRecord) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(result_key(&record.job_id))
            .arg(encode_record(record)?)
            .arg("EX")
            .arg(self.result_ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<ResultRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(result_key(job_id)).await?;
        raw.map(|raw| decode_record(&raw)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(queue_key("high_priority"), "queue:high_priority");
        assert_eq!(result_key("V1StGXR8_Z5jdHi6B-myT"), "result:V1StGXR8_Z5jdHi6B-myT");
    }

    #[test]
    fn test_promote_script_builds_queue_keys_like_push() {
        // The script concatenates ARGV[2] .. ':' .. job.queue.
        assert_eq!(format!("{PREFIX_QUEUE}:celery"), queue_key("celery"));
        assert!(PROMOTE_DUE_SCRIPT.contains("ARGV[2] .. ':' .. job.queue"));
        assert!(PROMOTE_DUE_SCRIPT.contains("RPUSH', KEYS[2]"));
        assert_ne!(DEAD_LETTER_KEY, DELAYED_JOBS_KEY);
    }
}

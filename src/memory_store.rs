// src/memory_store.rs
//! In-process queue and result store.
//!
//! Jobs and records are kept in their serialized form so the codec is
//! exercised exactly as it is against Redis.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::job::Job;
use crate::queue::QueueStore;
use crate::result::{ResultRecord, ResultStore};
use crate::utils::constants::DEFAULT_RESULT_TTL;
use crate::utils::jconfig::{decode_job, decode_queued_job, decode_record, encode_job, encode_record};

#[derive(Default)]
struct Inner {
    queues: HashMap<String, VecDeque<String>>,
    /// (due at in ms, queue, serialized job), in insertion order.
    delayed: Vec<(i64, String, String)>,
    results: HashMap<String, (String, Instant)>,
    dead: Vec<String>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    result_ttl: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_result_ttl(DEFAULT_RESULT_TTL)
    }

    pub fn with_result_ttl(result_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            result_ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Jobs currently waiting in `queue`, head first.
    pub fn peek(&self, queue: &str) -> Result<Vec<Job>, StoreError> {
        let inner = self.lock();
        inner
            .queues
            .get(queue)
            .map(|q| q.iter().map(|raw| decode_job(raw)).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    pub fn delayed_len(&self) -> usize {
        self.lock().delayed.len()
    }

    /// Raw entries set aside by [`QueueStore::dead_letter`], oldest first.
    pub fn dead_letters(&self) -> Vec<String> {
        self.lock().dead.clone()
    }

    /// Appends an already-serialized entry, bypassing the codec.
    pub fn push_raw(&self, queue: &str, raw: impl Into<String>) {
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(raw.into());
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn push(&self, job: &Job) -> Result<(), StoreError> {
        let raw = encode_job(job)?;
        self.lock()
            .queues
            .entry(job.queue.clone())
            .or_default()
            .push_back(raw);
        Ok(())
    }

    async fn push_front(&self, job: &Job) -> Result<(), StoreError> {
        let raw = encode_job(job)?;
        self.lock()
            .queues
            .entry(job.queue.clone())
            .or_default()
            .push_front(raw);
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<Option<Job>, StoreError> {
        let raw = self.lock().queues.get_mut(queue).and_then(VecDeque::pop_front);
        raw.map(decode_queued_job).transpose()
    }

    async fn schedule(&self, job: &Job, run_at: DateTime<Utc>) -> Result<(), StoreError> {
        let raw = encode_job(job)?;
        self.lock()
            .delayed
            .push((run_at.timestamp_millis(), job.queue.clone(), raw));
        Ok(())
    }

    async fn promote_due(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let now_ms = now.timestamp_millis();
        let mut inner = self.lock();
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.delayed)
            .into_iter()
            .partition(|(at, _, _)| *at <= now_ms);
        inner.delayed = waiting;

        let promoted = due.len();
        for (_, queue, raw) in due {
            inner.queues.entry(queue).or_default().push_back(raw);
        }
        Ok(promoted)
    }

    async fn dead_letter(&self, raw: &str) -> Result<(), StoreError> {
        self.lock().dead.push(raw.to_string());
        Ok(())
    }

    async fn len(&self, queue: &str) -> Result<usize, StoreError> {
        Ok(self.lock().queues.get(queue).map_or(0, VecDeque::len))
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn put(&self, record: &ResultRecord) -> Result<(), StoreError> {
        let raw = encode_record(record)?;
        let expires_at = Instant::now() + self.result_ttl;
        self.lock()
            .results
            .insert(record.job_id.clone(), (raw, expires_at));
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<ResultRecord>, StoreError> {
        let mut inner = self.lock();
        let expired = match inner.results.get(job_id) {
            None => return Ok(None),
            Some((_, expires_at)) => *expires_at <= Instant::now(),
        };
        if expired {
            inner.results.remove(job_id);
            return Ok(None);
        }
        inner
            .results
            .get(job_id)
            .map(|(raw, _)| decode_record(raw))
            .transpose()
    }
}

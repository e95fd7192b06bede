// src/cron/scheduler.rs
//! Periodic submission ("beat").
//!
//! Every registration owns one tick task. Tick `k` fires at
//! `start + k * interval`, measured from registration, so a slow submission
//! never pushes later ticks back. Each submission runs in its own task and
//! a failed one is logged and forgotten; the next tick fires regardless.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};

use crate::broker::Submit;
use crate::error::ScheduleError;
use crate::job::{Payload, Priority};

/// What `schedule` did with an existing registration for the same type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Installed,
    /// Same payload and interval as before; the running ticks are kept.
    Unchanged,
    /// The previous registration was stopped and a new one started.
    Replaced,
}

struct Entry {
    payload: Payload,
    interval: Duration,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    submitter: Arc<dyn Submit>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Scheduler {
    pub fn new(submitter: Arc<dyn Submit>) -> Self {
        Self {
            submitter,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Submits `job_type` with `payload` every `interval`, first at `now + interval`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule(
        &self,
        job_type: &str,
        payload: Payload,
        interval: Duration,
    ) -> Result<Registration, ScheduleError> {
        if interval.is_zero() {
            return Err(ScheduleError::ZeroInterval(job_type.to_string()));
        }
        let start = Instant::now();
        if start.checked_add(interval).is_none() {
            return Err(ScheduleError::IntervalTooLong(job_type.to_string()));
        }

        let mut entries = self.lock();
        let registration = match entries.get(job_type) {
            Some(entry) if entry.payload == payload && entry.interval == interval => {
                debug!(job_type, "Schedule unchanged");
                return Ok(Registration::Unchanged);
            }
            Some(entry) => {
                entry.handle.abort();
                Registration::Replaced
            }
            None => Registration::Installed,
        };

        let handle = tokio::spawn(tick(
            Arc::clone(&self.submitter),
            job_type.to_string(),
            payload.clone(),
            interval,
            start,
        ));
        entries.insert(
            job_type.to_string(),
            Entry {
                payload,
                interval,
                handle,
            },
        );
        info!(job_type, interval_ms = interval.as_millis() as u64, ?registration, "Scheduled periodic job");
        Ok(registration)
    }

    /// Stops the ticks for `job_type`. Returns false if nothing was scheduled.
    pub fn unschedule(&self, job_type: &str) -> bool {
        match self.lock().remove(job_type) {
            Some(entry) => {
                entry.handle.abort();
                info!(job_type, "Unscheduled periodic job");
                true
            }
            None => false,
        }
    }

    pub fn scheduled(&self) -> Vec<(String, Duration)> {
        let mut list: Vec<_> = self
            .lock()
            .iter()
            .map(|(job_type, entry)| (job_type.clone(), entry.interval))
            .collect();
        list.sort();
        list
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for entry in self.lock().values() {
            entry.handle.abort();
        }
    }
}

async fn tick(
    submitter: Arc<dyn Submit>,
    job_type: String,
    payload: Payload,
    interval: Duration,
    start: Instant,
) {
    let mut k: u32 = 1;
    loop {
        let Some(at) = interval
            .checked_mul(k)
            .and_then(|offset| start.checked_add(offset))
        else {
            error!(job_type = %job_type, tick = k, "Next tick is out of range; stopping schedule");
            return;
        };
        sleep_until(at).await;
        debug!(job_type = %job_type, tick = k, "Scheduler tick");

        let submitter = Arc::clone(&submitter);
        let spawned_job_type = job_type.clone();
        let payload = payload.clone();
        tokio::spawn(async move {
            match submitter.submit(&spawned_job_type, payload, Priority::Normal).await {
                Ok(job_id) => info!(job_type = %spawned_job_type, job_id = %job_id, "Submitted scheduled job"),
                Err(e) => error!(job_type = %spawned_job_type, error = %e, "Scheduled submission failed"),
            }
        });

        let Some(next) = k.checked_add(1) else {
            error!(job_type = %job_type, "Tick counter exhausted; stopping schedule");
            return;
        };
        k = next;
    }
}

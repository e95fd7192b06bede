// src/job.rs
use chrono::{DateTime, Utc};
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type JobId = String;

/// Ordered handler arguments.
pub type Payload = Vec<Value>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// How a chain step folds its predecessor's value into its own arguments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Merge {
    /// Previous value becomes the first argument.
    #[default]
    Prepend,
    /// Previous value becomes the last argument.
    Append,
    /// Previous value is the only argument.
    Replace,
    /// Step runs with its own arguments only.
    Ignore,
}

/// Blueprint for a job whose payload is not final yet (a chain step).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTemplate {
    pub job_type: String,
    pub args: Payload,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub merge: Merge,
}

impl JobTemplate {
    pub fn new(job_type: impl Into<String>, args: Payload) -> Self {
        Self {
            job_type: job_type.into(),
            args,
            priority: Priority::Normal,
            merge: Merge::Prepend,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_merge(mut self, merge: Merge) -> Self {
        self.merge = merge;
        self
    }

    /// Concrete payload once the predecessor's value is known.
    pub fn payload_with(&self, previous: Option<&Value>) -> Payload {
        let Some(prev) = previous else {
            return self.args.clone();
        };
        match self.merge {
            Merge::Prepend => {
                let mut args = Vec::with_capacity(self.args.len() + 1);
                args.push(prev.clone());
                args.extend(self.args.iter().cloned());
                args
            }
            Merge::Append => {
                let mut args = self.args.clone();
                args.push(prev.clone());
                args
            }
            Merge::Replace => vec![prev.clone()],
            Merge::Ignore => self.args.clone(),
        }
    }
}

/// Chain state carried by a step: the chain's head id and the steps still to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainLink {
    pub head: JobId,
    pub remaining: Vec<JobTemplate>,
}

impl ChainLink {
    pub fn has_successor(&self) -> bool {
        !self.remaining.is_empty()
    }
}

/// One unit of submitted work, as stored in `queue:{name}`.
///
/// Everything except `retries_attempted` is fixed at creation; retries
/// resubmit the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: String,
    pub payload: Payload,
    pub queue: String,
    #[serde(default)]
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_next: Option<ChainLink>,
    #[serde(default)]
    pub retries_attempted: u32,
}

impl Job {
    pub fn new(
        job_type: impl Into<String>,
        payload: Payload,
        queue: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            id: nanoid!(),
            job_type: job_type.into(),
            payload,
            queue: queue.into(),
            priority,
            created_at: Utc::now(),
            chain_next: None,
            retries_attempted: 0,
        }
    }

    pub fn with_chain(mut self, link: ChainLink) -> Self {
        self.chain_next = Some(link);
        self
    }

    /// Same job, one retry further along.
    pub fn next_attempt(mut self) -> Self {
        self.retries_attempted += 1;
        self
    }

    /// Human-facing attempt number (1 for the original execution).
    pub fn attempt(&self) -> u32 {
        self.retries_attempted + 1
    }

    pub fn has_successor(&self) -> bool {
        self.chain_next
            .as_ref()
            .is_some_and(ChainLink::has_successor)
    }
}

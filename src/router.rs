// src/router.rs
use std::collections::HashMap;

use crate::job::Priority;
use crate::utils::constants::{DEFAULT_QUEUE, HIGH_PRIORITY_QUEUE};

/// Maps a job type to the queue it is stored in.
///
/// Explicit routes win. Unrouted high-priority jobs go to the high-priority
/// queue and everything else falls back to the default queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Router {
    routes: HashMap<String, String>,
    default_queue: String,
    high_priority_queue: String,
}

impl Default for Router {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE)
    }
}

impl Router {
    pub fn new(default_queue: impl Into<String>) -> Self {
        Self {
            routes: HashMap::new(),
            default_queue: default_queue.into(),
            high_priority_queue: HIGH_PRIORITY_QUEUE.to_string(),
        }
    }

    pub fn with_high_priority_queue(mut self, queue: impl Into<String>) -> Self {
        self.high_priority_queue = queue.into();
        self
    }

    pub fn with_route(mut self, job_type: impl Into<String>, queue: impl Into<String>) -> Self {
        self.routes.insert(job_type.into(), queue.into());
        self
    }

    pub fn with_routes<I, K, V>(mut self, routes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.routes
            .extend(routes.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn route(&self, job_type: &str) -> &str {
        self.route_with_priority(job_type, Priority::Normal)
    }

    pub fn route_with_priority(&self, job_type: &str, priority: Priority) -> &str {
        if let Some(queue) = self.routes.get(job_type) {
            return queue;
        }
        match priority {
            Priority::High => &self.high_priority_queue,
            Priority::Normal => &self.default_queue,
        }
    }
}

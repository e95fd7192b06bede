// src/registry.rs
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RegistryError;
use crate::job::{Job, Payload};

/// Executes jobs of one type.
///
/// Only `perform` is required. The worker calls `before`, then `perform`,
/// then `after` or `on_error`, and finally `always`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn before(&self, _job: &Job) -> anyhow::Result<()> {
        Ok(())
    }

    async fn perform(&self, job: &Job) -> anyhow::Result<Value>;

    async fn after(&self, _job: &Job, _value: &Value) {}
    async fn on_error(&self, _job: &Job, _err: &anyhow::Error) {}
    async fn always(&self, _job: &Job) {}
}

/// Adapts an async closure over the payload into a [`Handler`].
pub struct FnHandler<F>(F);

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Payload) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn perform(&self, job: &Job) -> anyhow::Result<Value> {
        (self.0)(job.payload.clone()).await
    }
}

/// Maps job type names to handlers. Built once, then shared read-only.
#[derive(Default, Clone)]
pub struct Registry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, name: impl Into<String>, handler: H) -> Result<(), RegistryError>
    where
        H: Handler + 'static,
    {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.handlers.insert(name, Arc::new(handler));
        Ok(())
    }

    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> Result<(), RegistryError>
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register(name, FnHandler::new(f))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    /// Fails on the first type without a handler.
    pub fn ensure<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<(), RegistryError> {
        for name in names {
            if !self.handlers.contains_key(name) {
                return Err(RegistryError::Missing(name.to_string()));
            }
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

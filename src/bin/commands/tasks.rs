// src/bin/commands/tasks.rs
//! Demo task set served by `qtask worker` and submitted by `qtask beat`.

use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::time::sleep;

use qtask::{fatal, Payload, Registry, RetryRule, Settings};

pub const SCHEDULED_TASK: &str = "scheduled_task";

const ADD_DELAY: Duration = Duration::from_secs(20);
const LONG_RUNNING_DELAY: Duration = Duration::from_secs(30);

/// Demo routing and retry rules on top of whatever the environment set.
pub fn settings(settings: Settings) -> Settings {
    settings
        .with_route("important_task", "high_priority")
        .with_retry("failing_task", RetryRule::new(3, Duration::from_secs(5)))
}

pub fn registry() -> Result<Registry> {
    let mut registry = Registry::new();
    registry.register_fn("add", add)?;
    registry.register_fn("multiply", multiply)?;
    registry.register_fn("failing_task", failing_task)?;
    registry.register_fn("important_task", important_task)?;
    registry.register_fn("long_running_task", long_running_task)?;
    registry.register_fn(SCHEDULED_TASK, scheduled_task)?;
    registry.register_fn("cpu_burn", cpu_burn)?;
    registry.register_fn("io_bound_task", io_bound_task)?;
    Ok(registry)
}

fn int_arg(payload: &Payload, index: usize, default: Option<i64>) -> Result<i64> {
    match payload.get(index) {
        Some(value) => value
            .as_i64()
            .ok_or_else(|| fatal(format!("argument {index} must be an integer, got {value}"))),
        None => default.ok_or_else(|| fatal(format!("missing argument {index}"))),
    }
}

async fn add(payload: Payload) -> Result<Value> {
    let x = int_arg(&payload, 0, None)?;
    let y = int_arg(&payload, 1, None)?;
    sleep(ADD_DELAY).await;
    Ok(json!(x + y))
}

async fn multiply(payload: Payload) -> Result<Value> {
    let x = int_arg(&payload, 0, None)?;
    let y = int_arg(&payload, 1, None)?;
    Ok(json!(x * y))
}

async fn failing_task(_payload: Payload) -> Result<Value> {
    Err(anyhow!("simulated failure"))
}

async fn important_task(_payload: Payload) -> Result<Value> {
    Ok(json!("Important task completed"))
}

async fn long_running_task(_payload: Payload) -> Result<Value> {
    sleep(LONG_RUNNING_DELAY).await;
    Ok(json!("Long-running task completed"))
}

async fn scheduled_task(_payload: Payload) -> Result<Value> {
    Ok(json!(format!("Scheduled task ran at {}", Utc::now().to_rfc3339())))
}

/// Counts primes below `n * 1000` on the blocking pool.
async fn cpu_burn(payload: Payload) -> Result<Value> {
    let n = int_arg(&payload, 0, Some(200))?;
    let limit = u64::try_from(n).map_err(|_| fatal("n must not be negative"))? * 1000;
    let primes = tokio::task::spawn_blocking(move || {
        (2..limit)
            .filter(|&candidate| (2..).take_while(|d| d * d <= candidate).all(|d| candidate % d != 0))
            .count()
    })
    .await?;
    Ok(json!(primes))
}

async fn io_bound_task(payload: Payload) -> Result<Value> {
    let ms = int_arg(&payload, 0, Some(200))?;
    let ms = u64::try_from(ms).map_err(|_| fatal("ms must not be negative"))?;
    sleep(Duration::from_millis(ms)).await;
    Ok(json!(ms))
}

// src/bin/commands/qtask.rs
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::ArgMatches;
use serde_json::Value;
use tokio::signal;
use tokio::time::{sleep, Instant};
use tracing::info;

use qtask::{Engine, JobTemplate, Payload, PoolConfig, Priority, Settings};

use super::tasks;

const RESULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

async fn connect() -> Result<Engine> {
    let settings = tasks::settings(Settings::from_env()?);
    let engine = Engine::redis(&settings, tasks::registry()?)
        .await
        .with_context(|| format!("connecting to {}", settings.broker_url))?;
    Ok(engine)
}

fn number<T: std::str::FromStr>(matches: &ArgMatches, name: &str) -> Result<T> {
    let raw = matches
        .get_one::<String>(name)
        .ok_or_else(|| anyhow!("missing --{name}"))?;
    raw.parse()
        .map_err(|_| anyhow!("--{name} expects a number, got '{raw}'"))
}

/// Each argument as JSON when it parses, else as a string.
fn parse_args<'a>(raw: impl IntoIterator<Item = &'a str>) -> Payload {
    raw.into_iter()
        .filter(|arg| !arg.is_empty())
        .map(|arg| serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.to_string())))
        .collect()
}

/// `add:5,10` -> template for `add` with `[5, 10]`.
fn parse_step(step: &str) -> Result<JobTemplate> {
    let (job_type, args) = step.split_once(':').unwrap_or((step, ""));
    if job_type.is_empty() {
        return Err(anyhow!("step '{step}' has no job type"));
    }
    Ok(JobTemplate::new(job_type, parse_args(args.split(','))))
}

async fn wait_for_ctrl_c() -> Result<()> {
    signal::ctrl_c()
        .await
        .context("failed to install Ctrl+C handler")
}

// Run a worker pool until Ctrl+C
pub async fn worker_command(matches: &ArgMatches) -> Result<()> {
    let queues: Vec<&str> = matches
        .get_one::<String>("queues")
        .map(|q| q.split(',').map(str::trim).filter(|q| !q.is_empty()).collect())
        .unwrap_or_default();
    let name = matches
        .get_one::<String>("name")
        .cloned()
        .unwrap_or_else(|| "worker".to_string());

    let config = PoolConfig::new(name)
        .with_queue_names(queues)
        .with_concurrency(number(matches, "concurrency")?)
        .with_prefetch_multiplier(number(matches, "prefetch")?)
        .with_fair_dispatch(matches.get_flag("fair"))
        .with_shutdown_timeout(Duration::from_secs(number(matches, "timeout")?));

    let engine = connect().await?;
    info!(handlers = ?engine.registry().names(), "Loaded task handlers");
    let mut pool = engine.worker_pool(config)?;
    pool.start()?;

    wait_for_ctrl_c().await?;
    info!("Shutdown requested");
    pool.shutdown().await?;

    let stats = pool.stats();
    println!(
        "Processed {} job(s): {} succeeded, {} failed, {} retried",
        stats.total_processed(),
        stats.succeeded,
        stats.failed,
        stats.retried
    );
    Ok(())
}

// Submit scheduled_task periodically until Ctrl+C
pub async fn beat_command(matches: &ArgMatches) -> Result<()> {
    let interval = Duration::from_secs(number(matches, "interval")?);
    let engine = connect().await?;
    engine.registry().ensure([tasks::SCHEDULED_TASK])?;
    engine.schedule(tasks::SCHEDULED_TASK, Vec::new(), interval)?;

    wait_for_ctrl_c().await?;
    engine.unschedule(tasks::SCHEDULED_TASK);
    Ok(())
}

pub async fn submit_command(matches: &ArgMatches) -> Result<()> {
    let job_type = matches
        .get_one::<String>("job_type")
        .ok_or_else(|| anyhow!("missing job type"))?;
    let payload = parse_args(
        matches
            .get_many::<String>("args")
            .into_iter()
            .flatten()
            .map(String::as_str),
    );
    let priority: Priority = matches
        .get_one::<String>("priority")
        .map(|p| p.parse())
        .transpose()
        .map_err(|e: String| anyhow!(e))?
        .unwrap_or_default();

    let engine = connect().await?;
    let job_id = engine.submit(job_type, payload, Some(priority)).await?;
    println!("{job_id}");
    Ok(())
}

pub async fn chain_command(matches: &ArgMatches) -> Result<()> {
    let steps = matches
        .get_many::<String>("steps")
        .into_iter()
        .flatten()
        .map(|s| parse_step(s))
        .collect::<Result<Vec<_>>>()?;

    let engine = connect().await?;
    let head = engine.submit_chain(steps).await?;
    println!("{head}");
    Ok(())
}

pub async fn result_command(matches: &ArgMatches) -> Result<()> {
    let job_id = matches
        .get_one::<String>("job_id")
        .ok_or_else(|| anyhow!("missing job id"))?;
    let engine = connect().await?;

    if matches.get_flag("raw") {
        let record = engine.inspect(job_id).await?;
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    let deadline = match matches.get_one::<String>("wait") {
        Some(_) => Some(Instant::now() + Duration::from_secs(number(matches, "wait")?)),
        None => None,
    };
    let outcome = loop {
        let outcome = engine.get_result(job_id).await?;
        match deadline {
            Some(deadline) if !outcome.is_ready() && Instant::now() < deadline => {
                sleep(RESULT_POLL_INTERVAL).await;
            }
            _ => break outcome,
        }
    };
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

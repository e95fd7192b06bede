// src/bin/qtask.rs
use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
use commands::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let app = Command::new("qtask")
        .version(env!("CARGO_PKG_VERSION"))
        .about("qtask - distributed task queue workers, scheduler and client")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("worker")
                .about("Run a worker pool")
                .arg(Arg::new("queues")
                    .short('q')
                    .long("queues")
                    .value_name("QUEUE1,QUEUE2")
                    .help("Comma-separated queues, highest priority first")
                    .default_value("celery"))
                .arg(Arg::new("concurrency")
                    .short('c')
                    .long("concurrency")
                    .value_name("NUMBER")
                    .help("Number of execution slots")
                    .default_value("4"))
                .arg(Arg::new("prefetch")
                    .short('p')
                    .long("prefetch")
                    .value_name("NUMBER")
                    .help("Reservations a slot may hold beyond its running job")
                    .default_value("4"))
                .arg(Arg::new("fair")
                    .long("fair")
                    .help("Spread reservations evenly across slots")
                    .action(ArgAction::SetTrue))
                .arg(Arg::new("name")
                    .short('n')
                    .long("name")
                    .value_name("NAME")
                    .help("Pool name used in logs")
                    .default_value("worker"))
                .arg(Arg::new("timeout")
                    .short('t')
                    .long("timeout")
                    .value_name("SECONDS")
                    .help("Graceful shutdown timeout in seconds")
                    .default_value("60"))
        )
        .subcommand(
            Command::new("beat")
                .about("Run the periodic scheduler")
                .arg(Arg::new("interval")
                    .short('i')
                    .long("interval")
                    .value_name("SECONDS")
                    .help("Interval for scheduled_task")
                    .default_value("60"))
        )
        .subcommand(
            Command::new("submit")
                .about("Submit one job")
                .arg(Arg::new("job_type")
                    .help("Registered job type")
                    .required(true))
                .arg(Arg::new("args")
                    .help("Arguments; each is parsed as JSON, else taken as a string")
                    .num_args(0..))
                .arg(Arg::new("priority")
                    .long("priority")
                    .value_name("PRIORITY")
                    .help("normal or high")
                    .default_value("normal"))
        )
        .subcommand(
            Command::new("chain")
                .about("Submit a chain; each step is TYPE[:ARG,ARG...]")
                .arg(Arg::new("steps")
                    .help("Steps in order, e.g. add:5,10 multiply:2")
                    .required(true)
                    .num_args(1..))
        )
        .subcommand(
            Command::new("result")
                .about("Show a job's outcome")
                .arg(Arg::new("job_id")
                    .help("Job id (or chain head id)")
                    .required(true))
                .arg(Arg::new("raw")
                    .long("raw")
                    .help("Show the stored record without following chain links")
                    .action(ArgAction::SetTrue))
                .arg(Arg::new("wait")
                    .short('w')
                    .long("wait")
                    .value_name("SECONDS")
                    .help("Poll until the job is done or the time runs out"))
        );

    let matches = app.get_matches();

    match matches.subcommand() {
        Some(("worker", sub_matches)) => worker_command(sub_matches).await,
        Some(("beat", sub_matches)) => beat_command(sub_matches).await,
        Some(("submit", sub_matches)) => submit_command(sub_matches).await,
        Some(("chain", sub_matches)) => chain_command(sub_matches).await,
        Some(("result", sub_matches)) => result_command(sub_matches).await,
        _ => {
            eprintln!("No command specified. Use --help for usage information.");
            std::process::exit(1);
        }
    }
}

//! queuectl — CLI for the persistent background-job queue.

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use queuectl::schema::JobState;
use queuectl::{NewJob, Reaper, Runner, config, dashboard, db, enqueue, shutdown, storage};
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "queuectl")]
#[command(about = "Enqueue and manage background shell jobs with workers, retries, and a dead-letter queue")]
struct Cli {
    /// Path to the queue database file.
    #[arg(long, global = true, default_value = db::DEFAULT_DB_PATH)]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a new job to the queue (supports scheduling and priority).
    Enqueue {
        /// Job descriptor JSON, e.g. '{"command":"echo hello"}'.
        job: String,

        /// Job priority (higher runs first); overrides the JSON payload.
        #[arg(short, long)]
        priority: Option<i64>,

        /// Run the job after a delay (e.g. 10s, 1m, 2h).
        #[arg(long, value_parser = humantime::parse_duration)]
        delay: Option<Duration>,

        /// Absolute time to run the job (RFC 3339, e.g. 2026-08-03T01:00:00Z).
        #[arg(long = "run-at")]
        run_at: Option<String>,
    },

    /// Manage background workers.
    Worker {
        #[command(subcommand)]
        command: WorkerCommand,
    },

    /// List jobs, optionally filtered by state.
    List {
        /// Filter by job state (pending, processing, completed, failed, dead).
        #[arg(short, long)]
        state: Option<JobState>,

        /// Also print each job's captured output.
        #[arg(short = 'o', long)]
        show_output: bool,
    },

    /// Show per-state job counts.
    Status,

    /// Show aggregated job metrics and performance stats.
    Stats,

    /// View the dead-letter queue, or send one entry back to pending.
    Dlq {
        /// Requeue this dead job id instead of listing.
        #[arg(long)]
        retry: Option<String>,
    },

    /// View or modify queue configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Serve the web dashboard.
    Web {
        /// Address to listen on.
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: SocketAddr,
    },
}

#[derive(Subcommand, Debug)]
enum WorkerCommand {
    /// Start workers that poll for and execute queued jobs.
    Start {
        /// Number of workers to start.
        #[arg(short, long, default_value_t = 1)]
        count: usize,

        /// Maximum execution time per job (e.g. 30s, 2m).
        #[arg(long, value_parser = humantime::parse_duration, default_value = "1m")]
        timeout: Duration,

        /// Base retry backoff duration (e.g. 2s, 5s, 10s).
        #[arg(long = "backoff-base", value_parser = humantime::parse_duration, default_value = "5s")]
        backoff_base: Duration,

        /// Also release jobs stuck in processing for longer than this lease.
        #[arg(long = "reap-after", value_parser = humantime::parse_duration)]
        reap_after: Option<Duration>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Set a configuration value.
    Set {
        /// Configuration key.
        #[arg(long)]
        key: String,

        /// Configuration value.
        #[arg(long)]
        value: String,
    },

    /// View all configuration values.
    View,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let pool = db::connect(&cli.db)
        .await
        .with_context(|| format!("failed to open queue database at {}", cli.db.display()))?;
    db::setup_database(&pool)
        .await
        .context("failed to prepare the database schema")?;

    match cli.command {
        Command::Enqueue {
            job,
            priority,
            delay,
            run_at,
        } => cmd_enqueue(&pool, &job, priority, delay, run_at).await,
        Command::Worker {
            command:
                WorkerCommand::Start {
                    count,
                    timeout,
                    backoff_base,
                    reap_after,
                },
        } => cmd_worker_start(pool, count, timeout, backoff_base, reap_after).await,
        Command::List { state, show_output } => cmd_list(&pool, state, show_output).await,
        Command::Status => cmd_status(&pool).await,
        Command::Stats => cmd_stats(&pool).await,
        Command::Dlq { retry } => cmd_dlq(&pool, retry).await,
        Command::Config { command } => cmd_config(&pool, command).await,
        Command::Web { listen } => dashboard::serve(listen, pool).await,
    }
}

async fn cmd_enqueue(
    pool: &SqlitePool,
    payload: &str,
    priority: Option<i64>,
    delay: Option<Duration>,
    run_at: Option<String>,
) -> anyhow::Result<()> {
    let mut new_job: NewJob = serde_json::from_str(payload).context("invalid job JSON")?;

    if let Some(priority) = priority {
        new_job.priority = Some(priority);
    }
    if let Some(raw) = run_at {
        let parsed = DateTime::parse_from_rfc3339(&raw).with_context(|| {
            format!("invalid --run-at value {raw:?}, expected RFC 3339 (e.g. 2026-08-03T01:00:00Z)")
        })?;
        new_job.run_at = Some(parsed.with_timezone(&Utc));
    }
    new_job.delay = delay;

    let scheduled_for = new_job.run_at;
    let id = enqueue(pool, new_job).await?;

    match (delay, scheduled_for) {
        (Some(delay), _) => println!(
            "Job {id} enqueued (runs in {})",
            humantime::format_duration(delay)
        ),
        (None, Some(at)) => println!("Job {id} enqueued (scheduled for {})", at.to_rfc3339()),
        (None, None) => println!("Job {id} enqueued (immediate execution)"),
    }

    Ok(())
}

async fn cmd_worker_start(
    pool: SqlitePool,
    count: usize,
    timeout: Duration,
    backoff_base: Duration,
    reap_after: Option<Duration>,
) -> anyhow::Result<()> {
    let shutdown = shutdown::install_shutdown_handler();

    tracing::info!(count, ?timeout, ?backoff_base, "starting workers");

    let reaper = reap_after
        .map(|lease| Reaper::with_lease(lease).start(pool.clone(), shutdown.clone()));

    let runner = Runner::new(pool, count)
        .exec_timeout(timeout)
        .retry_base_delay(backoff_base);

    runner.start(shutdown.clone()).wait_for_shutdown().await;

    if let Some(reaper) = reaper {
        if let Err(error) = reaper.await {
            tracing::warn!(%error, "reaper task panicked");
        }
    }

    tracing::info!("all workers stopped");
    Ok(())
}

async fn cmd_list(
    pool: &SqlitePool,
    state: Option<JobState>,
    show_output: bool,
) -> anyhow::Result<()> {
    let states: Vec<JobState> = state.into_iter().collect();
    let jobs = storage::list(pool, &states, 100, 0, true).await?;

    if jobs.is_empty() {
        println!("No jobs found");
        return Ok(());
    }

    for job in jobs {
        println!(
            "- [{}] {} | attempts {}/{} | state: {}",
            job.id, job.command, job.attempts, job.max_retries, job.state
        );
        if show_output && !job.output.is_empty() {
            println!("  output:\n{}", job.output);
        }
    }

    Ok(())
}

async fn cmd_status(pool: &SqlitePool) -> anyhow::Result<()> {
    let mut counts = Vec::with_capacity(JobState::ALL.len());
    let mut total = 0;

    for state in JobState::ALL {
        let count = storage::count_by_state(pool, state).await?;
        total += count;
        counts.push((state, count));
    }

    println!("Job queue status:");
    println!("Total jobs: {total}");
    for (state, count) in counts {
        println!("{state}: {count}");
    }

    Ok(())
}

async fn cmd_stats(pool: &SqlitePool) -> anyhow::Result<()> {
    let summary = storage::metrics(pool).await?;

    println!("Queue metrics summary");
    println!("----------------------------");
    println!("Total jobs:       {}", summary.total);
    println!("Pending:          {}", summary.pending);
    println!("Processing:       {}", summary.processing);
    println!("Completed:        {}", summary.completed);
    println!("Failed:           {}", summary.failed);
    println!("Dead (DLQ):       {}", summary.dead);
    println!("Avg duration:     {:.2}s", summary.avg_duration);
    println!("Avg retries/job:  {:.2}", summary.avg_retries);
    println!("----------------------------");

    Ok(())
}

async fn cmd_dlq(pool: &SqlitePool, retry: Option<String>) -> anyhow::Result<()> {
    if let Some(id) = retry {
        storage::requeue_dead(pool, &id)
            .await
            .map_err(|error| match error {
                sqlx::Error::RowNotFound => anyhow!("no dead job with id {id:?}"),
                other => other.into(),
            })?;
        println!("DLQ: job {id} moved back to pending");
        return Ok(());
    }

    let jobs = storage::list(pool, &[JobState::Dead], 200, 0, true).await?;
    if jobs.is_empty() {
        println!("DLQ is empty");
        return Ok(());
    }

    println!("Dead letter queue:");
    for job in jobs {
        println!(
            "- {} | {} | attempts {}/{} | last error: {}",
            job.id,
            job.command,
            job.attempts,
            job.max_retries,
            job.last_error.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}

async fn cmd_config(pool: &SqlitePool, command: ConfigCommand) -> anyhow::Result<()> {
    match command {
        ConfigCommand::Set { key, value } => {
            config::set(pool, &key, &value).await?;
            println!("{key} set to {value}");
        }
        ConfigCommand::View => {
            let items = config::all(pool).await?;
            if items.is_empty() {
                println!("No configuration values set");
                return Ok(());
            }
            println!("Current configuration:");
            for (key, value) in items {
                println!("{key} = {value}");
            }
        }
    }

    Ok(())
}

//! CLI command definitions for tidepool.
//!
//! `simulate` drives a pool with synthetic sleeping jobs and reports how it
//! scaled. `settings` prints the configuration the environment resolves to.

use crate::metrics::{export_metrics, init_metrics};
use crate::scheduler::{job, PoolError, PoolSettings, SettingsSummary, WorkerPool};
use clap::Parser;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How often `simulate` samples the pool while waiting for it to drain.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

/// Adaptive worker pool driver.
#[derive(Parser)]
#[command(name = "tidepool")]
#[command(about = "Drive and inspect an adaptive worker pool")]
#[command(version)]
#[command(
    long_about = "tidepool runs jobs on a self-scaling pool of workers fed by a bounded queue.\n\nPool settings are read from TIDEPOOL_* environment variables and may be overridden per command.\n\nExample usage:\n  tidepool simulate --jobs 500 --job-ms 20 --maximum 32 --json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Submit synthetic jobs to a pool and report how it scaled.
    #[command(alias = "sim")]
    Simulate(SimulateArgs),

    /// Print the effective pool settings.
    Settings(SettingsArgs),
}

/// Arguments for the simulate command.
#[derive(Parser, Debug)]
pub struct SimulateArgs {
    /// Number of jobs to submit.
    #[arg(short = 'n', long, default_value = "100")]
    pub jobs: usize,

    /// How long each job sleeps, in milliseconds.
    #[arg(long, default_value = "10")]
    pub job_ms: u64,

    /// Make every K-th job panic (0 disables).
    #[arg(long, default_value = "0")]
    pub panic_every: usize,

    /// Wait up to this many milliseconds for queue capacity per submission.
    /// Without it, submissions fail immediately when the queue is full.
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Override the queue capacity.
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Override the number of queued jobs each worker is expected to cover.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Override the standby worker count.
    #[arg(long)]
    pub standby: Option<usize>,

    /// Override the maximum worker count (0 = unbounded).
    #[arg(long)]
    pub maximum: Option<usize>,

    /// Override the reconciliation interval, in milliseconds.
    #[arg(long)]
    pub spawn_interval_ms: Option<u64>,

    /// Override the idle time before a surplus worker retires, in milliseconds.
    #[arg(long)]
    pub expiry_ms: Option<u64>,

    /// Override the stall threshold that triggers extra workers, in milliseconds.
    #[arg(long)]
    pub jam_ms: Option<u64>,

    /// Give up waiting for the pool to drain after this many seconds.
    #[arg(long, default_value = "60")]
    pub drain_timeout_secs: u64,

    /// Output the summary in JSON format.
    #[arg(short, long)]
    pub json: bool,

    /// Print the Prometheus exposition after the summary.
    #[arg(long)]
    pub metrics: bool,
}

impl SimulateArgs {
    /// Applies command-line overrides on top of `settings`.
    fn apply_overrides(&self, mut settings: PoolSettings) -> PoolSettings {
        if let Some(capacity) = self.queue_capacity {
            settings = settings.with_queue_capacity(capacity);
        }
        if let Some(batch) = self.batch_size {
            settings = settings.with_worker_batch_size(batch);
        }
        if let Some(standby) = self.standby {
            settings = settings.with_worker_size_standby(standby);
        }
        if let Some(maximum) = self.maximum {
            settings = settings.with_worker_size_maximum(maximum);
        }
        if let Some(ms) = self.spawn_interval_ms {
            settings = settings.with_spawn_worker_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = self.expiry_ms {
            settings = settings.with_worker_expiry(Duration::from_millis(ms));
        }
        if let Some(ms) = self.jam_ms {
            settings = settings.with_worker_jam(Duration::from_millis(ms));
        }
        settings
    }
}

/// Arguments for the settings command.
#[derive(Parser, Debug)]
pub struct SettingsArgs {
    /// Output in JSON format.
    #[arg(short, long)]
    pub json: bool,
}

/// Result of a simulate run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationSummary {
    pub settings: SettingsSummary,
    pub submitted: usize,
    pub accepted: usize,
    pub rejected_full: usize,
    pub rejected_timeout: usize,
    pub rejected_closed: usize,
    pub jobs_completed: u64,
    pub jobs_panicked: u64,
    pub peak_workers: usize,
    pub workers_spawned: u64,
    pub workers_retired: u64,
    pub drained: bool,
    pub elapsed_ms: u64,
}

/// Submission tallies collected while feeding the pool.
#[derive(Debug, Default)]
struct Submissions {
    accepted: usize,
    rejected_full: usize,
    rejected_timeout: usize,
    rejected_closed: usize,
}

impl Submissions {
    fn record(&mut self, result: Result<(), PoolError>) -> anyhow::Result<()> {
        match result {
            Ok(()) => self.accepted += 1,
            Err(PoolError::JobQueueFull) => self.rejected_full += 1,
            Err(PoolError::ScheduleTimeout(_)) => self.rejected_timeout += 1,
            Err(PoolError::PoolClosed) => self.rejected_closed += 1,
            Err(other) => return Err(other.into()),
        }
        Ok(())
    }
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI, parsing arguments from the process.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with already-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Simulate(args) => run_simulate_command(args).await,
        Commands::Settings(args) => run_settings_command(args),
    }
}

async fn run_simulate_command(args: SimulateArgs) -> anyhow::Result<()> {
    if args.metrics {
        init_metrics()?;
    }

    let settings = args.apply_overrides(PoolSettings::from_env()?);
    let summary_settings = settings.summary();
    let pool = WorkerPool::new(settings)?;

    info!(
        jobs = args.jobs,
        job_ms = args.job_ms,
        panic_every = args.panic_every,
        "Starting simulation"
    );

    let started = Instant::now();
    let job_duration = Duration::from_millis(args.job_ms);
    let mut submissions = Submissions::default();
    let mut peak_workers = 0usize;

    for index in 1..=args.jobs {
        let panics = args.panic_every > 0 && index % args.panic_every == 0;
        let work = job(move || {
            std::thread::sleep(job_duration);
            if panics {
                panic!("simulated failure in job {index}");
            }
        });

        let result = match args.timeout_ms {
            Some(ms) => {
                pool.schedule_with_timeout(work, Duration::from_millis(ms))
                    .await
            }
            None => pool.schedule(work),
        };
        submissions.record(result)?;
        peak_workers = peak_workers.max(pool.worker_count());
    }

    let drain_deadline =
        Instant::now().checked_add(Duration::from_secs(args.drain_timeout_secs));
    let mut drained = true;
    while pool.stats().total_processed() < submissions.accepted as u64 {
        if drain_deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            warn!(
                timeout_secs = args.drain_timeout_secs,
                "Pool did not drain before the deadline"
            );
            drained = false;
            break;
        }
        peak_workers = peak_workers.max(pool.worker_count());
        tokio::time::sleep(SAMPLE_INTERVAL).await;
    }

    pool.close();
    let stats = pool.stats();

    let summary = SimulationSummary {
        settings: summary_settings,
        submitted: args.jobs,
        accepted: submissions.accepted,
        rejected_full: submissions.rejected_full,
        rejected_timeout: submissions.rejected_timeout,
        rejected_closed: submissions.rejected_closed,
        jobs_completed: stats.jobs_completed,
        jobs_panicked: stats.jobs_panicked,
        peak_workers,
        workers_spawned: stats.workers_spawned,
        workers_retired: stats.workers_retired,
        drained,
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    };

    if args.json {
        let json = serde_json::to_string_pretty(&summary)?;
        println!("{json}");
    } else {
        print_simulation_summary(&summary);
    }

    if args.metrics {
        print!("{}", export_metrics());
    }

    Ok(())
}

fn print_simulation_summary(summary: &SimulationSummary) {
    println!("\n=== Simulation Results ===");
    println!("Submitted:        {}", summary.submitted);
    println!("Accepted:         {}", summary.accepted);
    println!("Rejected (full):  {}", summary.rejected_full);
    println!("Rejected (wait):  {}", summary.rejected_timeout);
    println!("Rejected (closed):{}", summary.rejected_closed);
    println!("Completed:        {}", summary.jobs_completed);
    println!("Panicked:         {}", summary.jobs_panicked);
    println!("Peak workers:     {}", summary.peak_workers);
    println!("Workers spawned:  {}", summary.workers_spawned);
    println!("Workers retired:  {}", summary.workers_retired);
    println!("Drained:          {}", summary.drained);
    println!("Elapsed:          {}ms", summary.elapsed_ms);
}

fn run_settings_command(args: SettingsArgs) -> anyhow::Result<()> {
    let summary = PoolSettings::from_env()?.summary();

    if args.json {
        let json = serde_json::to_string_pretty(&summary)?;
        println!("{json}");
        return Ok(());
    }

    println!("queue_capacity:          {}", summary.queue_capacity);
    println!("worker_batch_size:       {}", summary.worker_batch_size);
    println!("worker_size_standby:     {}", summary.worker_size_standby);
    println!("worker_size_maximum:     {}", summary.worker_size_maximum);
    println!("spawn_worker_interval:   {}ms", summary.spawn_worker_interval_ms);
    println!("worker_expiry:           {}ms", summary.worker_expiry_ms);
    println!("worker_jam:              {}ms", summary.worker_jam_ms);
    println!("close_queue_on_close:    {}", summary.close_queue_on_close);
    Ok(())
}

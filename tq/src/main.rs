//! tq - task queue load generator
//!
//! CLI entry point for exercising the scheduler and adaptive controller.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use tokio::time::Instant;
use tracing::info;

use taskqueue::adaptive::AdaptiveScheduler;
use taskqueue::cli::{Cli, Command};
use taskqueue::config::{Config, QueueMode};
use taskqueue::domain::{Priority, Task};
use taskqueue::scheduler::{QueueState, Scheduler};

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskqueue")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Setup tracing subscriber - write to log file, not stdout/stderr
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(log_dir.join("tq.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

/// Either queue flavour, behind the operations the bench needs
enum BenchQueue {
    Fixed(Scheduler),
    Adaptive(AdaptiveScheduler),
}

impl BenchQueue {
    fn add_task(&self, task: Task<usize>) -> Result<()> {
        match self {
            Self::Fixed(q) => q.add_task(task).map(|_| ()),
            Self::Adaptive(q) => q.add_task(task).map(|_| ()),
        }
        .context("Failed to add task")
    }

    fn bulk_add_tasks(&self, tasks: Vec<Task<usize>>) -> Result<()> {
        match self {
            Self::Fixed(q) => q.bulk_add_tasks(tasks).map(|_| ()),
            Self::Adaptive(q) => q.bulk_add_tasks(tasks).map(|_| ()),
        }
        .context("Failed to add tasks")
    }

    async fn until_complete(&self) {
        match self {
            Self::Fixed(q) => q.until_complete().await,
            Self::Adaptive(q) => q.until_complete().await,
        }
    }

    fn queue_state(&self) -> QueueState {
        match self {
            Self::Fixed(q) => q.queue_state(),
            Self::Adaptive(q) => q.queue_state(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate()?;

    info!("tq loaded config: mode={}", config.mode);

    match cli.command {
        Command::Bench {
            tasks,
            work_ms,
            fail_every,
            priorities,
            bulk,
            adaptive,
        } => {
            let mode = if adaptive { QueueMode::Adaptive } else { config.mode };
            cmd_bench(&config, mode, tasks, work_ms, fail_every, priorities, bulk).await
        }
        Command::Config => cmd_config(&config),
    }
}

async fn cmd_bench(
    config: &Config,
    mode: QueueMode,
    tasks: usize,
    work_ms: u64,
    fail_every: usize,
    priorities: i32,
    bulk: bool,
) -> Result<()> {
    if priorities <= 0 {
        return Err(eyre!("--priorities must be positive, got {}", priorities));
    }

    let updates = Arc::new(Mutex::new(Vec::new()));
    let queue = match mode {
        QueueMode::Fixed => BenchQueue::Fixed(Scheduler::new(config.scheduler.clone())?),
        QueueMode::Adaptive => {
            let queue = AdaptiveScheduler::new(config.adaptive.clone())?;
            let sink = updates.clone();
            queue.on_concurrency_update(move |limit| {
                if let Ok(mut updates) = sink.lock() {
                    updates.push(limit);
                }
            });
            BenchQueue::Adaptive(queue)
        }
    };

    info!(%mode, tasks, work_ms, fail_every, priorities, bulk, "Starting bench");
    println!(
        "{} {} tasks on {} queue ({}ms work each)",
        "▶".cyan(),
        tasks.to_string().bold(),
        mode.to_string().yellow(),
        work_ms
    );

    let started = Instant::now();
    let batch = (0..tasks).map(|n| synthetic_task(n, work_ms, fail_every, priorities));
    if bulk {
        queue.bulk_add_tasks(batch.collect())?;
    } else {
        for task in batch {
            queue.add_task(task)?;
        }
    }
    queue.until_complete().await;
    let elapsed = started.elapsed();

    let state = queue.queue_state();
    let stats = &state.stats;
    println!("{} Drained in {:?}", "✓".green(), elapsed);
    println!("  {:<18} {}", "resolved".dimmed(), stats.total_resolved.to_string().green());
    println!("  {:<18} {}", "rejected".dimmed(), stats.total_rejected.to_string().red());
    println!("  {:<18} {}", "peak in-flight".dimmed(), stats.peak_in_flight);
    println!("  {:<18} {}", "peak pending".dimmed(), stats.peak_pending);
    println!("  {:<18} {:?}", "avg wait".dimmed(), stats.avg_wait());
    println!("  {:<18} {}", "final limit".dimmed(), state.concurrency_limit);

    if let Ok(updates) = updates.lock()
        && !updates.is_empty()
    {
        let trail: Vec<_> = updates.iter().map(|n| n.to_string()).collect();
        println!("  {:<18} {}", "limit updates".dimmed(), trail.join(" → ").cyan());
    }
    Ok(())
}

fn synthetic_task(n: usize, work_ms: u64, fail_every: usize, priorities: i32) -> Task<usize> {
    let fails = fail_every > 0 && (n + 1) % fail_every == 0;
    Task::new("synthetic", move |_| async move {
        tokio::time::sleep(Duration::from_millis(work_ms)).await;
        if fails {
            return Err(eyre!("synthetic failure for task {}", n));
        }
        Ok(n)
    })
    .with_id(format!("task-{}", n))
    .with_priority(Priority((n as i32) % priorities))
}

fn cmd_config(config: &Config) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    print!("{}", yaml);
    Ok(())
}

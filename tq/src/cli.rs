//! CLI argument parsing for tq

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tq")]
#[command(author, version, about = "Priority task queue load generator", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Push synthetic tasks through a queue and report what happened
    Bench {
        /// Number of tasks to submit
        #[arg(short, long, default_value = "1000")]
        tasks: usize,

        /// Simulated work per task in milliseconds
        #[arg(short, long, default_value = "5")]
        work_ms: u64,

        /// Fail every Nth task (0 = never)
        #[arg(short, long, default_value = "0")]
        fail_every: usize,

        /// Spread tasks over this many priority ranks
        #[arg(short, long, default_value = "3")]
        priorities: i32,

        /// Submit all tasks in one batch instead of one at a time
        #[arg(short, long)]
        bulk: bool,

        /// Use the adaptive controller regardless of the configured mode
        #[arg(short, long)]
        adaptive: bool,
    },

    /// Print the effective configuration as YAML
    Config,
}

//! CLI definitions for TaskHands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// TaskHands CLI.
#[derive(Parser)]
#[command(name = "taskhands")]
#[command(about = "Unattended job engine with schedules, rate limits and self-healing")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the engine in the foreground (default)
    Run,

    /// Show worker, queue, schedule and rate limit status
    Status {
        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// List recent jobs
    Jobs {
        /// Number of jobs to show
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// List schedules
    Schedules {
        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Add a job to the queue
    Enqueue {
        /// Task type handled by a registered executor
        task_type: String,

        /// Job parameters as JSON
        #[arg(long, default_value = "{}")]
        params: String,

        /// Priority (urgent, high, normal, low or 1-4)
        #[arg(long, default_value = "normal")]
        priority: String,

        /// URL notified when the job completes
        #[arg(long)]
        callback_url: Option<String>,
    },

    /// Cancel a job that has not started
    Cancel {
        /// Job ID
        id: String,
    },

    /// Enqueue a job from a schedule now, ignoring its daily goal
    RunNow {
        /// Schedule ID
        schedule: String,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Validate the configuration file
    Check,
}

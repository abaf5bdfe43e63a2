//! TaskHands - unattended job engine.
//!
//! Main entry point for the CLI.

mod cli;
mod cmd_admin;
mod cmd_run;

use std::path::Path;

use clap::Parser;
use tracing::warn;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use taskhands_config::{Config, ConfigLoader, LoggingConfig};

use cli::{Cli, Commands, ConfigAction};

/// Initialize tracing with console and daily rotating file output.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let log_dir = ConfigLoader::expand_path(&logging.dir);
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("taskhands")
        .filename_suffix("log")
        .max_log_files(logging.max_files)
        .build(&log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The guard flushes the writer on drop; keep it for the whole process.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> = std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = if logging.json {
        fmt::layer().json().with_writer(non_blocking).boxed()
    } else {
        fmt::layer().with_writer(non_blocking).with_ansi(false).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<(Config, bool)> {
    let found = path.exists();
    let config = ConfigLoader::load_or_default(path)?;
    Ok((config, found))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, found) = load_config(&cli.config)?;

    init_tracing(&config.logging)?;
    if !found {
        warn!("Config file {} not found, using defaults", cli.config.display());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cmd_run::run_engine(config).await,
        Commands::Status { format } => cmd_admin::show_status(config, &format).await,
        Commands::Jobs { limit, format } => cmd_admin::list_jobs(config, limit, &format).await,
        Commands::Schedules { format } => cmd_admin::list_schedules(config, &format).await,
        Commands::Enqueue {
            task_type,
            params,
            priority,
            callback_url,
        } => cmd_admin::enqueue(config, &task_type, &params, &priority, callback_url).await,
        Commands::Cancel { id } => cmd_admin::cancel(config, &id).await,
        Commands::RunNow { schedule } => cmd_admin::run_now(config, &schedule).await,
        Commands::Config {
            action: ConfigAction::Check,
        } => cmd_admin::check_config(&cli.config, &config),
    }
}

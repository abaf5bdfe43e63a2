//! Administrative subcommands. These open the store directly and never start
//! the engine, so they work whether or not `taskhands run` is active.

use std::path::Path;

use anyhow::{bail, Context};

use taskhands_config::{Config, ConfigValidator};
use taskhands_daemon::Orchestrator;
use taskhands_protocols::JobPayload;
use taskhands_workqueue::{JobPriority, NewJob};

use crate::cmd_run::builtin_executors;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

async fn open(config: Config) -> anyhow::Result<Orchestrator> {
    Orchestrator::from_config(config, builtin_executors())
        .await
        .context("Failed to open the engine store")
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) async fn show_status(config: Config, format: &str) -> anyhow::Result<()> {
    let orchestrator = open(config).await?;
    let status = orchestrator.status().await?;

    if format == "json" {
        return print_json(&status);
    }

    println!("Worker:      {} ({})", status.worker_status, status.worker.worker_id);
    match status.last_heartbeat {
        Some(at) => println!("Heartbeat:   {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Heartbeat:   never"),
    }
    println!(
        "Queue:       {} total, {} pending, {} running, {} retrying",
        status.queue.total,
        status.queue.count(taskhands_workqueue::JobStatus::Pending),
        status.queue.count(taskhands_workqueue::JobStatus::Running),
        status.queue.count(taskhands_workqueue::JobStatus::RetryPending),
    );
    println!(
        "Today:       {} completed, {} failed, {} items saved",
        status.queue.completed_today, status.queue.failed_today, status.today.total_items_saved
    );

    if !status.upcoming.is_empty() {
        println!();
        println!("Upcoming (24h):");
        for run in &status.upcoming {
            println!("  {:<24} {:<16} in {} min", run.id, run.task_type, run.in_minutes);
        }
    }

    let busy: Vec<_> = status.rate_limits.values().filter(|s| s.current > 0 || s.in_backoff).collect();
    if !busy.is_empty() {
        println!();
        println!("Rate limits:");
        for s in busy {
            let backoff = if s.in_backoff { " (backoff)" } else { "" };
            println!("  {:<20} {}/{} ({:.1}%){}", s.api, s.current, s.limit, s.percentage, backoff);
        }
    }
    Ok(())
}

pub(crate) async fn list_jobs(config: Config, limit: usize, format: &str) -> anyhow::Result<()> {
    let orchestrator = open(config).await?;
    let jobs = orchestrator.get_job_history(limit).await?;

    if format == "json" {
        return print_json(&jobs);
    }
    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!(
        "{:<38} {:<16} {:<14} {:<8} {:<7} {}",
        "ID", "TASK", "STATUS", "PRIO", "RETRY", "CREATED"
    );
    println!("{}", "-".repeat(100));
    for job in jobs {
        println!(
            "{:<38} {:<16} {:<14} {:<8} {:<7} {}",
            job.id,
            job.task_type,
            job.status.as_str(),
            job.priority.as_str(),
            format!("{}/{}", job.retry_count, job.max_retries),
            job.created_at.format(TIME_FORMAT)
        );
        if let Some(ref error) = job.last_error {
            println!("    last error: {}", error);
        }
    }
    Ok(())
}

pub(crate) async fn list_schedules(config: Config, format: &str) -> anyhow::Result<()> {
    let orchestrator = open(config).await?;
    orchestrator.scheduler().seed().await?;
    let schedules = orchestrator.get_schedules().await?;

    if format == "json" {
        return print_json(&schedules);
    }
    if schedules.is_empty() {
        println!("No schedules defined.");
        return Ok(());
    }

    println!(
        "{:<24} {:<16} {:<8} {:<24} {}",
        "ID", "TASK", "ENABLED", "TRIGGER", "NEXT RUN"
    );
    println!("{}", "-".repeat(96));
    for s in schedules {
        let next = s
            .next_run
            .map(|t| t.format(TIME_FORMAT).to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:<16} {:<8} {:<24} {}",
            s.id,
            s.task_type,
            if s.enabled { "yes" } else { "no" },
            s.trigger.to_string(),
            next
        );
    }
    Ok(())
}

pub(crate) async fn enqueue(
    config: Config,
    task_type: &str,
    params: &str,
    priority: &str,
    callback_url: Option<String>,
) -> anyhow::Result<()> {
    let params: serde_json::Value = serde_json::from_str(params).context("--params must be valid JSON")?;
    let priority: JobPriority = priority.parse()?;

    let mut job = NewJob::new(task_type)
        .with_params(JobPayload::from(params))
        .with_priority(priority);
    if let Some(url) = callback_url {
        job = job.with_callback_url(url);
    }

    let orchestrator = open(config).await?;
    if !orchestrator.executors().contains(task_type) {
        tracing::warn!("No executor for '{}' is built into this binary", task_type);
    }
    let id = orchestrator.add_job(job).await?;
    println!("{}", id);
    Ok(())
}

pub(crate) async fn cancel(config: Config, id: &str) -> anyhow::Result<()> {
    let orchestrator = open(config).await?;
    if orchestrator.cancel_job(id).await? {
        println!("Cancelled {}", id);
        Ok(())
    } else {
        bail!("Job {} was not cancelled (unknown, running or finished)", id)
    }
}

pub(crate) async fn run_now(config: Config, schedule: &str) -> anyhow::Result<()> {
    let orchestrator = open(config).await?;
    orchestrator.scheduler().seed().await?;
    let id = orchestrator.run_schedule_now(schedule).await?;
    println!("{}", id);
    Ok(())
}

pub(crate) fn check_config(path: &Path, config: &Config) -> anyhow::Result<()> {
    let result = ConfigValidator::validate(config);

    for warning in &result.warnings {
        println!("warning: {}", warning);
    }
    for error in &result.errors {
        println!("error: {}", error);
    }

    if !result.is_valid() {
        bail!("{} has {} error(s)", path.display(), result.errors.len());
    }
    println!("{} is valid", path.display());
    Ok(())
}

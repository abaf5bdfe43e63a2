//! Foreground engine.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use taskhands_config::Config;
use taskhands_daemon::{InstanceLock, Orchestrator};
use taskhands_protocols::{ExecutionStats, Executor, ExecutorError, JobPayload};
use taskhands_workqueue::ExecutorRegistry;

/// Task type of the built-in executor.
pub(crate) const NOOP_TASK_TYPE: &str = "noop";

/// Accepts any parameters and reports nothing found.
///
/// Real executors are registered by crates embedding the engine.
struct NoopExecutor;

#[async_trait]
impl Executor for NoopExecutor {
    async fn execute(&self, params: &JobPayload) -> Result<ExecutionStats, ExecutorError> {
        info!(params = params.as_str(), "noop job executed");
        Ok(ExecutionStats::default())
    }
}

pub(crate) fn builtin_executors() -> Arc<ExecutorRegistry> {
    let executors = Arc::new(ExecutorRegistry::new());
    executors.register(NOOP_TASK_TYPE, Arc::new(NoopExecutor));
    executors
}

pub(crate) async fn run_engine(config: Config) -> anyhow::Result<()> {
    info!("Starting TaskHands v{}", env!("CARGO_PKG_VERSION"));

    let store_path = taskhands_config::ConfigLoader::expand_path(&config.store.path);
    let mut lock = InstanceLock::for_store(&store_path);
    lock.acquire()?;
    info!("Store: {}", store_path.display());

    let orchestrator = Orchestrator::from_config(config, builtin_executors()).await?;
    let result = orchestrator.run_until_signal().await;

    lock.release()?;
    result?;
    info!("TaskHands exited cleanly");
    Ok(())
}

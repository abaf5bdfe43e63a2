//! Task type to executor registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use taskhands_protocols::Executor;

/// Maps task type names to their executors.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<String, Arc<dyn Executor>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor, replacing any previous one for the task type.
    pub fn register(&self, task_type: impl Into<String>, executor: Arc<dyn Executor>) {
        let task_type = task_type.into();
        debug!("Registered executor for '{}'", task_type);
        self.executors.write().insert(task_type, executor);
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn Executor>> {
        self.executors.read().get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.executors.read().contains_key(task_type)
    }

    /// Registered task types, sorted.
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.read().keys().cloned().collect();
        types.sort();
        types
    }
}

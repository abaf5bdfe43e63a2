//! Executor seam: the code that performs the actual work of a task type.

use std::future::Future;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by executors.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Parameters could not be decoded into the executor's shape.
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// An upstream API refused the request because of throttling.
    #[error("Rate limited by {api}")]
    RateLimited { api: String },

    /// The task ran and failed.
    #[error("{0}")]
    Failed(String),
}

/// Counters reported by an executor run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub items_found: u64,
    pub items_saved: u64,
    pub duplicates: u64,
    pub filtered: u64,
}

/// Opaque serialized job parameters.
///
/// The engine never inspects the payload; each executor decodes it into its
/// own typed shape with [`JobPayload::decode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobPayload(String);

impl JobPayload {
    /// Wrap already serialized JSON text.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Empty JSON object.
    pub fn empty() -> Self {
        Self("{}".to_string())
    }

    /// Serialize a value into a payload.
    pub fn from_value<T: Serialize>(value: &T) -> Result<Self, ExecutorError> {
        serde_json::to_string(value)
            .map(Self)
            .map_err(|e| ExecutorError::InvalidParams(e.to_string()))
    }

    /// Decode into a typed parameter struct.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ExecutorError> {
        serde_json::from_str(&self.0).map_err(|e| ExecutorError::InvalidParams(e.to_string()))
    }

    /// Raw text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobPayload {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<serde_json::Value> for JobPayload {
    fn from(value: serde_json::Value) -> Self {
        Self(value.to_string())
    }
}

/// Performs the work for one task type.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run once with the job's parameters.
    async fn execute(&self, params: &JobPayload) -> Result<ExecutionStats, ExecutorError>;
}

/// Adapter turning an async closure into an [`Executor`].
pub struct FnExecutor<F> {
    f: F,
}

impl<F> FnExecutor<F> {
    pub fn new<Fut>(f: F) -> Self
    where
        F: Fn(JobPayload) -> Fut + Send + Sync,
        Fut: Future<Output = Result<ExecutionStats, ExecutorError>> + Send + 'static,
    {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Executor for FnExecutor<F>
where
    F: Fn(JobPayload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ExecutionStats, ExecutorError>> + Send + 'static,
{
    async fn execute(&self, params: &JobPayload) -> Result<ExecutionStats, ExecutorError> {
        (self.f)(params.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, Serialize)]
    struct SearchParams {
        max_results: u32,
    }

    #[test]
    fn test_payload_decode() {
        let payload = JobPayload::from(serde_json::json!({"max_results": 50}));
        let params: SearchParams = payload.decode().unwrap();
        assert_eq!(params.max_results, 50);
    }

    #[test]
    fn test_payload_decode_mismatch() {
        let payload = JobPayload::empty();
        let err = payload.decode::<SearchParams>().unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidParams(_)));
    }

    #[test]
    fn test_payload_serializes_transparently() {
        let payload = JobPayload::from_value(&SearchParams { max_results: 3 }).unwrap();
        assert_eq!(payload.as_str(), r#"{"max_results":3}"#);
    }

    #[tokio::test]
    async fn test_fn_executor() {
        let executor = FnExecutor::new(|params: JobPayload| async move {
            let p: SearchParams = params.decode()?;
            Ok::<_, ExecutorError>(ExecutionStats {
                items_found: p.max_results as u64,
                items_saved: 1,
                ..Default::default()
            })
        });

        let stats = executor
            .execute(&JobPayload::new(r#"{"max_results":7}"#))
            .await
            .unwrap();
        assert_eq!(stats.items_found, 7);
        assert_eq!(stats.items_saved, 1);
    }
}

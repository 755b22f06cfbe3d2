//! Job handlers and the dispatch registry.

use std::{collections::HashMap, sync::Arc};

use futures::future::BoxFuture;
use pool_db::Job;
use serde_json::json;

/// Successful result of a handler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutput {
    /// Structured result, stored in the job's `result_data` column
    pub data: serde_json::Value,
    /// Free-text output, stored in the job's `output` column
    pub output: String,
}

/// Error returned by a handler run.
///
/// The exit code lands in the job row next to the error text, mirroring how
/// subprocess-style handlers report failures.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("invalid job payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),

    #[error("{message}")]
    Failed { message: String, exit_code: i32 },
}

impl HandlerError {
    pub fn exit_code(&self) -> i32 {
        match self {
            HandlerError::InvalidPayload(_) => 2,
            HandlerError::Failed { exit_code, .. } => *exit_code,
        }
    }
}

/// A handler executes jobs of one (or more) job types.
///
/// Handlers own payload interpretation end to end; the worker runtime passes
/// the claimed job through untouched and records whatever comes back.
pub trait Handler: Send + Sync + 'static {
    fn run(&self, job: Job) -> BoxFuture<'static, Result<JobOutput, HandlerError>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JobOutput, HandlerError>> + Send + 'static,
{
    fn run(&self, job: Job) -> BoxFuture<'static, Result<JobOutput, HandlerError>> {
        Box::pin(self(job))
    }
}

/// Maps job type strings to handlers.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
    fallback: Option<Arc<dyn Handler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a job type, replacing any previous one.
    pub fn register(&mut self, job_type: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(job_type.into(), handler);
    }

    /// Registers a handler used when no type-specific handler matches.
    ///
    /// Without a fallback, jobs of unregistered types are failed rather than
    /// left to block the queue.
    pub fn register_fallback(&mut self, handler: Arc<dyn Handler>) {
        self.fallback = Some(handler);
    }

    /// True when no handler of any kind is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty() && self.fallback.is_none()
    }

    /// Resolves the handler for a job type.
    pub fn resolve(&self, job_type: &str) -> Option<Arc<dyn Handler>> {
        self.handlers
            .get(job_type)
            .or(self.fallback.as_ref())
            .cloned()
    }

    /// The job types with a type-specific handler registered.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.registered_types())
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Built-in echo handler, mainly for smoke-testing a pool deployment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

#[derive(Debug, serde::Deserialize)]
struct EchoPayload {
    text: String,
}

impl Handler for EchoHandler {
    fn run(&self, job: Job) -> BoxFuture<'static, Result<JobOutput, HandlerError>> {
        Box::pin(async move {
            let payload: EchoPayload =
                serde_json::from_value(job.payload).map_err(HandlerError::InvalidPayload)?;
            Ok(JobOutput {
                data: json!({
                    "echoed": payload.text,
                    "length": payload.text.len(),
                }),
                output: payload.text,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use pool_db::NewJob;
    use serde_json::json;

    use super::*;

    fn job_with(job_type: &str, payload: serde_json::Value) -> Job {
        let new_job = NewJob::new(job_type, payload);
        Job {
            id: pool_db::JobId::try_from(1).expect("Valid job id"),
            job_type: new_job.job_type,
            payload: new_job.payload,
            status: pool_db::JobStatus::Running,
            priority: new_job.priority,
            timeout_seconds: new_job.timeout_seconds,
            attempts: 1,
            claimed_by: None,
            claimed_at: None,
            completed_at: None,
            result_data: None,
            output: None,
            error: None,
            exit_code: None,
            source_machine: None,
            created_at: Default::default(),
            updated_at: Default::default(),
        }
    }

    #[test]
    fn resolves_exact_type_before_fallback() {
        //* Given
        let mut registry = HandlerRegistry::new();
        registry.register("echo", Arc::new(EchoHandler));

        //* Then
        assert!(registry.resolve("echo").is_some());
        assert!(registry.resolve("transcode").is_none());

        //* When
        registry.register_fallback(Arc::new(EchoHandler));

        //* Then
        assert!(registry.resolve("transcode").is_some());
    }

    #[tokio::test]
    async fn closures_implement_handler() {
        //* Given
        let mut registry = HandlerRegistry::new();
        registry.register(
            "reverse",
            Arc::new(|job: Job| async move {
                let text = job.payload["text"].as_str().unwrap_or_default();
                Ok(JobOutput {
                    data: json!({}),
                    output: text.chars().rev().collect(),
                })
            }),
        );

        //* When
        let handler = registry.resolve("reverse").expect("Handler missing");
        let result = handler
            .run(job_with("reverse", json!({ "text": "abc" })))
            .await
            .expect("Handler failed");

        //* Then
        assert_eq!(result.output, "cba");
    }

    #[tokio::test]
    async fn echo_handler_echoes_the_text() {
        //* Given
        let job = job_with("echo", json!({ "text": "hello" }));

        //* When
        let result = EchoHandler.run(job).await.expect("Echo failed");

        //* Then
        assert_eq!(result.output, "hello");
        assert_eq!(result.data, json!({ "echoed": "hello", "length": 5 }));
    }

    #[tokio::test]
    async fn echo_handler_rejects_malformed_payloads() {
        //* Given
        let job = job_with("echo", json!({ "not_text": 42 }));

        //* When
        let result = EchoHandler.run(job).await;

        //* Then
        let err = result.expect_err("Expected payload error");
        assert!(matches!(err, HandlerError::InvalidPayload(_)));
        assert_eq!(err.exit_code(), 2);
    }
}

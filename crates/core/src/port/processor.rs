// Job Processor Port
// Abstraction over the user-supplied processor function

use crate::domain::JobRecord;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by a processor. Becomes a job FAILURE, not a queue
/// error; the message is appended to the job's log buffer.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ProcessorError {
    message: String,
}

impl ProcessorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type ProcessorResult = std::result::Result<serde_json::Value, ProcessorError>;

/// User-supplied work. The queue never inspects the job's `data`; the
/// processor receives a snapshot of the claimed record and returns a result
/// value (reported on the `Complete` event) or a failure.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &JobRecord) -> ProcessorResult;
}

/// Adapt an async closure into a [`JobProcessor`].
pub fn from_fn<F, Fut>(f: F) -> Arc<dyn JobProcessor>
where
    F: Fn(JobRecord) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProcessorResult> + Send + 'static,
{
    Arc::new(FnProcessor(f))
}

struct FnProcessor<F>(F);

#[async_trait]
impl<F, Fut> JobProcessor for FnProcessor<F>
where
    F: Fn(JobRecord) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProcessorResult> + Send + 'static,
{
    async fn process(&self, job: &JobRecord) -> ProcessorResult {
        (self.0)(job.clone()).await
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Mock processor behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Succeed with the given result value
        Succeed(serde_json::Value),
        /// Fail with message
        Fail(String),
        /// Sleep for the duration, then succeed
        Sleep(Duration),
    }

    /// Mock processor for testing; records the IDs it was asked to process.
    pub struct MockProcessor {
        behavior: MockBehavior,
        processed: Arc<Mutex<Vec<String>>>,
    }

    impl MockProcessor {
        pub fn new(behavior: MockBehavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                processed: Arc::new(Mutex::new(Vec::new())),
            })
        }

        pub fn succeeding() -> Arc<Self> {
            Self::new(MockBehavior::Succeed(serde_json::json!({"ok": true})))
        }

        pub fn failing(message: impl Into<String>) -> Arc<Self> {
            Self::new(MockBehavior::Fail(message.into()))
        }

        pub fn sleeping(duration: Duration) -> Arc<Self> {
            Self::new(MockBehavior::Sleep(duration))
        }

        /// Job IDs in the order they were processed.
        pub fn processed_ids(&self) -> Vec<String> {
            self.processed.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.processed.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl JobProcessor for MockProcessor {
        async fn process(&self, job: &JobRecord) -> ProcessorResult {
            self.processed.lock().unwrap().push(job.id.clone());

            match &self.behavior {
                MockBehavior::Succeed(value) => Ok(value.clone()),
                MockBehavior::Fail(message) => Err(ProcessorError::new(message.clone())),
                MockBehavior::Sleep(duration) => {
                    tokio::time::sleep(*duration).await;
                    Ok(serde_json::Value::Null)
                }
            }
        }
    }
}

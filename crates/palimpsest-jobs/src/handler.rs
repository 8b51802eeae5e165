//! The handler contract between the worker and job implementations.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use palimpsest_core::{Job, JobType};

/// The claimed job as handed to a handler.
pub struct JobContext {
    pub job: Job,
}

impl JobContext {
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    /// Document the job targets, if it targets one.
    pub fn document_id(&self) -> Option<Uuid> {
        self.job.document_id
    }

    /// Free-form payload attached at queue time.
    pub fn payload(&self) -> Option<&JsonValue> {
        self.job.payload.as_ref()
    }
}

/// What a handler reports back to the worker.
#[derive(Debug)]
pub enum JobResult {
    /// Done, with optional result data stored on the job row.
    Success(Option<JsonValue>),
    /// Failed. The worker classifies the message to decide whether a retry
    /// gets scheduled, so handlers only describe what went wrong.
    Failed(String),
}

/// One job type's implementation.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> JobType;

    async fn execute(&self, ctx: JobContext) -> JobResult;

    fn can_handle(&self, job_type: JobType) -> bool {
        self.job_type() == job_type
    }
}

/// Succeeds without doing anything. Useful in tests.
pub struct NoOpHandler {
    job_type: JobType,
}

impl NoOpHandler {
    pub fn new(job_type: JobType) -> Self {
        Self { job_type }
    }
}

#[async_trait]
impl JobHandler for NoOpHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn execute(&self, _ctx: JobContext) -> JobResult {
        JobResult::Success(None)
    }
}

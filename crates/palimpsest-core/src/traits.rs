//! Core traits for palimpsest abstractions.
//!
//! These traits define the interfaces that concrete implementations must
//! satisfy, enabling pluggable backends and testability. The orchestrator in
//! palimpsest-jobs is written against these traits so its rollback behavior
//! can be exercised with in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// CHUNK REPOSITORY
// =============================================================================

/// Versioned chunk storage.
///
/// The `is_current` flag is the only globally visible state the reprocessing
/// core mutates; everything else stays run-local until final persistence.
#[async_trait]
pub trait ChunkRepository: Send + Sync {
    /// Generation number currently flagged current for a document, if any.
    async fn current_generation(&self, document_id: Uuid) -> Result<Option<i32>>;

    /// Highest generation number that exists for a document, current or not.
    /// After extraction completes this is the pending generation.
    async fn latest_generation(&self, document_id: Uuid) -> Result<Option<i32>>;

    /// All chunks of one generation, ordered by chunk index.
    async fn get_generation(&self, document_id: Uuid, generation: i32) -> Result<Vec<Chunk>>;

    /// Insert a batch of chunks as written. The extraction pipeline stores
    /// the new generation with `is_current = false`; it only becomes visible
    /// through [`set_current_generation`].
    ///
    /// [`set_current_generation`]: ChunkRepository::set_current_generation
    async fn insert_generation(&self, chunks: &[Chunk]) -> Result<()>;

    /// Resolve a chunk's embedding and owning document regardless of the
    /// chunk's currency flag. Needed for remap source lookups after the old
    /// generation has been superseded.
    async fn lookup_embedding(&self, chunk_id: Uuid) -> Result<Option<ChunkEmbedding>>;

    /// Atomically make `generation` the single current generation for the
    /// document, demoting every other generation. Used both to promote a new
    /// generation and to restore the old one on rollback.
    async fn set_current_generation(&self, document_id: Uuid, generation: i32) -> Result<()>;

    /// Physically delete all non-current generations for a document.
    /// This is the explicit cleanup; reprocessing itself never deletes.
    async fn delete_superseded(&self, document_id: Uuid) -> Result<u64>;
}

// =============================================================================
// ANNOTATION REPOSITORY
// =============================================================================

#[async_trait]
pub trait AnnotationRepository: Send + Sync {
    /// All annotations attached to a document, oldest first.
    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<Annotation>>;

    /// Persist a batch of recovery outcomes: update offsets for successes,
    /// attach the candidate for review, flag lost ones. Never deletes.
    async fn apply_outcomes(&self, outcomes: &[AnnotationOutcome]) -> Result<()>;
}

// =============================================================================
// CONNECTION REPOSITORY
// =============================================================================

#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    /// User-validated connections with at least one endpoint chunk belonging
    /// to the given document.
    async fn list_validated_for_document(&self, document_id: Uuid) -> Result<Vec<Connection>>;

    /// Delete unvalidated connections touching the document. Speculative
    /// connections are cheap to regenerate against the new generation.
    async fn discard_unvalidated_for_document(&self, document_id: Uuid) -> Result<u64>;

    /// Persist a batch of remap outcomes: rewrite endpoint ids where present
    /// and stamp provenance on every connection.
    async fn apply_remaps(&self, remaps: &[ConnectionRemap]) -> Result<()>;
}

// =============================================================================
// JOB REPOSITORY
// =============================================================================

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Queue a job unconditionally.
    async fn queue(
        &self,
        document_id: Option<Uuid>,
        job_type: JobType,
        priority: i32,
        payload: Option<JsonValue>,
    ) -> Result<Uuid>;

    /// Queue a job unless an identical pending/running one already exists for
    /// the document. This is the per-document mutual exclusion the
    /// reprocessing design relies on: at most one run in flight per document.
    async fn queue_deduplicated(
        &self,
        document_id: Uuid,
        job_type: JobType,
        priority: i32,
        payload: Option<JsonValue>,
    ) -> Result<Option<Uuid>>;

    /// Claim the next runnable pending job, marking it running.
    async fn claim_next(&self) -> Result<Option<Job>>;

    /// Mark a job completed with an optional result payload.
    async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<()>;

    /// Mark a job failed with its error message and classification. For
    /// retryable failures `next_retry_at` schedules the earliest re-queue.
    async fn fail(
        &self,
        job_id: Uuid,
        error: &str,
        class: FailureClass,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Re-queue failed jobs whose last failure was transient, whose retry
    /// budget remains, and whose `next_retry_at` has passed. Clears the prior
    /// error so the next attempt is evaluated independently. Returns the
    /// number of jobs re-queued.
    async fn sweep_retryable(&self) -> Result<u64>;

    /// Cancel all pending jobs for a document, so a caller can supersede an
    /// obsolete run before enqueueing a fresh one. Running jobs are left to
    /// finish; two uncoordinated writers on the currency flag is the one race
    /// this design must prevent.
    async fn cancel_pending_for_document(&self, document_id: Uuid) -> Result<u64>;

    /// Fetch a single job.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Number of pending jobs.
    async fn pending_count(&self) -> Result<i64>;

    /// Queue health summary.
    async fn queue_stats(&self) -> Result<QueueStats>;
}

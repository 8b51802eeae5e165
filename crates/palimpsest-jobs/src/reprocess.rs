//! Reprocessing orchestrator.
//!
//! Drives a full reprocess run for one document: load both chunk
//! generations, relocate annotations, remap validated connections, persist
//! the outcomes in batches, and finally promote the new generation. The
//! currency flag is the commit point; any failure along the way restores the
//! old generation so readers never see a half-reprocessed document.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use pgvector::Vector;
use serde_json::json;
use sqlx::postgres::PgPool;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use palimpsest_core::{
    AnnotationRepository, ChunkRepository, ConnectionRecoveryResults, ConnectionRepository, Error,
    JobType, RecoveryResults, ReprocessReport, Result,
};
use palimpsest_db::{
    BatchWriter, PgAnnotationRepository, PgChunkRepository, PgConnectionRepository,
};
use palimpsest_recovery::{
    assemble_text, recover_annotations, remap_connections, EndpointContext, SimilarityIndex,
};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Orchestrates one reprocess run per call. Written against the repository
/// traits so the rollback path can be exercised without a database.
pub struct ReprocessOrchestrator {
    chunks: Arc<dyn ChunkRepository>,
    annotations: Arc<dyn AnnotationRepository>,
    connections: Arc<dyn ConnectionRepository>,
    writer: BatchWriter,
}

impl ReprocessOrchestrator {
    pub fn new(
        chunks: Arc<dyn ChunkRepository>,
        annotations: Arc<dyn AnnotationRepository>,
        connections: Arc<dyn ConnectionRepository>,
    ) -> Self {
        Self {
            chunks,
            annotations,
            connections,
            writer: BatchWriter::new(),
        }
    }

    /// Build an orchestrator backed by PostgreSQL repositories.
    pub fn from_pool(pool: PgPool) -> Self {
        Self::new(
            Arc::new(PgChunkRepository::new(pool.clone())),
            Arc::new(PgAnnotationRepository::new(pool.clone())),
            Arc::new(PgConnectionRepository::new(pool)),
        )
    }

    pub fn with_batch_writer(mut self, writer: BatchWriter) -> Self {
        self.writer = writer;
        self
    }

    /// Run a full reprocess for one document.
    ///
    /// Requires a current generation (the one being superseded) and a newer
    /// pending generation already extracted. On error the old generation's
    /// currency is restored before the error is returned.
    pub async fn run(&self, document_id: Uuid) -> Result<ReprocessReport> {
        let start = Instant::now();

        let old_generation = self
            .chunks
            .current_generation(document_id)
            .await?
            .ok_or(Error::NoCurrentGeneration(document_id))?;
        let new_generation = self
            .chunks
            .latest_generation(document_id)
            .await?
            .ok_or(Error::NoPendingGeneration(document_id))?;
        if new_generation <= old_generation {
            return Err(Error::NoPendingGeneration(document_id));
        }

        info!(
            document_id = %document_id,
            old_generation,
            new_generation,
            "Starting reprocess run"
        );

        match self
            .run_phases(document_id, old_generation, new_generation)
            .await
        {
            Ok((annotations, connections)) => {
                let recovery_rate = combined_recovery_rate(&annotations, &connections);
                let report = ReprocessReport {
                    document_id,
                    annotations,
                    connections,
                    execution_time_ms: start.elapsed().as_millis() as u64,
                    recovery_rate,
                };
                info!(
                    document_id = %document_id,
                    new_generation,
                    annotations_total = report.annotations.total(),
                    connections_total = report.connections.total(),
                    recovery_rate = report.recovery_rate,
                    duration_ms = report.execution_time_ms,
                    "Reprocess run complete"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(
                    document_id = %document_id,
                    error = %e,
                    "Reprocess run failed, restoring old generation"
                );
                if let Err(restore_err) = self
                    .chunks
                    .set_current_generation(document_id, old_generation)
                    .await
                {
                    error!(
                        document_id = %document_id,
                        old_generation,
                        error = %restore_err,
                        "Failed to restore old generation after aborted run"
                    );
                }
                Err(e)
            }
        }
    }

    async fn run_phases(
        &self,
        document_id: Uuid,
        old_generation: i32,
        new_generation: i32,
    ) -> Result<(RecoveryResults, ConnectionRecoveryResults)> {
        let old_chunks = self
            .chunks
            .get_generation(document_id, old_generation)
            .await?;
        let new_chunks = self
            .chunks
            .get_generation(document_id, new_generation)
            .await?;
        let text = assemble_text(&new_chunks);

        // Phase 1: relocate annotations in the new text.
        let annotations = self.annotations.list_for_document(document_id).await?;
        let recovery = recover_annotations(&annotations, &text, &new_chunks);

        // Phase 2: remap validated connections by embedding similarity. The
        // endpoint set starts from the superseded generation and is extended
        // with any in-document endpoints still pointing at older generations.
        let validated = self
            .connections
            .list_validated_for_document(document_id)
            .await?;
        let mut old_chunk_ids: HashSet<Uuid> = old_chunks.iter().map(|c| c.id).collect();
        let mut old_embeddings: HashMap<Uuid, Vector> = old_chunks
            .iter()
            .filter_map(|c| c.embedding.clone().map(|e| (c.id, e)))
            .collect();
        for connection in &validated {
            for endpoint in [connection.source_chunk_id, connection.target_chunk_id] {
                if old_chunk_ids.contains(&endpoint) {
                    continue;
                }
                if let Some(ce) = self.chunks.lookup_embedding(endpoint).await? {
                    if ce.document_id == document_id {
                        old_chunk_ids.insert(endpoint);
                        old_embeddings.insert(endpoint, ce.embedding);
                    }
                }
            }
        }
        let index = SimilarityIndex::build(&new_chunks);
        let ctx = EndpointContext {
            old_chunk_ids: &old_chunk_ids,
            old_embeddings: &old_embeddings,
            index: &index,
        };
        let remapped = remap_connections(&validated, &ctx);

        let discarded = self
            .connections
            .discard_unvalidated_for_document(document_id)
            .await?;
        if discarded > 0 {
            debug!(
                document_id = %document_id,
                discarded,
                "Discarded unvalidated connections"
            );
        }

        // Phase 3: persist outcomes in batches.
        let outcomes = recovery.outcomes();
        let annotations_repo = self.annotations.clone();
        self.writer
            .write_all(&outcomes, |batch| {
                let repo = annotations_repo.clone();
                Box::pin(async move { repo.apply_outcomes(batch).await })
            })
            .await?;

        let remaps = remapped.remaps();
        let connections_repo = self.connections.clone();
        self.writer
            .write_all(&remaps, |batch| {
                let repo = connections_repo.clone();
                Box::pin(async move { repo.apply_remaps(batch).await })
            })
            .await?;

        // Phase 4: promote. This is the single commit point.
        self.chunks
            .set_current_generation(document_id, new_generation)
            .await?;

        Ok((recovery, remapped))
    }
}

/// (success + needs_review) / total across annotations and connections.
/// Nothing to recover counts as fully recovered.
fn combined_recovery_rate(
    annotations: &RecoveryResults,
    connections: &ConnectionRecoveryResults,
) -> f32 {
    let total = annotations.total() + connections.total();
    if total == 0 {
        return 1.0;
    }
    let recovered = annotations.success.len()
        + annotations.needs_review.len()
        + connections.success.len()
        + connections.needs_review.len();
    recovered as f32 / total as f32
}

/// Job handler that runs the orchestrator for reprocess jobs.
pub struct ReprocessHandler {
    orchestrator: Arc<ReprocessOrchestrator>,
}

impl ReprocessHandler {
    pub fn new(orchestrator: Arc<ReprocessOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl JobHandler for ReprocessHandler {
    fn job_type(&self) -> JobType {
        JobType::Reprocess
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let Some(document_id) = ctx.document_id() else {
            return JobResult::Failed("Reprocess job without a document id".to_string());
        };

        match self.orchestrator.run(document_id).await {
            Ok(report) => JobResult::Success(Some(json!({
                "document_id": report.document_id,
                "annotations": {
                    "success": report.annotations.success.len(),
                    "needs_review": report.annotations.needs_review.len(),
                    "lost": report.annotations.lost.len(),
                },
                "connections": {
                    "success": report.connections.success.len(),
                    "needs_review": report.connections.needs_review.len(),
                    "lost": report.connections.lost.len(),
                },
                "recovery_rate": report.recovery_rate,
                "execution_time_ms": report.execution_time_ms,
            }))),
            Err(e) => JobResult::Failed(e.to_string()),
        }
    }
}

/// Job handler that physically deletes superseded chunk generations.
pub struct PurgeSupersededHandler {
    chunks: Arc<dyn ChunkRepository>,
}

impl PurgeSupersededHandler {
    pub fn new(chunks: Arc<dyn ChunkRepository>) -> Self {
        Self { chunks }
    }
}

#[async_trait]
impl JobHandler for PurgeSupersededHandler {
    fn job_type(&self) -> JobType {
        JobType::PurgeSuperseded
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let Some(document_id) = ctx.document_id() else {
            return JobResult::Failed("Purge job without a document id".to_string());
        };

        match self.chunks.delete_superseded(document_id).await {
            Ok(deleted) => {
                info!(document_id = %document_id, deleted, "Purged superseded chunks");
                JobResult::Success(Some(json!({ "deleted": deleted })))
            }
            Err(e) => JobResult::Failed(e.to_string()),
        }
    }
}

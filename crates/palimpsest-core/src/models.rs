//! Core data models for palimpsest.
//!
//! The central entities are document chunks (versioned in generations),
//! user annotations anchored to chunk text, and AI-discovered connections
//! between chunks. Everything else in this module is run-local state produced
//! by a reprocessing run: match results, tier partitions, and job records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Embedding vector type (re-exported from pgvector).
pub use pgvector::Vector;

// =============================================================================
// CHUNKS
// =============================================================================

/// A contiguous span of a document's text, the unit annotations and
/// connections attach to.
///
/// Chunks are versioned by `generation`: each extraction run produces a new
/// generation for the document, and exactly one generation has
/// `is_current = true` at rest. Superseded generations are retained until an
/// explicit cleanup so that old annotations and connection endpoints remain
/// resolvable during recovery.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    /// Extraction run that produced this chunk. Monotonically increasing
    /// per document.
    pub generation: i32,
    /// Position of this chunk within its generation.
    pub chunk_index: i32,
    /// Byte offset of this chunk's content in the document's full text.
    pub start_offset: i32,
    pub end_offset: i32,
    pub content: String,
    /// Pre-computed embedding. Populated by the extraction pipeline; this
    /// core never calls the embedding service.
    pub embedding: Option<Vector>,
    pub is_current: bool,
    pub created_at: DateTime<Utc>,
}

/// Embedding lookup for a single chunk, resolvable regardless of whether the
/// chunk's generation is still current (remap source lookups need this).
/// Chunks without an embedding yield no `ChunkEmbedding` at all, so the
/// vector here is always present.
#[derive(Debug, Clone)]
pub struct ChunkEmbedding {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub embedding: Vector,
}

// =============================================================================
// ANNOTATIONS
// =============================================================================

/// A user annotation anchored to a span of document text.
///
/// Consumed read-only by the recovery engine; updated in place with new
/// offsets (or review candidates, or a lost flag) after a reprocessing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub id: Uuid,
    pub document_id: Uuid,
    /// The annotated text itself.
    pub text: String,
    pub start_offset: i32,
    pub end_offset: i32,
    /// Text immediately preceding the annotated span when it was created.
    pub context_before: String,
    /// Text immediately following the annotated span when it was created.
    pub context_after: String,
    /// Index of the chunk the span lived in, within its generation.
    pub original_chunk_index: Option<i32>,
    /// Outcome of the most recent recovery run, if any.
    pub recovery_status: Option<RecoveryTier>,
    /// Candidate match awaiting user adjudication (needs_review only).
    pub suggested_match: Option<AnnotationMatch>,
    /// Why the annotation was flagged lost, for diagnostics.
    pub lost_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Matching strategy that produced an [`AnnotationMatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Exact,
    Context,
    ChunkBounded,
    Trigram,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::Exact => "exact",
            MatchMethod::Context => "context",
            MatchMethod::ChunkBounded => "chunk_bounded",
            MatchMethod::Trigram => "trigram",
        }
    }
}

/// A relocated annotation span in the new chunk generation's text.
///
/// Transient: produced and consumed within one recovery run, persisted only
/// as a review candidate on the annotation row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationMatch {
    /// The matched text as it appears in the new generation.
    pub text: String,
    pub start_offset: i32,
    pub end_offset: i32,
    /// Match confidence in [0, 1].
    pub confidence: f32,
    pub method: MatchMethod,
}

// =============================================================================
// RECOVERY TIERS & PARTITIONS
// =============================================================================

/// Confidence tier assigned to a recovery or remap outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryTier {
    /// Auto-applied.
    Success,
    /// Candidate attached, awaiting user adjudication.
    NeedsReview,
    /// No acceptable match. Flagged, never deleted.
    Lost,
}

impl RecoveryTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryTier::Success => "success",
            RecoveryTier::NeedsReview => "needs_review",
            RecoveryTier::Lost => "lost",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(RecoveryTier::Success),
            "needs_review" => Some(RecoveryTier::NeedsReview),
            "lost" => Some(RecoveryTier::Lost),
            _ => None,
        }
    }
}

/// An annotation together with its winning match.
#[derive(Debug, Clone)]
pub struct RecoveredAnnotation {
    pub annotation: Annotation,
    pub matched: AnnotationMatch,
}

/// An annotation no strategy could relocate acceptably.
#[derive(Debug, Clone)]
pub struct LostAnnotation {
    pub annotation: Annotation,
    pub reason: String,
}

/// Three-way partition of an annotation set after a recovery run.
///
/// Invariant: every input annotation appears in exactly one partition.
#[derive(Debug, Clone, Default)]
pub struct RecoveryResults {
    pub success: Vec<RecoveredAnnotation>,
    pub needs_review: Vec<RecoveredAnnotation>,
    pub lost: Vec<LostAnnotation>,
}

impl RecoveryResults {
    pub fn total(&self) -> usize {
        self.success.len() + self.needs_review.len() + self.lost.len()
    }

    /// (success + needs_review) / total. Empty input counts as fully
    /// recovered.
    pub fn recovery_rate(&self) -> f32 {
        let total = self.total();
        if total == 0 {
            return 1.0;
        }
        (self.success.len() + self.needs_review.len()) as f32 / total as f32
    }

    /// Flatten the partition into persistable per-annotation outcomes.
    pub fn outcomes(&self) -> Vec<AnnotationOutcome> {
        let mut out = Vec::with_capacity(self.total());
        for r in &self.success {
            out.push(AnnotationOutcome {
                annotation_id: r.annotation.id,
                tier: RecoveryTier::Success,
                matched: Some(r.matched.clone()),
                lost_reason: None,
            });
        }
        for r in &self.needs_review {
            out.push(AnnotationOutcome {
                annotation_id: r.annotation.id,
                tier: RecoveryTier::NeedsReview,
                matched: Some(r.matched.clone()),
                lost_reason: None,
            });
        }
        for l in &self.lost {
            out.push(AnnotationOutcome {
                annotation_id: l.annotation.id,
                tier: RecoveryTier::Lost,
                matched: None,
                lost_reason: Some(l.reason.clone()),
            });
        }
        out
    }
}

/// Persistable outcome of recovering one annotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationOutcome {
    pub annotation_id: Uuid,
    pub tier: RecoveryTier,
    /// Present for success and needs_review.
    pub matched: Option<AnnotationMatch>,
    /// Present for lost.
    pub lost_reason: Option<String>,
}

// =============================================================================
// CONNECTIONS
// =============================================================================

/// An AI-discovered cross-document connection between two chunks.
///
/// Only `user_validated = true` connections survive reprocessing; speculative
/// ones are cheap to regenerate and are discarded instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: Uuid,
    pub source_chunk_id: Uuid,
    pub target_chunk_id: Uuid,
    /// Discovery engine that produced this connection.
    pub engine_type: String,
    pub strength: f32,
    pub user_validated: bool,
    /// Remap provenance from the most recent reprocessing run, if any.
    pub provenance: Option<RemapProvenance>,
    pub created_at: DateTime<Utc>,
}

/// Remap provenance stamped onto a connection after reprocessing.
///
/// A closed tagged union rather than an open metadata map, so remap handling
/// stays exhaustive at every match site. Serialized into the connection's
/// jsonb provenance column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemapProvenance {
    /// Both endpoints rewritten automatically.
    Remapped { min_similarity: f32 },
    /// Endpoints rewritten tentatively, awaiting user review.
    NeedsReview { min_similarity: f32 },
    /// Endpoints left untouched; the best candidate was too dissimilar to
    /// trust. The observed similarity is retained for audit.
    Lost { min_similarity: f32 },
}

impl RemapProvenance {
    pub fn min_similarity(&self) -> f32 {
        match self {
            RemapProvenance::Remapped { min_similarity }
            | RemapProvenance::NeedsReview { min_similarity }
            | RemapProvenance::Lost { min_similarity } => *min_similarity,
        }
    }
}

/// Persistable outcome of remapping one connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRemap {
    pub connection_id: Uuid,
    /// Replacement source chunk id; None leaves the endpoint unchanged.
    pub new_source_chunk_id: Option<Uuid>,
    /// Replacement target chunk id; None leaves the endpoint unchanged.
    pub new_target_chunk_id: Option<Uuid>,
    pub source_similarity: f32,
    pub target_similarity: f32,
    pub min_similarity: f32,
    pub tier: RecoveryTier,
    pub provenance: RemapProvenance,
}

/// Three-way partition of a connection set after a remapping run.
///
/// Invariant: every input connection appears in exactly one partition.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRecoveryResults {
    pub success: Vec<ConnectionRemap>,
    pub needs_review: Vec<ConnectionRemap>,
    pub lost: Vec<ConnectionRemap>,
}

impl ConnectionRecoveryResults {
    pub fn total(&self) -> usize {
        self.success.len() + self.needs_review.len() + self.lost.len()
    }

    /// (success + needs_review) / total. Empty input counts as fully
    /// recovered.
    pub fn recovery_rate(&self) -> f32 {
        let total = self.total();
        if total == 0 {
            return 1.0;
        }
        (self.success.len() + self.needs_review.len()) as f32 / total as f32
    }

    /// All remaps in partition order, for batch persistence.
    pub fn remaps(&self) -> Vec<ConnectionRemap> {
        self.success
            .iter()
            .chain(&self.needs_review)
            .chain(&self.lost)
            .cloned()
            .collect()
    }
}

// =============================================================================
// REPROCESS REPORT
// =============================================================================

/// Outcome of a full reprocessing run for one document.
#[derive(Debug, Clone)]
pub struct ReprocessReport {
    pub document_id: Uuid,
    pub annotations: RecoveryResults,
    pub connections: ConnectionRecoveryResults,
    pub execution_time_ms: u64,
    /// Combined (success + needs_review) / total across annotations and
    /// connections.
    pub recovery_rate: f32,
}

// =============================================================================
// JOBS
// =============================================================================

/// Classification of a job-level failure, derived from its error message.
/// Computed on demand, never persisted as an entity of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Network blip, timeout, 5xx, 429. Worth retrying.
    Transient,
    /// Anything unrecognized. Not retried.
    Permanent,
    /// Quota or billing exhaustion. Retrying burns money, not time.
    Paywall,
    /// Malformed input or missing resource. Retrying cannot succeed.
    Invalid,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
            FailureKind::Paywall => "paywall",
            FailureKind::Invalid => "invalid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transient" => Some(FailureKind::Transient),
            "permanent" => Some(FailureKind::Permanent),
            "paywall" => Some(FailureKind::Paywall),
            "invalid" => Some(FailureKind::Invalid),
            _ => None,
        }
    }
}

/// A failure kind plus the retry decision it implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureClass {
    pub kind: FailureKind,
    pub can_retry: bool,
}

/// Type of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Full reprocess of a document: annotation recovery, connection
    /// remapping, generation promotion.
    Reprocess,
    /// Explicit cleanup of superseded chunk generations.
    PurgeSuperseded,
}

impl JobType {
    /// The database enum label for this job type.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Reprocess => "reprocess",
            JobType::PurgeSuperseded => "purge_superseded",
        }
    }

    /// Parse a database label. Unknown labels fall back to `Reprocess` so a
    /// row written by a newer schema still loads.
    pub fn parse(s: &str) -> JobType {
        match s {
            "purge_superseded" => JobType::PurgeSuperseded,
            _ => JobType::Reprocess,
        }
    }
}

/// Status of a job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// The database enum label for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Parse a database label, falling back to `Pending` for unknown input.
    pub fn parse(s: &str) -> JobStatus {
        match s {
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Pending,
        }
    }
}

/// A queued background job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub document_id: Option<Uuid>,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: i32,
    pub payload: Option<JsonValue>,
    pub result: Option<JsonValue>,
    pub error_message: Option<String>,
    /// Classification of the last failure, if any.
    pub failure_kind: Option<FailureKind>,
    pub retry_count: i32,
    pub max_retries: i32,
    /// Earliest time the retry sweep may re-queue this job.
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Queue statistics summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed_last_hour: i64,
    pub failed_last_hour: i64,
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotation(id: Uuid) -> Annotation {
        Annotation {
            id,
            document_id: Uuid::new_v4(),
            text: "some text".into(),
            start_offset: 0,
            end_offset: 9,
            context_before: String::new(),
            context_after: String::new(),
            original_chunk_index: None,
            recovery_status: None,
            suggested_match: None,
            lost_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_recovery_results_empty_rate_is_one() {
        let results = RecoveryResults::default();
        assert_eq!(results.total(), 0);
        assert_eq!(results.recovery_rate(), 1.0);
    }

    #[test]
    fn test_recovery_results_rate() {
        let m = AnnotationMatch {
            text: "t".into(),
            start_offset: 0,
            end_offset: 1,
            confidence: 0.9,
            method: MatchMethod::Exact,
        };
        let mut results = RecoveryResults::default();
        results.success.push(RecoveredAnnotation {
            annotation: annotation(Uuid::new_v4()),
            matched: m.clone(),
        });
        results.needs_review.push(RecoveredAnnotation {
            annotation: annotation(Uuid::new_v4()),
            matched: m,
        });
        results.lost.push(LostAnnotation {
            annotation: annotation(Uuid::new_v4()),
            reason: "no match".into(),
        });
        results.lost.push(LostAnnotation {
            annotation: annotation(Uuid::new_v4()),
            reason: "no match".into(),
        });

        assert_eq!(results.total(), 4);
        assert!((results.recovery_rate() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_recovery_results_outcomes_cover_all_partitions() {
        let m = AnnotationMatch {
            text: "t".into(),
            start_offset: 0,
            end_offset: 1,
            confidence: 0.8,
            method: MatchMethod::Trigram,
        };
        let mut results = RecoveryResults::default();
        results.needs_review.push(RecoveredAnnotation {
            annotation: annotation(Uuid::new_v4()),
            matched: m,
        });
        results.lost.push(LostAnnotation {
            annotation: annotation(Uuid::new_v4()),
            reason: "empty".into(),
        });

        let outcomes = results.outcomes();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].tier, RecoveryTier::NeedsReview);
        assert!(outcomes[0].matched.is_some());
        assert_eq!(outcomes[1].tier, RecoveryTier::Lost);
        assert_eq!(outcomes[1].lost_reason.as_deref(), Some("empty"));
    }

    #[test]
    fn test_remap_provenance_serialization() {
        let p = RemapProvenance::Lost {
            min_similarity: 0.4,
        };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["status"], "lost");
        assert!((json["min_similarity"].as_f64().unwrap() - 0.4).abs() < 1e-6);

        let back: RemapProvenance = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_remap_provenance_min_similarity_accessor() {
        assert_eq!(
            RemapProvenance::Remapped {
                min_similarity: 0.97
            }
            .min_similarity(),
            0.97
        );
        assert_eq!(
            RemapProvenance::NeedsReview {
                min_similarity: 0.9
            }
            .min_similarity(),
            0.9
        );
    }

    #[test]
    fn test_recovery_tier_round_trip() {
        for tier in [
            RecoveryTier::Success,
            RecoveryTier::NeedsReview,
            RecoveryTier::Lost,
        ] {
            assert_eq!(RecoveryTier::parse(tier.as_str()), Some(tier));
        }
        assert_eq!(RecoveryTier::parse("unknown"), None);
    }

    #[test]
    fn test_failure_kind_round_trip() {
        for kind in [
            FailureKind::Transient,
            FailureKind::Permanent,
            FailureKind::Paywall,
            FailureKind::Invalid,
        ] {
            assert_eq!(FailureKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(FailureKind::parse(""), None);
    }

    #[test]
    fn test_match_method_as_str_unique() {
        let strings: Vec<&str> = [
            MatchMethod::Exact,
            MatchMethod::Context,
            MatchMethod::ChunkBounded,
            MatchMethod::Trigram,
        ]
        .iter()
        .map(|m| m.as_str())
        .collect();
        let mut unique = strings.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(strings.len(), unique.len());
    }

    #[test]
    fn test_connection_results_empty_rate_is_one() {
        let results = ConnectionRecoveryResults::default();
        assert_eq!(results.total(), 0);
        assert_eq!(results.recovery_rate(), 1.0);
    }

    #[test]
    fn test_job_type_round_trip_and_fallback() {
        for job_type in [JobType::Reprocess, JobType::PurgeSuperseded] {
            assert_eq!(JobType::parse(job_type.as_str()), job_type);
        }
        assert_eq!(JobType::parse("mystery"), JobType::Reprocess);
    }

    #[test]
    fn test_job_status_round_trip_and_fallback() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), status);
        }
        assert_eq!(JobStatus::parse(""), JobStatus::Pending);
    }
}

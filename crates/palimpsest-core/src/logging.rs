//! Structured logging schema and field name constants for palimpsest.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation tools can query by standardized field names across
//! every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, run completions, recovery-rate summaries |
//! | DEBUG | Decision points (strategy wins, tier assignments) |
//! | TRACE | Per-item iteration (per-annotation, per-connection scoring) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "recovery", "remap", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "orchestrator", "batch_writer", "worker", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "reprocess", "recover_annotations", "claim_next"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Document UUID being operated on.
pub const DOCUMENT_ID: &str = "document_id";

/// Annotation UUID being recovered.
pub const ANNOTATION_ID: &str = "annotation_id";

/// Connection UUID being remapped.
pub const CONNECTION_ID: &str = "connection_id";

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of chunks in the generation being processed.
pub const CHUNK_COUNT: &str = "chunk_count";

/// Winning match confidence for an annotation.
pub const CONFIDENCE: &str = "confidence";

/// min(source, target) cosine similarity for a connection.
pub const MIN_SIMILARITY: &str = "min_similarity";

/// (success + needs_review) / total for a completed run.
pub const RECOVERY_RATE: &str = "recovery_rate";

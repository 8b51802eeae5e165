//! Centralized default constants for the palimpsest system.
//!
//! **This module is the single source of truth** for all shared default
//! values. All crates reference these constants instead of defining their own
//! magic numbers.
//!
//! Organized by domain area. When adding new constants, place them in the
//! appropriate section and document the rationale for the chosen value.

// =============================================================================
// ANNOTATION RECOVERY
// =============================================================================

/// Confidence at or above which a recovered annotation is auto-applied.
pub const ANNOTATION_SUCCESS_FLOOR: f32 = 0.85;

/// Confidence at or above which a candidate match is attached for user
/// review. Below this the annotation is flagged lost (but never deleted).
pub const ANNOTATION_REVIEW_FLOOR: f32 = 0.75;

/// Minimum trigram similarity the last-resort strategy will accept.
pub const TRIGRAM_FLOOR: f32 = 0.5;

/// Sliding-window step for the trigram scan, as a fraction of the needle
/// length. Coarse stepping keeps the scan cheap; the best window is refined
/// with a second byte-step pass around the coarse winner.
pub const TRIGRAM_STEP_DIVISOR: usize = 4;

/// Neighbor chunks included on each side of the original chunk index when
/// the chunk-bounded strategy restricts its search window.
pub const CHUNK_NEIGHBOR_MARGIN: i32 = 1;

// =============================================================================
// CONNECTION REMAPPING
// =============================================================================

/// Cosine similarity a new-chunk candidate must reach to be accepted as an
/// endpoint match. Below this the endpoint stays unmatched and the observed
/// similarity is only recorded for audit.
pub const ENDPOINT_ACCEPT_FLOOR: f32 = 0.75;

/// min(source, target) similarity at or above which a connection is
/// auto-remapped.
pub const CONNECTION_SUCCESS_FLOOR: f32 = 0.95;

/// min(source, target) similarity at or above which a connection is remapped
/// tentatively and marked for review. Below this the endpoint ids are left
/// untouched and the connection is flagged lost.
pub const CONNECTION_REVIEW_FLOOR: f32 = 0.85;

// =============================================================================
// BATCH WRITER
// =============================================================================

/// Maximum items persisted per batch.
pub const BATCH_WRITE_SIZE: usize = 100;

/// Retries per batch for transient-looking persistence errors.
pub const BATCH_WRITE_MAX_RETRIES: u32 = 3;

/// Delay between batch retries, in milliseconds.
pub const BATCH_WRITE_RETRY_DELAY_MS: u64 = 250;

// =============================================================================
// JOBS
// =============================================================================

/// Default maximum retries for a queued job.
pub const JOB_MAX_RETRIES: i32 = 3;

/// Maximum concurrent jobs per worker process.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Worker poll interval when the queue is empty, in milliseconds.
pub const JOB_POLL_INTERVAL_MS: u64 = 500;

/// Wall-clock timeout for a single job execution, in seconds.
pub const JOB_TIMEOUT_SECS: u64 = 600;

/// Exponential backoff cap, in minutes. Delay for retry n is
/// min(2^n, RETRY_BACKOFF_CAP_MINUTES).
pub const RETRY_BACKOFF_CAP_MINUTES: i64 = 30;

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

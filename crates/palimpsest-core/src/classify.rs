//! Confidence-tier classification policy.
//!
//! Both engines funnel their scores through these two pure functions, so a
//! given confidence always lands in the same tier no matter when or how often
//! it is classified. The thresholds live in [`crate::defaults`].

use crate::defaults::{
    ANNOTATION_REVIEW_FLOOR, ANNOTATION_SUCCESS_FLOOR, CONNECTION_REVIEW_FLOOR,
    CONNECTION_SUCCESS_FLOOR,
};
use crate::models::RecoveryTier;

/// Classify an annotation match confidence.
///
/// `>= 0.85` auto-applies, `[0.75, 0.85)` goes to review, below that the
/// annotation is lost. Boundaries are inclusive at the lower edge of each
/// tier.
pub fn classify_confidence(confidence: f32) -> RecoveryTier {
    if confidence >= ANNOTATION_SUCCESS_FLOOR {
        RecoveryTier::Success
    } else if confidence >= ANNOTATION_REVIEW_FLOOR {
        RecoveryTier::NeedsReview
    } else {
        RecoveryTier::Lost
    }
}

/// Classify a connection's min(source, target) cosine similarity.
///
/// `>= 0.95` auto-remaps, `[0.85, 0.95)` remaps tentatively for review,
/// below that the endpoints are left untouched and the connection is lost.
pub fn classify_similarity(min_similarity: f32) -> RecoveryTier {
    if min_similarity >= CONNECTION_SUCCESS_FLOOR {
        RecoveryTier::Success
    } else if min_similarity >= CONNECTION_REVIEW_FLOOR {
        RecoveryTier::NeedsReview
    } else {
        RecoveryTier::Lost
    }
}

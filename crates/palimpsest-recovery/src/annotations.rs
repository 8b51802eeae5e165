//! Document-level annotation recovery.
//!
//! Runs the strategy cascade over every annotation of a document against the
//! new generation's text and partitions the results into success, needs
//! review, and lost. One bad annotation never aborts the run.

use tracing::{debug, info};

use palimpsest_core::{
    classify_confidence, Annotation, Chunk, LostAnnotation, RecoveredAnnotation, RecoveryResults,
    RecoveryTier,
};

use crate::strategies::{recover_annotation, MatchCorpus};

/// Recover every annotation against the new generation.
///
/// `text` is the offset-faithful full text assembled from `chunks`. An empty
/// corpus marks everything lost rather than letting the strategies chew on
/// nothing.
pub fn recover_annotations(
    annotations: &[Annotation],
    text: &str,
    chunks: &[Chunk],
) -> RecoveryResults {
    let mut results = RecoveryResults::default();
    if annotations.is_empty() {
        return results;
    }

    if text.trim().is_empty() {
        for annotation in annotations {
            results.lost.push(LostAnnotation {
                annotation: annotation.clone(),
                reason: "New extraction produced no text".to_string(),
            });
        }
        return results;
    }

    let corpus = MatchCorpus { text, chunks };
    for annotation in annotations {
        match recover_annotation(annotation, &corpus) {
            Some(matched) => {
                debug!(
                    annotation_id = %annotation.id,
                    confidence = matched.confidence,
                    method = matched.method.as_str(),
                    "Annotation relocated"
                );
                let confidence = matched.confidence;
                let entry = RecoveredAnnotation {
                    annotation: annotation.clone(),
                    matched,
                };
                match classify_confidence(confidence) {
                    RecoveryTier::Success => results.success.push(entry),
                    RecoveryTier::NeedsReview => results.needs_review.push(entry),
                    RecoveryTier::Lost => results.lost.push(LostAnnotation {
                        annotation: entry.annotation,
                        reason: format!(
                            "Best match confidence {confidence:.2} below review threshold"
                        ),
                    }),
                }
            }
            None => {
                debug!(annotation_id = %annotation.id, "No strategy produced a match");
                results.lost.push(LostAnnotation {
                    annotation: annotation.clone(),
                    reason: "No strategy produced a match".to_string(),
                });
            }
        }
    }

    info!(
        document_id = %annotations[0].document_id,
        chunk_count = chunks.len(),
        total = results.total(),
        success = results.success.len(),
        needs_review = results.needs_review.len(),
        lost = results.lost.len(),
        recovery_rate = results.recovery_rate(),
        "Annotation recovery complete"
    );
    results
}

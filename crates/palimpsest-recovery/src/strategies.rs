//! Annotation matching strategy cascade.
//!
//! Each strategy knows one way to relocate an annotation's span in the new
//! generation's text and its own acceptance floor. The cascade tries them in
//! order of decreasing confidence; the first acceptable match wins. This is a
//! chain of responsibility: adding a strategy means adding a type, not a
//! branch.

use tracing::trace;

use palimpsest_core::defaults::{ANNOTATION_REVIEW_FLOOR, CHUNK_NEIGHBOR_MARGIN, TRIGRAM_FLOOR};
use palimpsest_core::{Annotation, AnnotationMatch, Chunk, MatchMethod};

use crate::text::{denormalize_range, normalize_ws};
use crate::trigram;

/// Base confidence of a context-guided match; the remaining span is earned by
/// the fraction of surrounding context that matched.
const CONTEXT_BASE_CONFIDENCE: f32 = 0.85;
const CONTEXT_CONFIDENCE_SPAN: f32 = 0.10;
/// Hard cap for the context tier. Base + span can overshoot it by a ULP in
/// f32, which would leak a context match into the exact tier.
const CONTEXT_MAX_CONFIDENCE: f32 = 0.95;

/// Chunk-bounded matches are capped below the context tier: the window
/// restriction removes repeated-phrase false positives but the surrounding
/// context was never verified.
const WINDOW_EXACT_CONFIDENCE: f32 = 0.90;
const WINDOW_NORMALIZED_CONFIDENCE: f32 = 0.85;

/// Maps a trigram score above its floor into the strategy's confidence band.
const TRIGRAM_CONFIDENCE_SLOPE: f32 = 0.6;

/// The searchable view of a new chunk generation.
pub struct MatchCorpus<'a> {
    /// Full text of the new generation (offset-faithful).
    pub text: &'a str,
    /// The generation's chunks, for index-bounded windows.
    pub chunks: &'a [Chunk],
}

/// One way of relocating an annotation span in a corpus.
pub trait MatchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Attempt a match. Returns None when this strategy cannot produce a
    /// candidate above its own acceptance floor.
    fn try_match(&self, annotation: &Annotation, corpus: &MatchCorpus<'_>)
        -> Option<AnnotationMatch>;
}

/// Verbatim occurrence of the annotation text. Confidence 1.0; the
/// occurrence closest to the annotation's last known offset wins.
pub struct ExactStrategy;

impl MatchStrategy for ExactStrategy {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn try_match(
        &self,
        annotation: &Annotation,
        corpus: &MatchCorpus<'_>,
    ) -> Option<AnnotationMatch> {
        let needle = annotation.text.as_str();
        if needle.is_empty() {
            return None;
        }
        let pos = nearest_occurrence(corpus.text, needle, annotation.start_offset)?;
        Some(AnnotationMatch {
            text: needle.to_string(),
            start_offset: pos as i32,
            end_offset: (pos + needle.len()) as i32,
            confidence: 1.0,
            method: MatchMethod::Exact,
        })
    }
}

/// Whitespace-normalized search for the annotation text, scored by how much
/// of the stored surrounding context also matches at the found position.
pub struct ContextStrategy;

impl MatchStrategy for ContextStrategy {
    fn name(&self) -> &'static str {
        "context"
    }

    fn try_match(
        &self,
        annotation: &Annotation,
        corpus: &MatchCorpus<'_>,
    ) -> Option<AnnotationMatch> {
        let (ncore, _) = normalize_ws(&annotation.text);
        if ncore.is_empty() {
            return None;
        }
        let (ncorpus, map) = normalize_ws(corpus.text);
        let (nbefore, _) = normalize_ws(&annotation.context_before);
        let (nafter, _) = normalize_ws(&annotation.context_after);
        let context_len = nbefore.len() + nafter.len();
        let target = annotation.start_offset as i64;

        // Best occurrence = most context matched, ties broken by proximity
        // to the old offset.
        let mut best: Option<(f32, i64, usize)> = None;
        for (pos, _) in ncorpus.match_indices(ncore.as_str()) {
            let before_matched = common_suffix_len(ncorpus[..pos].trim_end(), &nbefore);
            let after_matched =
                common_prefix_len(ncorpus[pos + ncore.len()..].trim_start(), &nafter);
            let fraction = if context_len == 0 {
                0.0
            } else {
                (((before_matched + after_matched) as f32) / context_len as f32).min(1.0)
            };
            let dist = (pos as i64 - target).abs();
            let better = match best {
                None => true,
                Some((bf, bd, _)) => fraction > bf || (fraction == bf && dist < bd),
            };
            if better {
                best = Some((fraction, dist, pos));
            }
        }

        let (fraction, _, pos) = best?;
        let (ostart, oend) = denormalize_range(&map, pos, pos + ncore.len())?;
        Some(AnnotationMatch {
            text: corpus.text[ostart..oend].to_string(),
            start_offset: ostart as i32,
            end_offset: oend as i32,
            confidence: (CONTEXT_BASE_CONFIDENCE + CONTEXT_CONFIDENCE_SPAN * fraction)
                .min(CONTEXT_MAX_CONFIDENCE),
            method: MatchMethod::Context,
        })
    }
}

/// Search restricted to the new chunk at the annotation's original chunk
/// index, plus a small neighbor margin. Cuts false positives in documents
/// with repeated phrases.
pub struct ChunkBoundedStrategy;

impl MatchStrategy for ChunkBoundedStrategy {
    fn name(&self) -> &'static str {
        "chunk_bounded"
    }

    fn try_match(
        &self,
        annotation: &Annotation,
        corpus: &MatchCorpus<'_>,
    ) -> Option<AnnotationMatch> {
        let orig = annotation.original_chunk_index?;
        if annotation.text.is_empty() {
            return None;
        }

        let lo = orig - CHUNK_NEIGHBOR_MARGIN;
        let hi = orig + CHUNK_NEIGHBOR_MARGIN;
        let mut wstart = usize::MAX;
        let mut wend = 0usize;
        for c in corpus
            .chunks
            .iter()
            .filter(|c| c.chunk_index >= lo && c.chunk_index <= hi)
        {
            wstart = wstart.min(c.start_offset.max(0) as usize);
            wend = wend.max(c.end_offset.max(0) as usize);
        }
        let wend = wend.min(corpus.text.len());
        if wstart >= wend
            || !corpus.text.is_char_boundary(wstart)
            || !corpus.text.is_char_boundary(wend)
        {
            return None;
        }
        let window = &corpus.text[wstart..wend];

        // Exact inside the window.
        let window_target = annotation.start_offset - wstart as i32;
        if let Some(pos) = nearest_occurrence(window, &annotation.text, window_target) {
            return Some(AnnotationMatch {
                text: annotation.text.clone(),
                start_offset: (wstart + pos) as i32,
                end_offset: (wstart + pos + annotation.text.len()) as i32,
                confidence: WINDOW_EXACT_CONFIDENCE,
                method: MatchMethod::ChunkBounded,
            });
        }

        // Whitespace-normalized inside the window.
        let (ncore, _) = normalize_ws(&annotation.text);
        if !ncore.is_empty() {
            let (nwindow, map) = normalize_ws(window);
            if let Some(pos) = nwindow.find(ncore.as_str()) {
                if let Some((ostart, oend)) = denormalize_range(&map, pos, pos + ncore.len()) {
                    return Some(AnnotationMatch {
                        text: window[ostart..oend].to_string(),
                        start_offset: (wstart + ostart) as i32,
                        end_offset: (wstart + oend) as i32,
                        confidence: WINDOW_NORMALIZED_CONFIDENCE,
                        method: MatchMethod::ChunkBounded,
                    });
                }
            }
        }

        // Trigram inside the window, floor raised to the review threshold.
        let w = trigram::best_window(&annotation.text, window)?;
        if w.score < ANNOTATION_REVIEW_FLOOR {
            return None;
        }
        let confidence = ANNOTATION_REVIEW_FLOOR
            + (w.score - ANNOTATION_REVIEW_FLOOR) * TRIGRAM_CONFIDENCE_SLOPE;
        Some(AnnotationMatch {
            text: window[w.start..w.end].to_string(),
            start_offset: (wstart + w.start) as i32,
            end_offset: (wstart + w.end) as i32,
            confidence,
            method: MatchMethod::ChunkBounded,
        })
    }
}

/// Last resort: best trigram-similarity window anywhere in the corpus.
/// Lowest achievable confidence band; most results land in review or lost.
pub struct TrigramStrategy;

impl MatchStrategy for TrigramStrategy {
    fn name(&self) -> &'static str {
        "trigram"
    }

    fn try_match(
        &self,
        annotation: &Annotation,
        corpus: &MatchCorpus<'_>,
    ) -> Option<AnnotationMatch> {
        if annotation.text.is_empty() {
            return None;
        }
        let w = trigram::best_window(&annotation.text, corpus.text)?;
        if w.score < TRIGRAM_FLOOR {
            return None;
        }
        let confidence = TRIGRAM_FLOOR + (w.score - TRIGRAM_FLOOR) * TRIGRAM_CONFIDENCE_SLOPE;
        Some(AnnotationMatch {
            text: corpus.text[w.start..w.end].to_string(),
            start_offset: w.start as i32,
            end_offset: w.end as i32,
            confidence,
            method: MatchMethod::Trigram,
        })
    }
}

/// The standard cascade, strongest strategy first.
pub fn default_cascade() -> Vec<Box<dyn MatchStrategy>> {
    vec![
        Box::new(ExactStrategy),
        Box::new(ContextStrategy),
        Box::new(ChunkBoundedStrategy),
        Box::new(TrigramStrategy),
    ]
}

/// Run a cascade until one strategy produces a match.
pub fn run_cascade(
    strategies: &[Box<dyn MatchStrategy>],
    annotation: &Annotation,
    corpus: &MatchCorpus<'_>,
) -> Option<AnnotationMatch> {
    for strategy in strategies {
        if let Some(mut m) = strategy.try_match(annotation, corpus) {
            m.confidence = m.confidence.clamp(0.0, 1.0);
            trace!(
                annotation_id = %annotation.id,
                strategy = strategy.name(),
                confidence = m.confidence,
                "Strategy produced a match"
            );
            return Some(m);
        }
    }
    None
}

/// Relocate one annotation using the default cascade.
pub fn recover_annotation(
    annotation: &Annotation,
    corpus: &MatchCorpus<'_>,
) -> Option<AnnotationMatch> {
    run_cascade(&default_cascade(), annotation, corpus)
}

/// Occurrence of `needle` in `haystack` closest to `target` (byte offset).
fn nearest_occurrence(haystack: &str, needle: &str, target: i32) -> Option<usize> {
    let target = target as i64;
    let mut best: Option<usize> = None;
    for (pos, _) in haystack.match_indices(needle) {
        let better = match best {
            None => true,
            Some(b) => (pos as i64 - target).abs() < (b as i64 - target).abs(),
        };
        if better {
            best = Some(pos);
        }
    }
    best
}

fn common_suffix_len(a: &str, b: &str) -> usize {
    a.bytes()
        .rev()
        .zip(b.bytes().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn annotation(text: &str, start: i32) -> Annotation {
        Annotation {
            id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            text: text.to_string(),
            start_offset: start,
            end_offset: start + text.len() as i32,
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

    fn chunk(index: i32, start: i32, content: &str) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            document_id: Uuid::nil(),
            generation: 2,
            chunk_index: index,
            start_offset: start,
            end_offset: start + content.len() as i32,
            content: content.to_string(),
            embedding: None,
            is_current: false,
            created_at: Utc::now(),
        }
    }

    fn corpus(text: &str) -> MatchCorpus<'_> {
        MatchCorpus { text, chunks: &[] }
    }

    #[test]
    fn test_exact_match_has_priority_and_full_confidence() {
        let text = "prologue text. the panopticon disciplines bodies. epilogue.";
        let ann = annotation("the panopticon disciplines", 15);
        let m = recover_annotation(&ann, &corpus(text)).unwrap();
        assert_eq!(m.method, MatchMethod::Exact);
        assert_eq!(m.confidence, 1.0);
        assert_eq!(&text[m.start_offset as usize..m.end_offset as usize], ann.text);
    }

    #[test]
    fn test_exact_prefers_occurrence_nearest_old_offset() {
        let text = "echo one. filler filler filler filler filler. echo one.";
        let second = text.rfind("echo one").unwrap() as i32;
        let ann = annotation("echo one", second - 3);
        let m = ExactStrategy.try_match(&ann, &corpus(text)).unwrap();
        assert_eq!(m.start_offset, second);
    }

    #[test]
    fn test_context_match_survives_inserted_space() {
        // Extra space after "panopticon" defeats the exact strategy; the
        // whitespace-normalized context search recovers it.
        let text = "an extended analysis of the panopticon  disciplines through visibility. more.";
        let mut ann = annotation("the panopticon disciplines", 24);
        ann.context_before = "analysis of ".to_string();
        ann.context_after = " through visibility.".to_string();

        assert!(ExactStrategy.try_match(&ann, &corpus(text)).is_none());

        let m = recover_annotation(&ann, &corpus(text)).unwrap();
        assert_eq!(m.method, MatchMethod::Context);
        assert!(m.confidence >= 0.85, "confidence was {}", m.confidence);
        assert_eq!(
            &text[m.start_offset as usize..m.end_offset as usize],
            "the panopticon  disciplines"
        );
    }

    #[test]
    fn test_context_fraction_scales_confidence() {
        let text = "completely different lead-in the panopticon  disciplines unrelated tail";
        let mut full = annotation("the panopticon disciplines", 0);
        full.context_before = "lead-in ".to_string();
        full.context_after = " unrelated".to_string();
        let with_context = ContextStrategy.try_match(&full, &corpus(text)).unwrap();

        let mut none = annotation("the panopticon disciplines", 0);
        none.context_before = "zzz qqq".to_string();
        none.context_after = "yyy".to_string();
        let without = ContextStrategy.try_match(&none, &corpus(text)).unwrap();

        assert!(with_context.confidence > without.confidence);
        assert!(without.confidence >= 0.85);
        assert!(with_context.confidence <= 0.95);
    }

    #[test]
    fn test_fully_matched_context_stays_in_band() {
        // A perfect context match drives the fraction to 1.0; the raw
        // base + span sum lands a ULP above 0.95 in f32 and must be capped
        // so the result still classifies as a review-tier confidence.
        let text = "analysis of the panopticon  disciplines through visibility";
        let mut ann = annotation("the panopticon disciplines", 12);
        ann.context_before = "analysis of ".to_string();
        ann.context_after = " through visibility".to_string();

        let m = ContextStrategy.try_match(&ann, &corpus(text)).unwrap();
        assert_eq!(m.confidence, 0.95);
    }

    #[test]
    fn test_chunk_bounded_disambiguates_repeated_phrase() {
        // Same phrase in chunk 0 and chunk 4; the original chunk index must
        // steer the match to the far occurrence, not the near one.
        let c0 = "the ritual repeats here plus other material to fill the chunk";
        let c4 = "closing section where the ritual repeats again at the end";
        let chunks = vec![
            chunk(0, 0, c0),
            chunk(4, (c0.len() + 1) as i32, c4),
        ];
        let text = format!("{} {}", c0, c4);

        let mut ann = annotation("the ritual repeats", 0);
        ann.original_chunk_index = Some(4);
        let m = ChunkBoundedStrategy
            .try_match(
                &ann,
                &MatchCorpus {
                    text: &text,
                    chunks: &chunks,
                },
            )
            .unwrap();

        assert_eq!(m.method, MatchMethod::ChunkBounded);
        assert!(m.start_offset as usize > c0.len());
        assert!(m.confidence <= 0.90);
    }

    #[test]
    fn test_chunk_bounded_requires_original_index() {
        let text = "anything at all";
        let ann = annotation("anything", 0);
        assert!(ChunkBoundedStrategy.try_match(&ann, &corpus(text)).is_none());
    }

    #[test]
    fn test_trigram_last_resort_band() {
        // OCR-style corruption everywhere: only the trigram scan can score
        // this, and its confidence must stay within [0.5, 0.8].
        let text = "intro words and then the pan0pticon disciplnes bodies through visbility end";
        let ann = annotation("the panopticon disciplines", 20);
        let m = TrigramStrategy.try_match(&ann, &corpus(text)).unwrap();
        assert_eq!(m.method, MatchMethod::Trigram);
        assert!(m.confidence >= 0.5 && m.confidence <= 0.8);
    }

    #[test]
    fn test_trigram_rejects_unrelated_text() {
        let text = "zzz qqq www eee rrr ttt yyy uuu iii ooo ppp";
        let ann = annotation("the panopticon disciplines", 0);
        assert!(TrigramStrategy.try_match(&ann, &corpus(text)).is_none());
    }

    #[test]
    fn test_cascade_returns_none_when_nothing_matches() {
        let ann = annotation("the panopticon disciplines", 0);
        assert!(recover_annotation(&ann, &corpus("1234567890 !@#$%^")).is_none());
    }

    #[test]
    fn test_cascade_empty_annotation_text() {
        let ann = annotation("", 0);
        assert!(recover_annotation(&ann, &corpus("some corpus text")).is_none());
    }
}

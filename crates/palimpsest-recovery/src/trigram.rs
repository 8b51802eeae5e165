//! Character-trigram similarity scoring.
//!
//! Used by the last-resort matching strategy: tokenize both strings into
//! contiguous 3-character substrings and score overlap with the Dice
//! coefficient. Tolerant of small edits anywhere in the span, which is
//! exactly the failure mode of re-run OCR.

use std::collections::HashSet;

use palimpsest_core::defaults::TRIGRAM_STEP_DIVISOR;

/// A scored candidate window in the haystack, in byte offsets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrigramWindow {
    pub start: usize,
    pub end: usize,
    pub score: f32,
}

/// Extract the set of character trigrams from a string.
///
/// Strings shorter than three characters yield their single full-length
/// gram, so very short annotations still score rather than vanish.
pub fn trigrams(text: &str) -> HashSet<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut set = HashSet::new();
    if chars.is_empty() {
        return set;
    }
    if chars.len() < 3 {
        set.insert(chars.iter().collect());
        return set;
    }
    for w in chars.windows(3) {
        set.insert(w.iter().collect());
    }
    set
}

/// Dice coefficient of two trigram sets: `2·|A∩B| / (|A|+|B|)`.
pub fn dice(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    (2 * shared) as f32 / (a.len() + b.len()) as f32
}

/// Slide a needle-length window across the haystack and return the
/// best-scoring window by trigram Dice similarity.
///
/// The scan is coarse (step = needle_chars / step divisor) followed by a
/// char-step refinement pass around the coarse winner, so the cost stays
/// near O(haystack / step) full comparisons.
pub fn best_window(needle: &str, haystack: &str) -> Option<TrigramWindow> {
    let needle_grams = trigrams(needle);
    if needle_grams.is_empty() {
        return None;
    }

    // Char boundary byte offsets, including the end of the string.
    let boundaries: Vec<usize> = haystack
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(haystack.len()))
        .collect();
    let hay_chars = boundaries.len() - 1;
    let needle_chars = needle.chars().count();

    if hay_chars == 0 {
        return None;
    }
    if hay_chars <= needle_chars {
        let score = dice(&needle_grams, &trigrams(haystack));
        return Some(TrigramWindow {
            start: 0,
            end: haystack.len(),
            score,
        });
    }

    let step = (needle_chars / TRIGRAM_STEP_DIVISOR).max(1);
    let last_start = hay_chars - needle_chars;

    let score_at = |char_start: usize| -> TrigramWindow {
        let start = boundaries[char_start];
        let end = boundaries[char_start + needle_chars];
        let score = dice(&needle_grams, &trigrams(&haystack[start..end]));
        TrigramWindow { start, end, score }
    };

    // Coarse pass.
    let mut best_char = 0usize;
    let mut best = score_at(0);
    let mut pos = step;
    while pos <= last_start {
        let w = score_at(pos);
        if w.score > best.score {
            best = w;
            best_char = pos;
        }
        pos += step;
    }
    // The stride may overshoot the final window; score it explicitly.
    let w = score_at(last_start);
    if w.score > best.score {
        best = w;
        best_char = last_start;
    }

    // Refinement pass around the coarse winner.
    let lo = best_char.saturating_sub(step);
    let hi = (best_char + step).min(last_start);
    for c in lo..=hi {
        let w = score_at(c);
        if w.score > best.score {
            best = w;
        }
    }

    Some(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigrams_basic() {
        let grams = trigrams("hello");
        assert_eq!(grams.len(), 3); // hel, ell, llo
        assert!(grams.contains("hel"));
        assert!(grams.contains("llo"));
    }

    #[test]
    fn test_trigrams_short_string() {
        let grams = trigrams("hi");
        assert_eq!(grams.len(), 1);
        assert!(grams.contains("hi"));
        assert!(trigrams("").is_empty());
    }

    #[test]
    fn test_dice_identical() {
        let a = trigrams("the panopticon disciplines");
        assert_eq!(dice(&a, &a), 1.0);
    }

    #[test]
    fn test_dice_disjoint() {
        let a = trigrams("abcdef");
        let b = trigrams("uvwxyz");
        assert_eq!(dice(&a, &b), 0.0);
    }

    #[test]
    fn test_dice_symmetry() {
        let a = trigrams("surveillance and punishment");
        let b = trigrams("surveillance or punishment");
        assert_eq!(dice(&a, &b), dice(&b, &a));
        assert!(dice(&a, &b) > 0.5);
    }

    #[test]
    fn test_best_window_finds_verbatim_text() {
        let haystack = "an analysis of the panopticon disciplines through visibility";
        let needle = "panopticon disciplines";
        let w = best_window(needle, haystack).unwrap();
        assert!(w.score > 0.9, "score was {}", w.score);
        assert!(haystack[w.start..w.end].contains("panopticon"));
    }

    #[test]
    fn test_best_window_tolerates_small_edit() {
        let haystack = "the text reads: the panoptic0n disciplines bodies here";
        let w = best_window("the panopticon disciplines", haystack).unwrap();
        assert!(w.score > 0.5, "score was {}", w.score);
    }

    #[test]
    fn test_best_window_haystack_shorter_than_needle() {
        let w = best_window("a very long needle string", "short").unwrap();
        assert_eq!(w.start, 0);
        assert_eq!(w.end, "short".len());
        assert!(w.score < 0.1);
    }

    #[test]
    fn test_best_window_empty_needle() {
        assert!(best_window("", "some haystack").is_none());
    }

    #[test]
    fn test_best_window_multibyte_safe() {
        let haystack = "préambule — le panoptique discipline les corps — fin";
        let w = best_window("panoptique discipline", haystack).unwrap();
        // Returned offsets must be valid char boundaries.
        assert!(haystack.is_char_boundary(w.start));
        assert!(haystack.is_char_boundary(w.end));
        assert!(w.score > 0.8);
    }
}

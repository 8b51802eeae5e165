//! Text assembly and whitespace normalization helpers.

use palimpsest_core::Chunk;

/// Reconstruct a generation's full text from its chunks, faithful to each
/// chunk's recorded start offset. Gaps between chunks (stripped separators,
/// page breaks) are filled with spaces so annotation offsets stay aligned.
pub fn assemble_text(chunks: &[Chunk]) -> String {
    let mut len = 0usize;
    for c in chunks {
        let start = c.start_offset.max(0) as usize;
        len = len.max(start + c.content.len());
    }
    let mut buf = vec![b' '; len];
    for c in chunks {
        let start = c.start_offset.max(0) as usize;
        buf[start..start + c.content.len()].copy_from_slice(c.content.as_bytes());
    }
    match String::from_utf8(buf) {
        Ok(s) => s,
        // Overlapping chunks that split a multi-byte char mid-sequence.
        Err(e) => String::from_utf8_lossy(&e.into_bytes()).into_owned(),
    }
}

/// Collapse whitespace runs to single spaces, keeping a byte-level map back
/// to the original text.
///
/// Returns the normalized string and, for every normalized byte, the
/// `(start, end)` byte range of the original character(s) it came from. A
/// collapsed space covers the entire original whitespace run. Leading and
/// trailing whitespace is dropped.
pub fn normalize_ws(text: &str) -> (String, Vec<(usize, usize)>) {
    let mut out = String::with_capacity(text.len());
    let mut map: Vec<(usize, usize)> = Vec::with_capacity(text.len());
    let mut in_ws = false;

    for (i, c) in text.char_indices() {
        let end = i + c.len_utf8();
        if c.is_whitespace() {
            if in_ws || out.is_empty() {
                // Extend the collapsed space over the whole run.
                if in_ws && !out.is_empty() {
                    if let Some(last) = map.last_mut() {
                        last.1 = end;
                    }
                }
            } else {
                out.push(' ');
                map.push((i, end));
            }
            in_ws = true;
        } else {
            out.push(c);
            for _ in 0..c.len_utf8() {
                map.push((i, end));
            }
            in_ws = false;
        }
    }

    if out.ends_with(' ') {
        out.pop();
        map.pop();
    }

    debug_assert_eq!(out.len(), map.len());
    (out, map)
}

/// Map a normalized byte range back to original byte offsets.
/// Returns None for empty or out-of-bounds ranges.
pub fn denormalize_range(
    map: &[(usize, usize)],
    start: usize,
    end: usize,
) -> Option<(usize, usize)> {
    if start >= end || end > map.len() {
        return None;
    }
    Some((map[start].0, map[end - 1].1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn chunk(index: i32, start: i32, content: &str) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            document_id: Uuid::nil(),
            generation: 1,
            chunk_index: index,
            start_offset: start,
            end_offset: start + content.len() as i32,
            content: content.to_string(),
            embedding: None,
            is_current: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_assemble_contiguous_chunks() {
        let chunks = vec![chunk(0, 0, "hello "), chunk(1, 6, "world")];
        assert_eq!(assemble_text(&chunks), "hello world");
    }

    #[test]
    fn test_assemble_with_gap() {
        let chunks = vec![chunk(0, 0, "alpha"), chunk(1, 7, "beta")];
        assert_eq!(assemble_text(&chunks), "alpha  beta");
    }

    #[test]
    fn test_assemble_empty() {
        assert_eq!(assemble_text(&[]), "");
    }

    #[test]
    fn test_normalize_collapses_runs() {
        let (norm, _) = normalize_ws("a  b\t\nc");
        assert_eq!(norm, "a b c");
    }

    #[test]
    fn test_normalize_trims_edges() {
        let (norm, _) = normalize_ws("  padded  ");
        assert_eq!(norm, "padded");
    }

    #[test]
    fn test_denormalize_round_trip() {
        let original = "the  panopticon \n disciplines";
        let (norm, map) = normalize_ws(original);
        assert_eq!(norm, "the panopticon disciplines");

        let nstart = norm.find("panopticon").unwrap();
        let nend = nstart + "panopticon".len();
        let (ostart, oend) = denormalize_range(&map, nstart, nend).unwrap();
        assert_eq!(&original[ostart..oend], "panopticon");
    }

    #[test]
    fn test_denormalize_span_covering_collapsed_run() {
        let original = "alpha \t beta";
        let (norm, map) = normalize_ws(original);
        assert_eq!(norm, "alpha beta");
        let (ostart, oend) = denormalize_range(&map, 0, norm.len()).unwrap();
        assert_eq!(&original[ostart..oend], original);
    }

    #[test]
    fn test_denormalize_rejects_bad_range() {
        let (_, map) = normalize_ws("abc");
        assert!(denormalize_range(&map, 2, 2).is_none());
        assert!(denormalize_range(&map, 0, 99).is_none());
    }

    #[test]
    fn test_normalize_multibyte() {
        let original = "café\u{a0}au lait";
        let (norm, map) = normalize_ws(original);
        assert_eq!(norm, "café au lait");
        let (ostart, oend) = denormalize_range(&map, 0, "café".len()).unwrap();
        assert_eq!(&original[ostart..oend], "café");
    }
}

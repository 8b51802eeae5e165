//! Embedding similarity for connection endpoint resolution.
//!
//! A remap run compares every old endpoint embedding against the new
//! generation's chunk embeddings. Generations are small enough that a linear
//! scan beats shipping the comparison back to the database.

use pgvector::Vector;
use uuid::Uuid;

use palimpsest_core::Chunk;

/// Cosine similarity of two embeddings. Zero-magnitude or mismatched-length
/// inputs score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// In-memory index over one generation's chunk embeddings.
pub struct SimilarityIndex {
    entries: Vec<(Uuid, Vector)>,
}

impl SimilarityIndex {
    /// Build from a chunk set, skipping chunks without embeddings.
    pub fn build(chunks: &[Chunk]) -> Self {
        let entries = chunks
            .iter()
            .filter_map(|c| c.embedding.as_ref().map(|e| (c.id, e.clone())))
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Most similar chunk to `embedding`, with its cosine score.
    pub fn best_match(&self, embedding: &[f32]) -> Option<(Uuid, f32)> {
        let mut best: Option<(Uuid, f32)> = None;
        for (id, candidate) in &self.entries {
            let score = cosine_similarity(embedding, candidate.as_slice());
            match best {
                Some((_, b)) if score <= b => {}
                _ => best = Some((*id, score)),
            }
        }
        best
    }
}

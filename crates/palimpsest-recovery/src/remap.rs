//! Connection endpoint remapping after re-extraction.
//!
//! Old chunk ids die with their generation, so every validated connection
//! touching the reprocessed document must have its endpoints re-resolved
//! against the new generation by embedding similarity. Endpoints living in
//! other documents are untouched and count as perfectly preserved.

use std::collections::{HashMap, HashSet};

use pgvector::Vector;
use tracing::{debug, info};
use uuid::Uuid;

use palimpsest_core::defaults::ENDPOINT_ACCEPT_FLOOR;
use palimpsest_core::{
    classify_similarity, Connection, ConnectionRecoveryResults, ConnectionRemap, RecoveryTier,
    RemapProvenance,
};

use crate::similarity::SimilarityIndex;

/// Everything needed to resolve endpoints for one reprocessed document.
pub struct EndpointContext<'a> {
    /// Chunk ids of the superseded generation. Endpoints outside this set
    /// belong to unedited documents.
    pub old_chunk_ids: &'a HashSet<Uuid>,
    /// Embeddings of the superseded generation's chunks.
    pub old_embeddings: &'a HashMap<Uuid, Vector>,
    /// Index over the new generation's embeddings.
    pub index: &'a SimilarityIndex,
}

/// One endpoint after resolution.
#[derive(Debug, Clone, Copy)]
pub struct EndpointResolution {
    /// Replacement chunk id, when the endpoint moved and a candidate cleared
    /// the acceptance floor.
    pub new_chunk_id: Option<Uuid>,
    pub similarity: f32,
}

/// Resolve one endpoint of a connection.
///
/// An endpoint in an unedited document resolves to itself with similarity
/// 1.0. An endpoint in the superseded generation resolves to the most
/// similar new chunk, or to nothing when the best candidate falls below the
/// acceptance floor or the old embedding is missing.
pub fn resolve_endpoint(chunk_id: Uuid, ctx: &EndpointContext<'_>) -> EndpointResolution {
    if !ctx.old_chunk_ids.contains(&chunk_id) {
        return EndpointResolution {
            new_chunk_id: None,
            similarity: 1.0,
        };
    }
    let Some(embedding) = ctx.old_embeddings.get(&chunk_id) else {
        return EndpointResolution {
            new_chunk_id: None,
            similarity: 0.0,
        };
    };
    match ctx.index.best_match(embedding.as_slice()) {
        Some((id, score)) if score >= ENDPOINT_ACCEPT_FLOOR => EndpointResolution {
            new_chunk_id: Some(id),
            similarity: score,
        },
        Some((_, score)) => EndpointResolution {
            new_chunk_id: None,
            similarity: score,
        },
        None => EndpointResolution {
            new_chunk_id: None,
            similarity: 0.0,
        },
    }
}

/// Remap one connection. The connection's tier is decided by the weaker of
/// its two endpoints; a lost connection keeps its original endpoints and
/// only records the observed similarity.
pub fn remap_connection(connection: &Connection, ctx: &EndpointContext<'_>) -> ConnectionRemap {
    let source = resolve_endpoint(connection.source_chunk_id, ctx);
    let target = resolve_endpoint(connection.target_chunk_id, ctx);

    let source_moved = ctx.old_chunk_ids.contains(&connection.source_chunk_id);
    let target_moved = ctx.old_chunk_ids.contains(&connection.target_chunk_id);
    let unresolved = (source_moved && source.new_chunk_id.is_none())
        || (target_moved && target.new_chunk_id.is_none());

    let min_similarity = source.similarity.min(target.similarity);
    let tier = if unresolved {
        RecoveryTier::Lost
    } else {
        classify_similarity(min_similarity)
    };

    let provenance = match tier {
        RecoveryTier::Success => RemapProvenance::Remapped { min_similarity },
        RecoveryTier::NeedsReview => RemapProvenance::NeedsReview { min_similarity },
        RecoveryTier::Lost => RemapProvenance::Lost { min_similarity },
    };

    // A lost connection never changes endpoints.
    let (new_source, new_target) = if tier == RecoveryTier::Lost {
        (None, None)
    } else {
        (source.new_chunk_id, target.new_chunk_id)
    };

    ConnectionRemap {
        connection_id: connection.id,
        new_source_chunk_id: new_source,
        new_target_chunk_id: new_target,
        source_similarity: source.similarity,
        target_similarity: target.similarity,
        min_similarity,
        tier,
        provenance,
    }
}

/// Remap every validated connection touching the reprocessed document.
pub fn remap_connections(
    connections: &[Connection],
    ctx: &EndpointContext<'_>,
) -> ConnectionRecoveryResults {
    let mut results = ConnectionRecoveryResults::default();
    for connection in connections {
        let remap = remap_connection(connection, ctx);
        debug!(
            connection_id = %connection.id,
            min_similarity = remap.min_similarity,
            tier = remap.tier.as_str(),
            "Connection remapped"
        );
        match remap.tier {
            RecoveryTier::Success => results.success.push(remap),
            RecoveryTier::NeedsReview => results.needs_review.push(remap),
            RecoveryTier::Lost => results.lost.push(remap),
        }
    }
    if !connections.is_empty() {
        info!(
            total = results.total(),
            success = results.success.len(),
            needs_review = results.needs_review.len(),
            lost = results.lost.len(),
            recovery_rate = results.recovery_rate(),
            "Connection remapping complete"
        );
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use palimpsest_core::Chunk;

    fn chunk_with_embedding(embedding: Vec<f32>) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            document_id: Uuid::nil(),
            generation: 2,
            chunk_index: 0,
            start_offset: 0,
            end_offset: 0,
            content: String::new(),
            embedding: Some(Vector::from(embedding)),
            is_current: false,
            created_at: Utc::now(),
        }
    }

    fn connection(source: Uuid, target: Uuid) -> Connection {
        Connection {
            id: Uuid::new_v4(),
            source_chunk_id: source,
            target_chunk_id: target,
            engine_type: "thematic".to_string(),
            strength: 0.8,
            user_validated: true,
            provenance: None,
            created_at: Utc::now(),
        }
    }

    struct Fixture {
        old_chunk_ids: HashSet<Uuid>,
        old_embeddings: HashMap<Uuid, Vector>,
        index: SimilarityIndex,
    }

    impl Fixture {
        /// One old chunk with `old` as its embedding, one new chunk with
        /// `new`. The observed endpoint similarity is their cosine.
        fn new(old: Vec<f32>, new: Vec<f32>) -> (Self, Uuid, Uuid) {
            let old_id = Uuid::new_v4();
            let mut old_chunk_ids = HashSet::new();
            old_chunk_ids.insert(old_id);
            let mut old_embeddings = HashMap::new();
            old_embeddings.insert(old_id, Vector::from(old));
            let new_chunk = chunk_with_embedding(new);
            let new_id = new_chunk.id;
            let index = SimilarityIndex::build(&[new_chunk]);
            (
                Fixture {
                    old_chunk_ids,
                    old_embeddings,
                    index,
                },
                old_id,
                new_id,
            )
        }

        fn ctx(&self) -> EndpointContext<'_> {
            EndpointContext {
                old_chunk_ids: &self.old_chunk_ids,
                old_embeddings: &self.old_embeddings,
                index: &self.index,
            }
        }
    }

    #[test]
    fn test_high_similarity_connection_is_remapped() {
        let (fixture, old_id, new_id) =
            Fixture::new(vec![1.0, 0.0, 0.0], vec![0.999, 0.01, 0.0]);
        let other_doc_chunk = Uuid::new_v4();
        let conn = connection(old_id, other_doc_chunk);

        let remap = remap_connection(&conn, &fixture.ctx());
        assert_eq!(remap.tier, RecoveryTier::Success);
        assert_eq!(remap.new_source_chunk_id, Some(new_id));
        assert_eq!(remap.new_target_chunk_id, None);
        assert!(matches!(remap.provenance, RemapProvenance::Remapped { .. }));
        assert!((remap.target_similarity - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_moderate_similarity_needs_review() {
        // Cosine of these two is about 0.9, inside the review band.
        let (fixture, old_id, new_id) = Fixture::new(vec![1.0, 0.0], vec![0.9, 0.436]);
        let conn = connection(old_id, Uuid::new_v4());

        let remap = remap_connection(&conn, &fixture.ctx());
        assert_eq!(remap.tier, RecoveryTier::NeedsReview);
        assert_eq!(remap.new_source_chunk_id, Some(new_id));
        assert!(matches!(
            remap.provenance,
            RemapProvenance::NeedsReview { .. }
        ));
    }

    #[test]
    fn test_dissimilar_endpoint_loses_connection_without_rewrite() {
        // Best candidate scores about 0.4; the connection is lost and
        // endpoints stay as they were, with the similarity kept for audit.
        let (fixture, old_id, _) = Fixture::new(vec![1.0, 0.0], vec![0.4, 0.917]);
        let conn = connection(old_id, Uuid::new_v4());

        let remap = remap_connection(&conn, &fixture.ctx());
        assert_eq!(remap.tier, RecoveryTier::Lost);
        assert_eq!(remap.new_source_chunk_id, None);
        assert_eq!(remap.new_target_chunk_id, None);
        match remap.provenance {
            RemapProvenance::Lost { min_similarity } => {
                assert!((min_similarity - 0.4).abs() < 0.01)
            }
            other => panic!("expected lost provenance, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_old_embedding_loses_connection() {
        let (mut fixture, old_id, _) = Fixture::new(vec![1.0, 0.0], vec![1.0, 0.0]);
        fixture.old_embeddings.clear();
        let conn = connection(old_id, Uuid::new_v4());

        let remap = remap_connection(&conn, &fixture.ctx());
        assert_eq!(remap.tier, RecoveryTier::Lost);
        assert_eq!(remap.source_similarity, 0.0);
    }

    #[test]
    fn test_tier_follows_weaker_endpoint() {
        // Both endpoints live in the reprocessed document. One resolves
        // perfectly, the other into the review band; min(src, tgt) decides.
        let strong_old = Uuid::new_v4();
        let weak_old = Uuid::new_v4();
        let mut old_chunk_ids = HashSet::new();
        old_chunk_ids.insert(strong_old);
        old_chunk_ids.insert(weak_old);
        let mut old_embeddings = HashMap::new();
        old_embeddings.insert(strong_old, Vector::from(vec![1.0, 0.0]));
        old_embeddings.insert(weak_old, Vector::from(vec![0.9, 0.436]));
        let new_chunk = chunk_with_embedding(vec![1.0, 0.0]);
        let index = SimilarityIndex::build(&[new_chunk]);
        let ctx = EndpointContext {
            old_chunk_ids: &old_chunk_ids,
            old_embeddings: &old_embeddings,
            index: &index,
        };

        let remap = remap_connection(&connection(strong_old, weak_old), &ctx);
        assert_eq!(remap.tier, RecoveryTier::NeedsReview);
        assert!(remap.source_similarity > remap.target_similarity);
        assert!((remap.min_similarity - remap.target_similarity).abs() < f32::EPSILON);
    }

    #[test]
    fn test_partition_completeness() {
        let (fixture, old_id, _) = Fixture::new(vec![1.0, 0.0], vec![1.0, 0.0]);
        let connections = vec![
            connection(old_id, Uuid::new_v4()),
            connection(Uuid::new_v4(), old_id),
            connection(Uuid::new_v4(), Uuid::new_v4()),
        ];
        let results = remap_connections(&connections, &fixture.ctx());
        assert_eq!(results.total(), connections.len());
        assert_eq!(results.remaps().len(), connections.len());
    }

    #[test]
    fn test_untouched_endpoints_are_fully_preserved() {
        let (fixture, _, _) = Fixture::new(vec![1.0], vec![1.0]);
        let conn = connection(Uuid::new_v4(), Uuid::new_v4());
        let remap = remap_connection(&conn, &fixture.ctx());
        assert_eq!(remap.tier, RecoveryTier::Success);
        assert_eq!(remap.new_source_chunk_id, None);
        assert_eq!(remap.new_target_chunk_id, None);
        assert!((remap.min_similarity - 1.0).abs() < f32::EPSILON);
    }
}

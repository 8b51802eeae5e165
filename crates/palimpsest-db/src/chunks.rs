//! Chunk repository implementation.
//!
//! Chunks are content-addressed and generational: re-extraction inserts a
//! whole new generation rather than mutating rows in place, and a single
//! `is_current` flag per document decides which generation readers see.

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use palimpsest_core::{Chunk, ChunkEmbedding, ChunkRepository, Error, Result};

/// PostgreSQL implementation of ChunkRepository.
pub struct PgChunkRepository {
    pool: Pool<Postgres>,
}

impl PgChunkRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_chunk_row(row: sqlx::postgres::PgRow) -> Chunk {
        Chunk {
            id: row.get("id"),
            document_id: row.get("document_id"),
            generation: row.get("generation"),
            chunk_index: row.get("chunk_index"),
            start_offset: row.get("start_offset"),
            end_offset: row.get("end_offset"),
            content: row.get("content"),
            embedding: row.get::<Option<Vector>, _>("embedding"),
            is_current: row.get("is_current"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl ChunkRepository for PgChunkRepository {
    async fn current_generation(&self, document_id: Uuid) -> Result<Option<i32>> {
        let generation: Option<i32> = sqlx::query_scalar(
            "SELECT generation FROM chunks
             WHERE document_id = $1 AND is_current = TRUE
             LIMIT 1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(generation)
    }

    async fn latest_generation(&self, document_id: Uuid) -> Result<Option<i32>> {
        let generation: Option<i32> =
            sqlx::query_scalar("SELECT MAX(generation) FROM chunks WHERE document_id = $1")
                .bind(document_id)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(generation)
    }

    async fn get_generation(&self, document_id: Uuid, generation: i32) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT id, document_id, generation, chunk_index, start_offset, end_offset,
                    content, embedding, is_current, created_at
             FROM chunks
             WHERE document_id = $1 AND generation = $2
             ORDER BY chunk_index ASC",
        )
        .bind(document_id)
        .bind(generation)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_chunk_row).collect())
    }

    async fn insert_generation(&self, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (id, document_id, generation, chunk_index,
                                     start_offset, end_offset, content, embedding,
                                     is_current, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(chunk.id)
            .bind(chunk.document_id)
            .bind(chunk.generation)
            .bind(chunk.chunk_index)
            .bind(chunk.start_offset)
            .bind(chunk.end_offset)
            .bind(&chunk.content)
            .bind(chunk.embedding.as_ref())
            .bind(chunk.is_current)
            .bind(chunk.created_at)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn lookup_embedding(&self, chunk_id: Uuid) -> Result<Option<ChunkEmbedding>> {
        let row = sqlx::query(
            "SELECT id, document_id, embedding FROM chunks
             WHERE id = $1 AND embedding IS NOT NULL",
        )
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|r| ChunkEmbedding {
            chunk_id: r.get("id"),
            document_id: r.get("document_id"),
            embedding: r.get("embedding"),
        }))
    }

    async fn set_current_generation(&self, document_id: Uuid, generation: i32) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM chunks WHERE document_id = $1 AND generation = $2)",
        )
        .bind(document_id)
        .bind(generation)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        if !exists {
            return Err(Error::NoPendingGeneration(document_id));
        }

        // One statement flips the whole document: the named generation
        // becomes current and every other generation is demoted. Readers
        // never observe zero or two current generations.
        sqlx::query(
            "UPDATE chunks SET is_current = (generation = $2)
             WHERE document_id = $1",
        )
        .bind(document_id)
        .bind(generation)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn delete_superseded(&self, document_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM chunks WHERE document_id = $1 AND is_current = FALSE",
        )
        .bind(document_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }
}

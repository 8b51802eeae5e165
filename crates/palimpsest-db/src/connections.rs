//! Connection repository implementation.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use palimpsest_core::{Connection, ConnectionRemap, ConnectionRepository, Error, Result};

/// PostgreSQL implementation of ConnectionRepository.
pub struct PgConnectionRepository {
    pool: Pool<Postgres>,
}

impl PgConnectionRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_connection_row(row: sqlx::postgres::PgRow) -> Result<Connection> {
        let provenance = row
            .get::<Option<JsonValue>, _>("provenance")
            .map(serde_json::from_value)
            .transpose()?;
        Ok(Connection {
            id: row.get("id"),
            source_chunk_id: row.get("source_chunk_id"),
            target_chunk_id: row.get("target_chunk_id"),
            engine_type: row.get("engine_type"),
            strength: row.get("strength"),
            user_validated: row.get("user_validated"),
            provenance,
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl ConnectionRepository for PgConnectionRepository {
    async fn list_validated_for_document(&self, document_id: Uuid) -> Result<Vec<Connection>> {
        // Endpoint chunks may already be superseded, so the join cannot be
        // restricted to current generations.
        let rows = sqlx::query(
            "SELECT c.id, c.source_chunk_id, c.target_chunk_id, c.engine_type,
                    c.strength, c.user_validated, c.provenance, c.created_at
             FROM connections c
             WHERE c.user_validated = TRUE
               AND EXISTS (
                   SELECT 1 FROM chunks ch
                   WHERE ch.document_id = $1
                     AND ch.id IN (c.source_chunk_id, c.target_chunk_id)
               )
             ORDER BY c.created_at ASC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_connection_row).collect()
    }

    async fn discard_unvalidated_for_document(&self, document_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM connections c
             WHERE c.user_validated = FALSE
               AND EXISTS (
                   SELECT 1 FROM chunks ch
                   WHERE ch.document_id = $1
                     AND ch.id IN (c.source_chunk_id, c.target_chunk_id)
               )",
        )
        .bind(document_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }

    async fn apply_remaps(&self, remaps: &[ConnectionRemap]) -> Result<()> {
        if remaps.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        for remap in remaps {
            // COALESCE keeps an endpoint untouched when no replacement was
            // resolved; provenance is stamped unconditionally.
            sqlx::query(
                "UPDATE connections
                 SET source_chunk_id = COALESCE($1, source_chunk_id),
                     target_chunk_id = COALESCE($2, target_chunk_id),
                     provenance = $3
                 WHERE id = $4",
            )
            .bind(remap.new_source_chunk_id)
            .bind(remap.new_target_chunk_id)
            .bind(serde_json::to_value(remap.provenance)?)
            .bind(remap.connection_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }
}

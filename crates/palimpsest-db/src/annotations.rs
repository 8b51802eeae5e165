//! Annotation repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use palimpsest_core::{
    Annotation, AnnotationOutcome, AnnotationRepository, Error, RecoveryTier, Result,
};

/// PostgreSQL implementation of AnnotationRepository.
pub struct PgAnnotationRepository {
    pool: Pool<Postgres>,
}

impl PgAnnotationRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_annotation_row(row: sqlx::postgres::PgRow) -> Result<Annotation> {
        let suggested_match = row
            .get::<Option<JsonValue>, _>("suggested_match")
            .map(serde_json::from_value)
            .transpose()?;
        Ok(Annotation {
            id: row.get("id"),
            document_id: row.get("document_id"),
            text: row.get("text"),
            start_offset: row.get("start_offset"),
            end_offset: row.get("end_offset"),
            context_before: row.get("context_before"),
            context_after: row.get("context_after"),
            original_chunk_index: row.get("original_chunk_index"),
            recovery_status: row
                .get::<Option<String>, _>("recovery_status")
                .as_deref()
                .and_then(RecoveryTier::parse),
            suggested_match,
            lost_reason: row.get("lost_reason"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl AnnotationRepository for PgAnnotationRepository {
    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<Annotation>> {
        let rows = sqlx::query(
            "SELECT id, document_id, text, start_offset, end_offset, context_before,
                    context_after, original_chunk_index, recovery_status, suggested_match,
                    lost_reason, created_at, updated_at
             FROM annotations
             WHERE document_id = $1
             ORDER BY created_at ASC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_annotation_row).collect()
    }

    async fn apply_outcomes(&self, outcomes: &[AnnotationOutcome]) -> Result<()> {
        if outcomes.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        for outcome in outcomes {
            match outcome.tier {
                RecoveryTier::Success => {
                    // Offsets are rewritten in place and the annotation stays
                    // live; the match itself is authoritative.
                    let matched = outcome.matched.as_ref().ok_or_else(|| {
                        Error::Recovery(format!(
                            "Success outcome without a match for annotation {}",
                            outcome.annotation_id
                        ))
                    })?;
                    sqlx::query(
                        "UPDATE annotations
                         SET text = $1, start_offset = $2, end_offset = $3,
                             recovery_status = 'success', suggested_match = NULL,
                             lost_reason = NULL, updated_at = $4
                         WHERE id = $5",
                    )
                    .bind(&matched.text)
                    .bind(matched.start_offset)
                    .bind(matched.end_offset)
                    .bind(now)
                    .bind(outcome.annotation_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(Error::Database)?;
                }
                RecoveryTier::NeedsReview => {
                    // The old span is kept; the candidate is stored for the
                    // user to confirm or reject.
                    let matched = outcome.matched.as_ref().ok_or_else(|| {
                        Error::Recovery(format!(
                            "Review outcome without a match for annotation {}",
                            outcome.annotation_id
                        ))
                    })?;
                    sqlx::query(
                        "UPDATE annotations
                         SET recovery_status = 'needs_review', suggested_match = $1,
                             lost_reason = NULL, updated_at = $2
                         WHERE id = $3",
                    )
                    .bind(serde_json::to_value(matched)?)
                    .bind(now)
                    .bind(outcome.annotation_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(Error::Database)?;
                }
                RecoveryTier::Lost => {
                    sqlx::query(
                        "UPDATE annotations
                         SET recovery_status = 'lost', suggested_match = NULL,
                             lost_reason = $1, updated_at = $2
                         WHERE id = $3",
                    )
                    .bind(outcome.lost_reason.as_deref().unwrap_or("No match found"))
                    .bind(now)
                    .bind(outcome.annotation_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(Error::Database)?;
                }
            }
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }
}

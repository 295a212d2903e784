use chrono::{DateTime, Utc};
use sift_core::error::AppError;
use sift_core::ledger::{IGNORE_AT_RETRY_COUNT, MAX_RETRY_COUNT, UNRECOVERABLE_ERROR_MESSAGES};
use sift_core::models::{FailedRecord, NewFailure, RetryCandidate};
use sift_core::traits::FailureLedger;
use sqlx::{PgPool, Pool, Postgres};

/// Failure ledger in the `failed` table, one row per natural key.
#[derive(Clone)]
pub struct FailedRepository {
    pool: Pool<Postgres>,
}

impl FailedRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct FailedRow {
    id_product_smi: String,
    url: String,
    offer_id: i64,
    error_message: String,
    retry_count: i32,
    resolved: bool,
    ignore: bool,
    id_product: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<FailedRow> for FailedRecord {
    fn from(row: FailedRow) -> Self {
        FailedRecord {
            natural_key: row.id_product_smi,
            url: row.url,
            offer_id: row.offer_id,
            error_message: row.error_message,
            retry_count: u32::try_from(row.retry_count).unwrap_or(0),
            resolved: row.resolved,
            ignore: row.ignore,
            id_product: row.id_product,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CandidateRow {
    url: String,
    id_product_smi: String,
    offer_id: i64,
}

impl From<CandidateRow> for RetryCandidate {
    fn from(row: CandidateRow) -> Self {
        RetryCandidate {
            url: row.url,
            natural_key: row.id_product_smi,
            offer_id: row.offer_id,
        }
    }
}

impl FailureLedger for FailedRepository {
    async fn record_failure(&self, failure: &NewFailure) -> Result<FailedRecord, AppError> {
        let row = sqlx::query_as::<_, FailedRow>(
            r#"
            INSERT INTO failed (id_product_smi, url, offer_id, error_message, id_product)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id_product_smi) DO UPDATE SET
                error_message = EXCLUDED.error_message,
                retry_count = failed.retry_count + 1,
                id_product = COALESCE(EXCLUDED.id_product, failed.id_product),
                updated_at = NOW()
            RETURNING id_product_smi, url, offer_id, error_message, retry_count,
                      resolved, ignore, id_product, created_at, updated_at
            "#,
        )
        .bind(&failure.natural_key)
        .bind(&failure.url)
        .bind(failure.offer_id)
        .bind(&failure.error_message)
        .bind(&failure.id_product)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.into())
    }

    async fn get_failure(&self, natural_key: &str) -> Result<Option<FailedRecord>, AppError> {
        let row = sqlx::query_as::<_, FailedRow>(
            r#"
            SELECT id_product_smi, url, offer_id, error_message, retry_count,
                   resolved, ignore, id_product, created_at, updated_at
            FROM failed
            WHERE id_product_smi = $1
            "#,
        )
        .bind(natural_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn mark_resolved(&self) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE failed f
            SET resolved = TRUE, updated_at = NOW()
            WHERE f.resolved = FALSE
              AND EXISTS (SELECT 1 FROM products p WHERE p.id_product_smi = f.id_product_smi)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn apply_ignore_policy(&self) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE failed
            SET ignore = TRUE, updated_at = NOW()
            WHERE ignore = FALSE
              AND (error_message = ANY($1) OR retry_count >= $2 OR resolved = TRUE)
            "#,
        )
        .bind(UNRECOVERABLE_ERROR_MESSAGES)
        .bind(IGNORE_AT_RETRY_COUNT as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn retry_candidates(
        &self,
        denied_offer_ids: &[i64],
        limit: usize,
    ) -> Result<Vec<RetryCandidate>, AppError> {
        let rows = sqlx::query_as::<_, CandidateRow>(
            r#"
            SELECT url, id_product_smi, offer_id
            FROM failed
            WHERE resolved = FALSE
              AND ignore = FALSE
              AND retry_count <= $1
              AND NOT (offer_id = ANY($2))
            ORDER BY created_at ASC, id ASC
            LIMIT $3
            "#,
        )
        .bind(MAX_RETRY_COUNT as i32)
        .bind(denied_offer_ids)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

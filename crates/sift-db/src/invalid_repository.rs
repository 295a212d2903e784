use chrono::{DateTime, Utc};
use sift_core::error::AppError;
use sift_core::models::{InvalidRecord, NewInvalid};
use sift_core::traits::InvalidStore;
use sqlx::{PgPool, Pool, Postgres};

/// Terminal classifications, at most one per natural key and offer.
#[derive(Clone)]
pub struct InvalidRepository {
    pool: Pool<Postgres>,
}

impl InvalidRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct InvalidRow {
    id_product_smi: String,
    offer_id: i64,
    url: String,
    reason: String,
    created_at: DateTime<Utc>,
}

impl From<InvalidRow> for InvalidRecord {
    fn from(row: InvalidRow) -> Self {
        InvalidRecord {
            natural_key: row.id_product_smi,
            offer_id: row.offer_id,
            url: row.url,
            reason: row.reason,
            created_at: row.created_at,
        }
    }
}

impl InvalidStore for InvalidRepository {
    async fn record_invalid(&self, invalid: &NewInvalid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO invalid (id_product_smi, offer_id, url, reason)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id_product_smi, offer_id) DO NOTHING
            "#,
        )
        .bind(&invalid.natural_key)
        .bind(invalid.offer_id)
        .bind(&invalid.url)
        .bind(&invalid.reason)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn list_invalid(&self, natural_key: &str) -> Result<Vec<InvalidRecord>, AppError> {
        let rows = sqlx::query_as::<_, InvalidRow>(
            r#"
            SELECT id_product_smi, offer_id, url, reason, created_at
            FROM invalid
            WHERE id_product_smi = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(natural_key)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

use std::time::Duration;

use sift_core::broker::{Broker, Delivery};
use sift_core::error::AppError;
use sqlx::{PgPool, Pool, Postgres};

/// Claim duration after which an unacknowledged delivery is redelivered.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(15 * 60);

/// Message broker over the `queue_messages` table.
///
/// Delivery claims ready rows with `SELECT FOR UPDATE SKIP LOCKED`, so
/// concurrent consumers never receive the same message. Acknowledgment
/// deletes the row; a requeueing nack makes it ready again. A delivery
/// left unacknowledged past the lease is claimable again by any consumer.
#[derive(Clone)]
pub struct PgBroker {
    pool: Pool<Postgres>,
    lease: Duration,
}

impl PgBroker {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease: DEFAULT_LEASE,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Number of ready (undelivered) messages in `queue`.
    pub async fn ready_count(&self, queue: &str) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"SELECT COUNT(*) FROM queue_messages WHERE queue = $1 AND status = 'ready'"#,
        )
        .bind(queue)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::BrokerError(e.to_string()))?;

        Ok(count)
    }
}

#[derive(sqlx::FromRow)]
struct DeliveryRow {
    id: i64,
    queue: String,
    payload: serde_json::Value,
    delivery_count: i32,
}

impl From<DeliveryRow> for Delivery {
    fn from(row: DeliveryRow) -> Self {
        Delivery {
            id: row.id,
            queue: row.queue,
            payload: row.payload,
            delivery_count: u32::try_from(row.delivery_count).unwrap_or(0),
        }
    }
}

impl Broker for PgBroker {
    async fn publish(&self, queue: &str, payload: &serde_json::Value) -> Result<i64, AppError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO queue_messages (queue, payload)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(queue)
        .bind(payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::BrokerError(e.to_string()))?;

        Ok(id)
    }

    async fn receive(
        &self,
        queue: &str,
        consumer: &str,
        max: usize,
    ) -> Result<Vec<Delivery>, AppError> {
        let mut rows = sqlx::query_as::<_, DeliveryRow>(
            r#"
            UPDATE queue_messages
            SET status = 'delivered', consumer = $2,
                delivery_count = delivery_count + 1, delivered_at = NOW()
            WHERE id IN (
                SELECT id FROM queue_messages
                WHERE queue = $1
                  AND (status = 'ready'
                       OR (status = 'delivered'
                           AND delivered_at < NOW() - make_interval(secs => $4)))
                ORDER BY id
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, queue, payload, delivery_count
            "#,
        )
        .bind(queue)
        .bind(consumer)
        .bind(i64::try_from(max).unwrap_or(i64::MAX))
        .bind(self.lease.as_secs_f64())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::BrokerError(e.to_string()))?;

        // RETURNING does not preserve the subquery order.
        rows.sort_by_key(|r| r.id);
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn ack(&self, delivery_id: i64) -> Result<(), AppError> {
        sqlx::query(r#"DELETE FROM queue_messages WHERE id = $1"#)
            .bind(delivery_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::BrokerError(e.to_string()))?;

        Ok(())
    }

    async fn nack(&self, delivery_id: i64, requeue: bool) -> Result<(), AppError> {
        let query = if requeue {
            r#"
            UPDATE queue_messages
            SET status = 'ready', consumer = NULL, delivered_at = NULL
            WHERE id = $1 AND status = 'delivered'
            "#
        } else {
            r#"DELETE FROM queue_messages WHERE id = $1"#
        };

        sqlx::query(query)
            .bind(delivery_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::BrokerError(e.to_string()))?;

        Ok(())
    }

    async fn recover(&self, queue: &str, consumer: &str) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET status = 'ready', consumer = NULL, delivered_at = NULL
            WHERE queue = $1 AND consumer = $2 AND status = 'delivered'
            "#,
        )
        .bind(queue)
        .bind(consumer)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::BrokerError(e.to_string()))?;

        if result.rows_affected() > 0 {
            tracing::info!(%queue, %consumer, recovered = result.rows_affected(), "Recovered unacknowledged deliveries");
        }
        Ok(result.rows_affected())
    }
}

use request_relay_core::transport::{TransportFuture, poison_queue_name};
use request_relay_core::{DeliveryReceipt, LeasedMessage, QueueError, QueueTransport};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;
use uuid::Uuid;

/// `PostgreSQL`-backed lease queue.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone, Debug)]
pub struct PostgresQueue {
    pool: PgPool,
}

/// The row a receipt refers to, if the receipt is well-formed.
fn lease_key(receipt: &DeliveryReceipt) -> Result<(i64, Uuid), QueueError> {
    let lease_lost = || QueueError::LeaseLost {
        queue: receipt.queue().to_string(),
        message_id: receipt.message_id().to_string(),
    };

    let id = receipt.message_id().parse::<i64>().map_err(|_| lease_lost())?;
    let token = Uuid::parse_str(receipt.lease_token()).map_err(|_| lease_lost())?;
    Ok((id, token))
}

impl PostgresQueue {
    /// Connect to `database_url` with a pool of at most `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConnectionFailed`] if the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, QueueError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| QueueError::ConnectionFailed(format!("Failed to connect: {e}")))?;

        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the queue tables if they don't already exist.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConnectionFailed`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), QueueError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| QueueError::ConnectionFailed(format!("Migration failed: {e}")))?;

        tracing::info!("Queue tables migrated");
        Ok(())
    }

    /// Number of messages on `queue`, leased or not.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::DequeueFailed`] if the query fails.
    pub async fn depth(&self, queue: &str) -> Result<i64, QueueError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queue_messages WHERE queue = $1")
            .bind(queue)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| QueueError::DequeueFailed {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;

        Ok(count)
    }
}

impl QueueTransport for PostgresQueue {
    fn enqueue(&self, queue: &str, body: &[u8]) -> TransportFuture<'_, ()> {
        let queue = queue.to_string();
        let body = body.to_vec();

        Box::pin(async move {
            sqlx::query("INSERT INTO queue_messages (queue, body) VALUES ($1, $2)")
                .bind(&queue)
                .bind(&body)
                .execute(&self.pool)
                .await
                .map_err(|e| QueueError::EnqueueFailed {
                    queue: queue.clone(),
                    reason: e.to_string(),
                })?;

            tracing::debug!(queue = %queue, bytes = body.len(), "Message enqueued");
            Ok(())
        })
    }

    fn dequeue_lease(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> TransportFuture<'_, Option<LeasedMessage>> {
        let queue = queue.to_string();

        Box::pin(async move {
            let token = Uuid::new_v4();

            let row = sqlx::query(
                r"
                UPDATE queue_messages
                SET visible_at = now() + make_interval(secs => $2),
                    delivery_count = delivery_count + 1,
                    lease_token = $3
                WHERE id = (
                    SELECT id
                    FROM queue_messages
                    WHERE queue = $1 AND visible_at <= now()
                    ORDER BY id
                    FOR UPDATE SKIP LOCKED
                    LIMIT 1
                )
                RETURNING id, body, delivery_count
                ",
            )
            .bind(&queue)
            .bind(visibility_timeout.as_secs_f64())
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| QueueError::DequeueFailed {
                queue: queue.clone(),
                reason: e.to_string(),
            })?;

            let Some(row) = row else {
                return Ok(None);
            };

            let id: i64 = row.get("id");
            let delivery_count: i32 = row.get("delivery_count");

            Ok(Some(LeasedMessage {
                receipt: DeliveryReceipt::new(
                    queue,
                    id.to_string(),
                    token.to_string(),
                    u32::try_from(delivery_count).unwrap_or_default(),
                ),
                body: row.get("body"),
            }))
        })
    }

    fn acknowledge(&self, receipt: &DeliveryReceipt) -> TransportFuture<'_, ()> {
        let receipt = receipt.clone();

        Box::pin(async move {
            let (id, token) = lease_key(&receipt)?;

            let result = sqlx::query("DELETE FROM queue_messages WHERE id = $1 AND lease_token = $2")
                .bind(id)
                .bind(token)
                .execute(&self.pool)
                .await
                .map_err(|e| QueueError::AcknowledgeFailed {
                    queue: receipt.queue().to_string(),
                    reason: e.to_string(),
                })?;

            if result.rows_affected() == 0 {
                return Err(QueueError::LeaseLost {
                    queue: receipt.queue().to_string(),
                    message_id: receipt.message_id().to_string(),
                });
            }
            Ok(())
        })
    }

    fn dead_letter(&self, receipt: &DeliveryReceipt, body: &[u8]) -> TransportFuture<'_, ()> {
        let receipt = receipt.clone();
        let body = body.to_vec();

        Box::pin(async move {
            let (id, token) = lease_key(&receipt)?;
            let failed = |e: sqlx::Error| QueueError::DeadLetterFailed {
                queue: receipt.queue().to_string(),
                reason: e.to_string(),
            };

            let mut tx = self.pool.begin().await.map_err(failed)?;

            let removed = sqlx::query(
                r"
                DELETE FROM queue_messages
                WHERE id = $1 AND lease_token = $2
                RETURNING delivery_count, enqueued_at
                ",
            )
            .bind(id)
            .bind(token)
            .fetch_optional(&mut *tx)
            .await
            .map_err(failed)?;

            let Some(removed) = removed else {
                return Err(QueueError::LeaseLost {
                    queue: receipt.queue().to_string(),
                    message_id: receipt.message_id().to_string(),
                });
            };

            let delivery_count: i32 = removed.get("delivery_count");
            let enqueued_at: chrono::DateTime<chrono::Utc> = removed.get("enqueued_at");

            sqlx::query(
                r"
                INSERT INTO dead_letter_messages (
                    queue, source_queue, message_id, body, delivery_count, enqueued_at
                ) VALUES ($1, $2, $3, $4, $5, $6)
                ",
            )
            .bind(poison_queue_name(receipt.queue()))
            .bind(receipt.queue())
            .bind(id)
            .bind(&body)
            .bind(delivery_count)
            .bind(enqueued_at)
            .execute(&mut *tx)
            .await
            .map_err(failed)?;

            tx.commit().await.map_err(failed)?;

            tracing::warn!(
                queue = %receipt.queue(),
                message_id = id,
                delivery_count,
                "Message moved to dead-letter table"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_receipt_is_lease_lost() {
        let receipt = DeliveryReceipt::new("request_open", "not-a-number", Uuid::new_v4().to_string(), 1);
        assert!(matches!(lease_key(&receipt), Err(QueueError::LeaseLost { .. })));

        let receipt = DeliveryReceipt::new("request_open", "42", "not-a-uuid", 1);
        assert!(matches!(lease_key(&receipt), Err(QueueError::LeaseLost { .. })));
    }

    #[test]
    fn well_formed_receipt_parses() {
        let token = Uuid::new_v4();
        let receipt = DeliveryReceipt::new("request_open", "42", token.to_string(), 3);
        assert_eq!(lease_key(&receipt), Ok((42, token)));
    }
}

//! Inspection of dead-lettered messages.
//!
//! Messages the processor could never handle end up in
//! `dead_letter_messages`, keyed by their poison queue name. Operators read
//! them back from here for incident response and manual replay.

use crate::PostgresQueue;
use chrono::{DateTime, Utc};
use request_relay_core::QueueError;
use request_relay_core::transport::poison_queue_name;
use sqlx::Row;

/// A message moved to a poison queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// Unique identifier for this dead-letter entry
    pub id: i64,
    /// Poison queue name (`<source_queue>-poison`)
    pub queue: String,
    /// Queue the message was leased from
    pub source_queue: String,
    /// Identifier the message had on its source queue
    pub message_id: i64,
    /// Message body, exactly as stored on the source queue
    pub body: Vec<u8>,
    /// Deliveries made before the message was dead-lettered
    pub delivery_count: i32,
    /// When the message was originally enqueued
    pub enqueued_at: DateTime<Utc>,
    /// When the message was dead-lettered
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetter {
    fn from_row(row: &sqlx::postgres::PgRow) -> Self {
        Self {
            id: row.get("id"),
            queue: row.get("queue"),
            source_queue: row.get("source_queue"),
            message_id: row.get("message_id"),
            body: row.get("body"),
            delivery_count: row.get("delivery_count"),
            enqueued_at: row.get("enqueued_at"),
            dead_lettered_at: row.get("dead_lettered_at"),
        }
    }
}

impl PostgresQueue {
    /// List messages dead-lettered from `source_queue`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::DequeueFailed`] if the query fails.
    pub async fn list_dead_letters(
        &self,
        source_queue: &str,
        limit: u32,
    ) -> Result<Vec<DeadLetter>, QueueError> {
        let rows = sqlx::query(
            r"
            SELECT
                id, queue, source_queue, message_id, body,
                delivery_count, enqueued_at, dead_lettered_at
            FROM dead_letter_messages
            WHERE queue = $1
            ORDER BY dead_lettered_at ASC, id ASC
            LIMIT $2
            ",
        )
        .bind(poison_queue_name(source_queue))
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(|e| QueueError::DequeueFailed {
            queue: poison_queue_name(source_queue),
            reason: e.to_string(),
        })?;

        Ok(rows.iter().map(DeadLetter::from_row).collect())
    }

    /// Count messages dead-lettered from `source_queue`.
    ///
    /// Useful for monitoring and health checks.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::DequeueFailed`] if the query fails.
    pub async fn count_dead_letters(&self, source_queue: &str) -> Result<i64, QueueError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM dead_letter_messages WHERE queue = $1")
                .bind(poison_queue_name(source_queue))
                .fetch_one(self.pool())
                .await
                .map_err(|e| QueueError::DequeueFailed {
                    queue: poison_queue_name(source_queue),
                    reason: e.to_string(),
                })?;

        Ok(count)
    }
}

//! Work queue storage with visibility timeouts.

use std::time::Duration;

use crate::{Error, Result};

use super::{Database, QueueItemRow};

impl Database {
    /// Append an item to a topic, immediately visible
    pub async fn enqueue_item(&self, topic: &str, payload: &str) -> Result<i64> {
        let now = chrono::Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO queue_items (topic, payload, deliveries, visible_at, created_at)
            VALUES (?, ?, 0, ?, ?)
            "#,
        )
        .bind(topic)
        .bind(payload)
        .bind(now.timestamp_millis())
        .bind(now.timestamp())
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(result.last_insert_rowid())
    }

    /// Claim the oldest visible item on a topic
    ///
    /// Selection and the visibility bump happen in one statement, so two
    /// consumers can never claim the same delivery. Items that already reached
    /// `max_deliveries` are skipped.
    pub async fn claim_item(
        &self,
        topic: &str,
        visibility_timeout: Duration,
        max_deliveries: u32,
    ) -> Result<Option<QueueItemRow>> {
        let now = chrono::Utc::now().timestamp_millis();
        let hidden_until = now.saturating_add(visibility_timeout.as_millis() as i64);

        let row = sqlx::query_as::<_, QueueItemRow>(
            r#"
            UPDATE queue_items
            SET deliveries = deliveries + 1,
                visible_at = ?
            WHERE id = (
                SELECT id FROM queue_items
                WHERE topic = ? AND visible_at <= ? AND deliveries < ?
                ORDER BY id ASC
                LIMIT 1
            )
            RETURNING id, topic, payload, deliveries, visible_at, created_at
            "#,
        )
        .bind(hidden_until)
        .bind(topic)
        .bind(now)
        .bind(max_deliveries as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(row)
    }

    /// Delete an acknowledged item
    ///
    /// Returns false if the item was already gone.
    pub async fn delete_item(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM queue_items WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    /// Items on a topic that are not yet acknowledged and not yet dead
    ///
    /// Covers items waiting to be claimed, items hidden by a claim, and an item
    /// on its final delivery while that delivery is still in flight.
    pub async fn count_pending_items(&self, topic: &str, max_deliveries: u32) -> Result<i64> {
        let now = chrono::Utc::now().timestamp_millis();
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM queue_items
            WHERE topic = ? AND (deliveries < ? OR visible_at > ?)
            "#,
        )
        .bind(topic)
        .bind(max_deliveries as i64)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(count)
    }

    /// Items on a topic that exhausted their deliveries
    ///
    /// An item only counts as dead once its final delivery has timed out.
    pub async fn dead_letter_items(
        &self,
        topic: &str,
        max_deliveries: u32,
    ) -> Result<Vec<QueueItemRow>> {
        let now = chrono::Utc::now().timestamp_millis();
        let rows = sqlx::query_as::<_, QueueItemRow>(
            r#"
            SELECT id, topic, payload, deliveries, visible_at, created_at
            FROM queue_items
            WHERE topic = ? AND deliveries >= ? AND visible_at <= ?
            ORDER BY id ASC
            "#,
        )
        .bind(topic)
        .bind(max_deliveries as i64)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(rows)
    }
}

//! Durable work queue between the fetch cycle and the worker pool
//!
//! Delivery is at-least-once: a claimed item stays in the table, hidden for
//! the visibility timeout, and only disappears when it is acknowledged. A
//! consumer that crashes or fails mid-chunk simply lets the timeout lapse and
//! the chunk is handed out again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::QueueConfig;
use crate::db::Database;
use crate::types::{BatchPayload, QueueItemId};
use crate::{Error, Result};

/// Topic for chunks waiting to be processed
pub const PROCESS_BATCH_TOPIC: &str = "process-batch";

/// A claimed queue item
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Queue item identifier, used to acknowledge
    pub id: QueueItemId,
    /// Topic the item was submitted under
    pub topic: String,
    /// How many times this item has been claimed, this one included
    pub attempt: u32,
    /// The chunk to process
    pub payload: BatchPayload,
}

/// At-least-once queue of chunks
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Submit a chunk under a topic
    async fn submit(&self, topic: &str, payload: &BatchPayload) -> Result<QueueItemId>;

    /// Claim the oldest visible chunk on a topic, if any
    async fn claim(&self, topic: &str) -> Result<Option<Delivery>>;

    /// Acknowledge a processed delivery so it is never handed out again
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Chunks on a topic that can still be delivered
    async fn pending(&self, topic: &str) -> Result<i64>;
}

/// [`WorkQueue`] stored in the `queue_items` table
#[derive(Clone)]
pub struct SqliteQueue {
    db: Arc<Database>,
    visibility_timeout: Duration,
    max_deliveries: u32,
}

impl SqliteQueue {
    /// Create a queue over an open database
    pub fn new(db: Arc<Database>, config: &QueueConfig) -> Self {
        Self {
            db,
            visibility_timeout: config.visibility_timeout,
            max_deliveries: config.max_deliveries.max(1),
        }
    }

    /// Override the visibility timeout
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Chunks that exhausted their deliveries and are kept for inspection
    pub async fn dead_letters(&self, topic: &str) -> Result<Vec<QueueItemId>> {
        let rows = self.db.dead_letter_items(topic, self.max_deliveries).await?;
        Ok(rows.into_iter().map(|r| QueueItemId(r.id)).collect())
    }
}

#[async_trait]
impl WorkQueue for SqliteQueue {
    async fn submit(&self, topic: &str, payload: &BatchPayload) -> Result<QueueItemId> {
        let body = serde_json::to_string(payload)?;
        let id = self.db.enqueue_item(topic, &body).await?;
        tracing::debug!(
            item_id = id,
            topic,
            feed = %payload.feed,
            entries = payload.entries.len(),
            "chunk submitted"
        );
        Ok(QueueItemId(id))
    }

    async fn claim(&self, topic: &str) -> Result<Option<Delivery>> {
        let Some(row) = self
            .db
            .claim_item(topic, self.visibility_timeout, self.max_deliveries)
            .await?
        else {
            return Ok(None);
        };

        let attempt = u32::try_from(row.deliveries).unwrap_or(u32::MAX);
        if attempt > 1 {
            tracing::info!(item_id = row.id, topic, attempt, "redelivering chunk");
        }
        if attempt >= self.max_deliveries {
            tracing::warn!(
                item_id = row.id,
                topic,
                attempt,
                "final delivery attempt, chunk will be dead-lettered if not acknowledged"
            );
        }

        let payload: BatchPayload = serde_json::from_str(&row.payload).map_err(|e| {
            Error::Queue(format!("queue item {} has an unreadable payload: {}", row.id, e))
        })?;

        Ok(Some(Delivery {
            id: QueueItemId(row.id),
            topic: row.topic,
            attempt,
            payload,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        if !self.db.delete_item(delivery.id.get()).await? {
            tracing::debug!(item_id = %delivery.id, "acknowledged item was already gone");
        }
        Ok(())
    }

    async fn pending(&self, topic: &str) -> Result<i64> {
        self.db.count_pending_items(topic, self.max_deliveries).await
    }
}

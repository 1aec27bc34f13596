//! Bad-feed audit log.

use crate::types::{BadFeedRecord, NewBadFeed};
use crate::{Error, Result};

use super::{BadFeedRow, Database};

impl Database {
    /// Append a bad-feed snapshot
    pub async fn insert_bad_feed(&self, record: &NewBadFeed) -> Result<i64> {
        record.validate()?;

        let result = sqlx::query(
            r#"
            INSERT INTO bad_feeds (feed_url, category, message, snapshot, failed_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.feed_url)
        .bind(record.category.as_str())
        .bind(&record.message)
        .bind(&record.snapshot)
        .bind(record.failed_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(result.last_insert_rowid())
    }

    /// List bad-feed records, most recent first
    pub async fn list_bad_feeds(&self, limit: usize, offset: usize) -> Result<Vec<BadFeedRecord>> {
        let rows = sqlx::query_as::<_, BadFeedRow>(
            r#"
            SELECT id, feed_url, category, message, snapshot, failed_at
            FROM bad_feeds
            ORDER BY failed_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(rows.into_iter().map(BadFeedRecord::from).collect())
    }

    /// Bad-feed records for one URL, most recent first
    pub async fn bad_feeds_for_url(&self, feed_url: &str) -> Result<Vec<BadFeedRecord>> {
        let rows = sqlx::query_as::<_, BadFeedRow>(
            r#"
            SELECT id, feed_url, category, message, snapshot, failed_at
            FROM bad_feeds
            WHERE feed_url = ?
            ORDER BY failed_at DESC, id DESC
            "#,
        )
        .bind(feed_url)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(rows.into_iter().map(BadFeedRecord::from).collect())
    }
}

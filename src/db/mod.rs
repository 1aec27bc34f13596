//! Database layer for feed-ingest
//!
//! Handles SQLite persistence for jobs, the import-run and bad-feed audit
//! logs, and the work queue.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`jobs`] - Idempotent job upserts keyed by natural identifier
//! - [`import_runs`] - Append-only import run log and reporting queries
//! - [`bad_feeds`] - Append-only bad-feed log
//! - [`queue`] - Visibility-timeout work queue storage

use crate::error::ErrorCategory;
use crate::types::{BadFeedRecord, FailedJob, ImportRun, ImportStatus, PublicationDate};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod bad_feeds;
mod import_runs;
mod jobs;
mod migrations;
mod queue;

/// Job record from database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredJob {
    /// Unique database ID
    pub id: i64,
    /// guid if present, otherwise link
    pub natural_id: String,
    /// Title
    pub title: String,
    /// Description
    pub description: String,
    /// Author
    pub author: String,
    /// Raw guid
    pub guid: String,
    /// Raw link
    pub link: String,
    /// Publication date or the invalid-date sentinel
    pub pub_date: PublicationDate,
    /// 1 on insert, incremented by every changing update
    pub revision: i64,
    /// Unix timestamp of the first insert
    pub created_at: i64,
    /// Unix timestamp of the last changing update
    pub updated_at: i64,
}

/// Job record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub(crate) struct JobRow {
    id: i64,
    natural_id: String,
    title: String,
    description: String,
    author: String,
    guid: String,
    link: String,
    pub_date: String,
    revision: i64,
    created_at: i64,
    updated_at: i64,
}

impl From<JobRow> for StoredJob {
    fn from(row: JobRow) -> Self {
        StoredJob {
            id: row.id,
            natural_id: row.natural_id,
            title: row.title,
            description: row.description,
            author: row.author,
            guid: row.guid,
            link: row.link,
            pub_date: PublicationDate::from_db(&row.pub_date),
            revision: row.revision,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Import run record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub(crate) struct ImportRunRow {
    id: i64,
    feed: String,
    run_at: i64,
    total_fetched: i64,
    total_imported: i64,
    new_jobs: i64,
    updated_jobs: i64,
    failed_jobs: String,
    status: String,
    created_at: i64,
}

impl From<ImportRunRow> for ImportRun {
    fn from(row: ImportRunRow) -> Self {
        let failed_jobs: Vec<FailedJob> = serde_json::from_str(&row.failed_jobs)
            .unwrap_or_else(|e| {
                tracing::warn!(id = row.id, error = %e, "unreadable failed_jobs column");
                Vec::new()
            });

        ImportRun {
            id: row.id,
            feed: row.feed,
            run_at: timestamp_millis(row.run_at),
            total_fetched: row.total_fetched as u64,
            total_imported: row.total_imported as u64,
            new_jobs: row.new_jobs as u64,
            updated_jobs: row.updated_jobs as u64,
            failed_jobs,
            status: ImportStatus::from_db(&row.status),
            created_at: timestamp_secs(row.created_at),
        }
    }
}

/// Bad-feed record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub(crate) struct BadFeedRow {
    id: i64,
    feed_url: String,
    category: String,
    message: String,
    snapshot: String,
    failed_at: i64,
}

impl From<BadFeedRow> for BadFeedRecord {
    fn from(row: BadFeedRow) -> Self {
        BadFeedRecord {
            id: row.id,
            feed_url: row.feed_url,
            category: ErrorCategory::from_db(&row.category).unwrap_or(ErrorCategory::FetchError),
            message: row.message,
            snapshot: row.snapshot,
            failed_at: timestamp_millis(row.failed_at),
        }
    }
}

/// Queue item record from database
#[derive(Debug, Clone, FromRow)]
pub struct QueueItemRow {
    /// Unique database ID
    pub id: i64,
    /// Topic the item was submitted under
    pub topic: String,
    /// JSON payload
    pub payload: String,
    /// Times the item has been claimed
    pub deliveries: i64,
    /// Unix milliseconds after which the item may be claimed
    pub visible_at: i64,
    /// Unix timestamp when the item was submitted
    pub created_at: i64,
}

fn timestamp_secs(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

fn timestamp_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Database handle for feed-ingest
pub struct Database {
    pool: SqlitePool,
}

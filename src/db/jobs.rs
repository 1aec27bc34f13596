//! Job upserts keyed by natural identifier.

use crate::types::{Collection, NormalizedJob, UpsertOutcome};
use crate::{Error, Result};

use super::{Database, JobRow, StoredJob};

impl Database {
    /// Insert or update a job in a single statement
    ///
    /// The row is only rewritten when at least one field differs, so replaying
    /// an identical entry leaves `revision` and `updated_at` untouched. The
    /// returned revision tells the cases apart: 1 is a fresh insert, anything
    /// higher is a changing update, and no row means nothing changed.
    pub async fn upsert_job(&self, job: &NormalizedJob) -> Result<UpsertOutcome> {
        job.validate()?;

        let now = chrono::Utc::now().timestamp();
        let revision: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (
                natural_id, title, description, author, guid, link,
                pub_date, revision, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT(natural_id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                author = excluded.author,
                guid = excluded.guid,
                link = excluded.link,
                pub_date = excluded.pub_date,
                revision = jobs.revision + 1,
                updated_at = excluded.updated_at
            WHERE jobs.title IS NOT excluded.title
               OR jobs.description IS NOT excluded.description
               OR jobs.author IS NOT excluded.author
               OR jobs.guid IS NOT excluded.guid
               OR jobs.link IS NOT excluded.link
               OR jobs.pub_date IS NOT excluded.pub_date
            RETURNING revision
            "#,
        )
        .bind(&job.natural_id)
        .bind(&job.title)
        .bind(&job.description)
        .bind(&job.author)
        .bind(&job.guid)
        .bind(&job.link)
        .bind(job.pub_date.to_db_string())
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(match revision {
            Some(1) => UpsertOutcome {
                created: true,
                changed: false,
            },
            Some(_) => UpsertOutcome {
                created: false,
                changed: true,
            },
            None => UpsertOutcome::default(),
        })
    }

    /// Get a job by natural identifier
    pub async fn get_job(&self, natural_id: &str) -> Result<Option<StoredJob>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, natural_id, title, description, author, guid, link,
                   pub_date, revision, created_at, updated_at
            FROM jobs
            WHERE natural_id = ?
            "#,
        )
        .bind(natural_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(row.map(StoredJob::from))
    }

    /// List jobs, most recently updated first
    pub async fn list_jobs(&self, limit: usize, offset: usize) -> Result<Vec<StoredJob>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, natural_id, title, description, author, guid, link,
                   pub_date, revision, created_at, updated_at
            FROM jobs
            ORDER BY updated_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(rows.into_iter().map(StoredJob::from).collect())
    }

    /// Count the records in a collection
    pub async fn count(&self, collection: Collection) -> Result<i64> {
        // Table names come from a closed enum, never from input
        let sql = format!("SELECT COUNT(*) FROM {}", collection.table());
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        Ok(count)
    }
}

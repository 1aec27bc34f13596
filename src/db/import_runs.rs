//! Import run audit log.

use crate::types::{ImportRun, NewImportRun};
use crate::{Error, Result};

use super::{Database, ImportRunRow};

impl Database {
    /// Append an import run
    ///
    /// Runs are write-once; there is no update or delete.
    pub async fn insert_import_run(&self, run: &NewImportRun) -> Result<i64> {
        run.validate()?;

        let failed_jobs = serde_json::to_string(&run.failed_jobs)?;
        let result = sqlx::query(
            r#"
            INSERT INTO import_runs (
                feed, run_at, total_fetched, total_imported, new_jobs,
                updated_jobs, failed_jobs, status, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.feed)
        .bind(run.run_at.timestamp_millis())
        .bind(run.total_fetched as i64)
        .bind(run.total_imported as i64)
        .bind(run.new_jobs as i64)
        .bind(run.updated_jobs as i64)
        .bind(failed_jobs)
        .bind(run.status.as_str())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(result.last_insert_rowid())
    }

    /// Query import runs with pagination and optional feed filter
    ///
    /// Returns runs ordered by run time (most recent first). The search term is
    /// a substring match on the feed identifier, case-insensitive for ASCII
    /// letters only (SQLite `LIKE` semantics); other characters match exactly.
    pub async fn query_import_runs(
        &self,
        search: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ImportRun>> {
        let query = if let Some(pattern) = search.map(like_pattern) {
            sqlx::query_as::<_, ImportRunRow>(
                r#"
                SELECT id, feed, run_at, total_fetched, total_imported, new_jobs,
                       updated_jobs, failed_jobs, status, created_at
                FROM import_runs
                WHERE feed LIKE ? ESCAPE '\'
                ORDER BY run_at DESC, id DESC
                LIMIT ? OFFSET ?
                "#,
            )
            .bind(pattern)
            .bind(limit as i64)
            .bind(offset as i64)
        } else {
            sqlx::query_as::<_, ImportRunRow>(
                r#"
                SELECT id, feed, run_at, total_fetched, total_imported, new_jobs,
                       updated_jobs, failed_jobs, status, created_at
                FROM import_runs
                ORDER BY run_at DESC, id DESC
                LIMIT ? OFFSET ?
                "#,
            )
            .bind(limit as i64)
            .bind(offset as i64)
        };

        let rows = query.fetch_all(&self.pool).await.map_err(Error::Sqlx)?;

        Ok(rows.into_iter().map(ImportRun::from).collect())
    }

    /// Count import runs (optionally filtered by feed)
    ///
    /// Useful for pagination - returns total count of records matching the filter.
    pub async fn count_import_runs(&self, search: Option<&str>) -> Result<i64> {
        let count = if let Some(pattern) = search.map(like_pattern) {
            sqlx::query_scalar::<_, i64>(
                r"SELECT COUNT(*) FROM import_runs WHERE feed LIKE ? ESCAPE '\'",
            )
            .bind(pattern)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Sqlx)?
        } else {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM import_runs")
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Sqlx)?
        };

        Ok(count)
    }

    /// Get a single import run by ID
    pub async fn get_import_run(&self, id: i64) -> Result<Option<ImportRun>> {
        let row = sqlx::query_as::<_, ImportRunRow>(
            r#"
            SELECT id, feed, run_at, total_fetched, total_imported, new_jobs,
                   updated_jobs, failed_jobs, status, created_at
            FROM import_runs
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(row.map(ImportRun::from))
    }
}

/// `LIKE` pattern matching `search` anywhere, with wildcards escaped
///
/// Case folding is left to `LIKE`, which folds ASCII only.
fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

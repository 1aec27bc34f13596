//! Persistence seam used by the pipeline
//!
//! The batch processor and feed client only see [`Store`]; [`Database`]
//! is the SQLite implementation. Tests substitute their own stores to inject
//! failures.

use async_trait::async_trait;

use crate::Result;
use crate::db::Database;
use crate::types::{Collection, NewBadFeed, NewImportRun, NormalizedJob, UpsertOutcome};

/// Record store for jobs and the two audit logs
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or update a job by natural identifier in one atomic step
    async fn upsert_job(&self, job: &NormalizedJob) -> Result<UpsertOutcome>;

    /// Append an import run, returning its id
    async fn append_import_run(&self, run: &NewImportRun) -> Result<i64>;

    /// Append a bad-feed record, returning its id
    async fn append_bad_feed(&self, record: &NewBadFeed) -> Result<i64>;

    /// Number of records in a collection
    async fn count(&self, collection: Collection) -> Result<i64>;
}

#[async_trait]
impl Store for Database {
    async fn upsert_job(&self, job: &NormalizedJob) -> Result<UpsertOutcome> {
        Database::upsert_job(self, job).await
    }

    async fn append_import_run(&self, run: &NewImportRun) -> Result<i64> {
        self.insert_import_run(run).await
    }

    async fn append_bad_feed(&self, record: &NewBadFeed) -> Result<i64> {
        self.insert_bad_feed(record).await
    }

    async fn count(&self, collection: Collection) -> Result<i64> {
        Database::count(self, collection).await
    }
}

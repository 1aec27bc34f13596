//! Shared test helpers: temporary databases, a store with injectable failures,
//! and feed document builders.

use crate::Result;
use crate::db::Database;
use crate::error::Error;
use crate::store::Store;
use crate::types::{Collection, FeedEntry, NewBadFeed, NewImportRun, NormalizedJob, UpsertOutcome};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::tempdir;

/// Create a fresh database in a tempdir (which must be kept alive)
pub(crate) async fn create_test_database() -> (Arc<Database>, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let db = Database::new(&temp_dir.path().join("test.db")).await.unwrap();
    (Arc::new(db), temp_dir)
}

/// Store backed by a real database that can be told to fail
pub(crate) struct FlakyStore {
    pub(crate) db: Arc<Database>,
    failing_ids: Mutex<HashSet<String>>,
    fail_import_runs: AtomicBool,
    fail_bad_feeds: AtomicBool,
}

impl FlakyStore {
    pub(crate) fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            failing_ids: Mutex::new(HashSet::new()),
            fail_import_runs: AtomicBool::new(false),
            fail_bad_feeds: AtomicBool::new(false),
        }
    }

    /// Make upserts of this natural id fail
    pub(crate) fn fail_upsert_of(&self, natural_id: &str) {
        self.failing_ids
            .lock()
            .unwrap()
            .insert(natural_id.to_string());
    }

    pub(crate) fn set_fail_import_runs(&self, fail: bool) {
        self.fail_import_runs.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_bad_feeds(&self, fail: bool) {
        self.fail_bad_feeds.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn upsert_job(&self, job: &NormalizedJob) -> Result<UpsertOutcome> {
        if self.failing_ids.lock().unwrap().contains(&job.natural_id) {
            return Err(Error::Other(format!("write rejected for {}", job.natural_id)));
        }
        self.db.upsert_job(job).await
    }

    async fn append_import_run(&self, run: &NewImportRun) -> Result<i64> {
        if self.fail_import_runs.load(Ordering::SeqCst) {
            return Err(Error::Other("import run log unavailable".into()));
        }
        self.db.insert_import_run(run).await
    }

    async fn append_bad_feed(&self, record: &NewBadFeed) -> Result<i64> {
        if self.fail_bad_feeds.load(Ordering::SeqCst) {
            return Err(Error::Other("bad feed log unavailable".into()));
        }
        self.db.insert_bad_feed(record).await
    }

    async fn count(&self, collection: Collection) -> Result<i64> {
        self.db.count(collection).await
    }
}

/// Entry with the given guid, link and title
pub(crate) fn entry(guid: Option<&str>, link: Option<&str>, title: &str) -> FeedEntry {
    FeedEntry {
        title: Some(title.to_string()),
        description: Some(format!("{title} description")),
        author: Some("Hiring Office".to_string()),
        link: link.map(String::from),
        guid: guid.map(String::from),
        pub_date: Some("Mon, 01 Jan 2024 12:00:00 +0000".to_string()),
    }
}

/// RSS 2.0 document with one item per (guid, title)
pub(crate) fn rss_document(items: &[(&str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(guid, title)| {
            format!(
                r#"
        <item>
            <title>{title}</title>
            <link>https://jobs.example/{guid}</link>
            <guid>{guid}</guid>
            <description>{title} at a university</description>
            <author>hr@jobs.example</author>
            <pubDate>Mon, 01 Jan 2024 12:00:00 +0000</pubDate>
        </item>"#
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
    <channel>
        <title>Test Feed</title>
        <link>https://jobs.example</link>
        <description>Test RSS Feed</description>{items}
    </channel>
</rss>"#
    )
}

//! Batch processing: normalize, upsert and tally one chunk, then log the run.
//!
//! Entry failures never abort a chunk. Each one is recorded in the tally with
//! its natural identifier (or `"<missing>"`) and processing moves on. The only
//! failure that escapes [`BatchProcessor::process`] is the audit write itself,
//! which leaves the delivery unacknowledged so the chunk is retried.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::Result;
use crate::error::EntryError;
use crate::events::EventBus;
use crate::store::Store;
use crate::types::{
    BatchPayload, BatchTally, Event, FailedJob, FeedEntry, ImportStatus, MISSING_ID_PLACEHOLDER,
    NewImportRun, NormalizedJob, PublicationDate, UpsertOutcome,
};

/// Result of processing one chunk
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessedChunk {
    /// Id of the import run written for the chunk
    pub run_id: i64,
    /// Outcome counts
    pub tally: BatchTally,
    /// Derived status
    pub status: ImportStatus,
}

/// Turns queued chunks into stored jobs and import runs
#[derive(Clone)]
pub struct BatchProcessor {
    store: Arc<dyn Store>,
    events: EventBus,
}

impl BatchProcessor {
    /// Create a processor writing to `store` and publishing on `events`
    pub fn new(store: Arc<dyn Store>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// Process one chunk and append its import run
    ///
    /// # Errors
    /// Returns an error only if the import run could not be written.
    pub async fn process(&self, payload: &BatchPayload) -> Result<ProcessedChunk> {
        let tally = self.tally_chunk(payload).await;
        let status = classify_outcome(&tally);

        let run = NewImportRun::from_tally(&payload.feed, tally.clone(), status, Utc::now());
        let run_id = self.store.append_import_run(&run).await?;

        info!(
            feed = %payload.feed,
            run_id,
            status = %status,
            fetched = tally.total_fetched,
            new = tally.new_jobs,
            updated = tally.updated_jobs,
            failed = tally.failed_jobs.len(),
            "chunk processed"
        );

        self.events.publish(Event::RunLogged {
            feed: payload.feed.clone(),
            status,
            new_jobs: tally.new_jobs,
            updated_jobs: tally.updated_jobs,
            failed_jobs: tally.failed_jobs.len(),
            timestamp: Utc::now(),
        });

        Ok(ProcessedChunk {
            run_id,
            tally,
            status,
        })
    }

    /// Upsert every entry of a chunk in order and count the outcomes
    pub async fn tally_chunk(&self, payload: &BatchPayload) -> BatchTally {
        let mut tally = BatchTally::new(payload.entries.len());

        for entry in &payload.entries {
            match self.store_entry(entry).await {
                Ok(outcome) if outcome.created => tally.new_jobs += 1,
                Ok(outcome) if outcome.changed => tally.updated_jobs += 1,
                Ok(_) => {}
                Err((natural_id, err)) => {
                    debug!(
                        feed = %payload.feed,
                        natural_id = %natural_id,
                        reason = %err,
                        "entry failed"
                    );
                    tally.failed_jobs.push(FailedJob {
                        natural_id,
                        reason: err.to_string(),
                    });
                }
            }
        }

        if !tally.failed_jobs.is_empty() {
            warn!(
                feed = %payload.feed,
                failed = tally.failed_jobs.len(),
                of = tally.total_fetched,
                "entries failed in chunk"
            );
        }

        tally
    }

    async fn store_entry(
        &self,
        entry: &FeedEntry,
    ) -> std::result::Result<UpsertOutcome, (String, EntryError)> {
        let Some(natural_id) = resolve_natural_id(entry) else {
            return Err((
                MISSING_ID_PLACEHOLDER.to_string(),
                EntryError::MissingIdentifier,
            ));
        };

        let job = normalize(entry, natural_id);
        self.store
            .upsert_job(&job)
            .await
            .map_err(|e| (job.natural_id.clone(), EntryError::Upsert(e.to_string())))
    }
}

/// Natural identifier for an entry: its guid, otherwise its link
///
/// Both are trimmed; blank values count as absent.
pub fn resolve_natural_id(entry: &FeedEntry) -> Option<String> {
    non_blank(entry.guid.as_deref())
        .or_else(|| non_blank(entry.link.as_deref()))
        .map(String::from)
}

/// Build the stored form of an entry
pub fn normalize(entry: &FeedEntry, natural_id: String) -> NormalizedJob {
    let text = |value: &Option<String>| value.clone().unwrap_or_default();

    NormalizedJob {
        natural_id,
        title: text(&entry.title),
        description: text(&entry.description),
        author: text(&entry.author),
        guid: text(&entry.guid),
        link: text(&entry.link),
        pub_date: PublicationDate::parse(entry.pub_date.as_deref()),
    }
}

/// Derive the run status from a tally
///
/// Failure is checked first, so an empty chunk counts as failed.
pub fn classify_outcome(tally: &BatchTally) -> ImportStatus {
    if tally.failed_jobs.len() == tally.total_fetched {
        ImportStatus::Failed
    } else if tally.total_imported() == tally.total_fetched {
        ImportStatus::Success
    } else {
        ImportStatus::Partial
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

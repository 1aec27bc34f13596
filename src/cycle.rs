//! One fetch cycle: every configured feed, fetched in order and queued in chunks.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use crate::Result;
use crate::batcher::submit_chunks;
use crate::error::Error;
use crate::events::EventBus;
use crate::feed_client::FeedClient;
use crate::queue::WorkQueue;
use crate::types::Event;

/// What a cycle did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Feeds attempted
    pub feeds: usize,
    /// Feeds that failed to fetch, parse or queue
    pub failed_feeds: usize,
    /// Entries fetched across all good feeds
    pub entries: usize,
    /// Chunks submitted to the work queue
    pub chunks: usize,
}

/// Runs fetch cycles over a fixed feed list
pub struct FetchCycle {
    client: Arc<FeedClient>,
    queue: Arc<dyn WorkQueue>,
    events: EventBus,
    feeds: Vec<String>,
    batch_size: usize,
}

impl FetchCycle {
    /// Create a cycle over `feeds`, chunking by `batch_size`
    pub fn new(
        client: Arc<FeedClient>,
        queue: Arc<dyn WorkQueue>,
        events: EventBus,
        feeds: Vec<String>,
        batch_size: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::config("BATCH_SIZE", "batch size must be positive"));
        }
        Ok(Self {
            client,
            queue,
            events,
            feeds,
            batch_size,
        })
    }

    /// Fetch every feed in order and queue its chunks
    ///
    /// A failing feed only loses its own contribution; the cycle always moves on
    /// to the next feed and always ends with `feed_validation_completed`.
    pub async fn run(&self) -> CycleReport {
        info!(feeds = self.feeds.len(), started_at = %Utc::now(), "fetch cycle started");
        self.events.publish(Event::cycle_started());

        let mut report = CycleReport {
            feeds: self.feeds.len(),
            ..Default::default()
        };

        for url in &self.feeds {
            let entries = match self.client.fetch_feed(url).await {
                Ok(entries) => entries,
                Err(_) => {
                    // Already logged and recorded by the feed client
                    report.failed_feeds += 1;
                    continue;
                }
            };

            let fetched = entries.len();
            match submit_chunks(self.queue.as_ref(), url, entries, self.batch_size).await {
                Ok(chunks) => {
                    report.entries += fetched;
                    report.chunks += chunks;
                }
                Err(e) => {
                    error!(url = %url, error = %e, "failed to queue chunks");
                    report.failed_feeds += 1;
                }
            }
        }

        info!(
            feeds = report.feeds,
            failed = report.failed_feeds,
            entries = report.entries,
            chunks = report.chunks,
            "fetch cycle finished"
        );
        self.events.publish(Event::FeedValidationCompleted {
            feeds: report.feeds,
            failed: report.failed_feeds,
            chunks: report.chunks,
            timestamp: Utc::now(),
        });

        report
    }
}

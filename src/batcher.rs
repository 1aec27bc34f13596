//! Splits a feed's entries into fixed-size chunks and queues them.

use crate::error::{Error, Result};
use crate::queue::{PROCESS_BATCH_TOPIC, WorkQueue};
use crate::types::{BatchPayload, FeedEntry};

/// Split entries into chunks of at most `batch_size`, preserving order
///
/// The last chunk may be smaller; no entries means no chunks.
pub fn make_batches(entries: &[FeedEntry], batch_size: usize) -> Result<Vec<Vec<FeedEntry>>> {
    if batch_size == 0 {
        return Err(Error::config("BATCH_SIZE", "batch size must be positive"));
    }
    Ok(entries.chunks(batch_size).map(<[FeedEntry]>::to_vec).collect())
}

/// Queue every chunk of a feed under the batch topic
///
/// Returns the number of chunks submitted. A submission failure stops the
/// feed's remaining chunks; chunks already queued stay queued.
pub async fn submit_chunks(
    queue: &dyn WorkQueue,
    feed: &str,
    entries: Vec<FeedEntry>,
    batch_size: usize,
) -> Result<usize> {
    let chunks = make_batches(&entries, batch_size)?;
    let total = chunks.len();

    for (index, chunk) in chunks.into_iter().enumerate() {
        let payload = BatchPayload {
            feed: feed.to_string(),
            entries: chunk,
        };
        let id = queue.submit(PROCESS_BATCH_TOPIC, &payload).await?;
        tracing::debug!(
            feed = %feed,
            item_id = %id,
            chunk = index + 1,
            of = total,
            size = payload.entries.len(),
            "chunk queued"
        );
    }

    Ok(total)
}

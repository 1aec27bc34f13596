//! Bounded-concurrency consumers that claim chunks from the work queue and
//! process them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{Error, Result};
use crate::events::EventBus;
use crate::processor::BatchProcessor;
use crate::queue::{Delivery, PROCESS_BATCH_TOPIC, WorkQueue};
use crate::types::Event;

/// Bounded-concurrency consumer of the batch topic
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    queue: Arc<dyn WorkQueue>,
    processor: BatchProcessor,
    events: EventBus,
    /// One permit per chunk in flight
    permits: Arc<Semaphore>,
    concurrency: usize,
    poll_interval: Duration,
    cancel: CancellationToken,
    claim_loop: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool processing at most `concurrency` chunks at once
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        processor: BatchProcessor,
        events: EventBus,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            inner: Arc::new(PoolInner {
                queue,
                processor,
                events,
                permits: Arc::new(Semaphore::new(concurrency)),
                concurrency,
                poll_interval,
                cancel: CancellationToken::new(),
                claim_loop: Mutex::new(None),
            }),
        }
    }

    /// Start the claim loop in the background
    ///
    /// The loop:
    /// 1. Acquires a permit (waits while `concurrency` chunks are in flight)
    /// 2. Claims the oldest visible chunk, or sleeps for the poll interval if there is none
    /// 3. Spawns a task that processes the chunk, acknowledges it and releases the permit
    /// 4. Repeats until [`WorkerPool::shutdown`]
    ///
    /// Calling `start` on a running pool does nothing.
    pub async fn start(&self) {
        let mut claim_loop = self.inner.claim_loop.lock().await;
        if claim_loop.is_some() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        *claim_loop = Some(tokio::spawn(async move {
            inner.events.publish(Event::processing_in_progress());
            info!(concurrency = inner.concurrency, "worker pool started");

            loop {
                let permit = tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    permit = Arc::clone(&inner.permits).acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => break,
                    },
                };

                match inner.queue.claim(PROCESS_BATCH_TOPIC).await {
                    Ok(Some(delivery)) => {
                        let inner = Arc::clone(&inner);
                        tokio::spawn(async move {
                            let _permit = permit;
                            inner.handle(delivery).await;
                        });
                    }
                    Ok(None) => {
                        drop(permit);
                        tokio::select! {
                            _ = inner.cancel.cancelled() => break,
                            _ = tokio::time::sleep(inner.poll_interval) => {}
                        }
                    }
                    Err(e) => {
                        drop(permit);
                        warn!(error = %e, "failed to claim chunk");
                        tokio::select! {
                            _ = inner.cancel.cancelled() => break,
                            _ = tokio::time::sleep(inner.poll_interval) => {}
                        }
                    }
                }
            }

            debug!("worker pool claim loop stopped");
        }));
    }

    /// Process every currently visible chunk, then return how many were handled
    ///
    /// Uses the same permits as the background loop, so concurrency stays bounded
    /// even if both run at once. An item whose payload cannot be read is skipped;
    /// the claim already hid it and counted the delivery, so it ends up
    /// dead-lettered. A storage error stops the drain, but only after every
    /// chunk already handed out has finished.
    pub async fn run_until_empty(&self) -> Result<usize> {
        let mut handled = 0;
        let mut failure = None;

        loop {
            let Ok(permit) = Arc::clone(&self.inner.permits).acquire_owned().await else {
                break;
            };

            let delivery = match self.inner.queue.claim(PROCESS_BATCH_TOPIC).await {
                Ok(Some(delivery)) => delivery,
                Ok(None) => break,
                Err(Error::Queue(message)) => {
                    drop(permit);
                    warn!(error = %message, "skipping unreadable chunk");
                    continue;
                }
                Err(e) => {
                    drop(permit);
                    warn!(error = %e, "failed to claim chunk, stopping drain");
                    failure = Some(e);
                    break;
                }
            };

            handled += 1;
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                let _permit = permit;
                inner.handle(delivery).await;
            });
        }

        self.inner.wait_idle().await;
        match failure {
            Some(e) => Err(e),
            None => Ok(handled),
        }
    }

    /// Stop claiming and wait (up to `timeout`) for in-flight chunks
    ///
    /// Returns true if every in-flight chunk finished in time. Chunks that did
    /// not finish are left unacknowledged and will be redelivered. Publishes
    /// `batch_processing_completed` on the activity channel and
    /// `import_completed` on the import channel once stopped.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.cancel.cancel();

        let claim_loop = self.inner.claim_loop.lock().await.take();
        if let Some(handle) = claim_loop
            && let Err(e) = handle.await
        {
            warn!(error = %e, "worker pool claim loop ended abnormally");
        }

        let drained = tokio::time::timeout(timeout, self.inner.wait_idle())
            .await
            .is_ok();
        if drained {
            info!("worker pool drained");
        } else {
            warn!("timeout waiting for in-flight chunks, leaving them for redelivery");
        }

        self.inner.events.publish(Event::processing_completed());
        self.inner.events.publish(Event::import_completed());
        drained
    }

    /// Chunks currently being processed
    pub fn in_flight(&self) -> usize {
        self.inner.concurrency - self.inner.permits.available_permits()
    }
}

impl PoolInner {
    async fn handle(&self, delivery: Delivery) {
        let feed = delivery.payload.feed.clone();

        match self.processor.process(&delivery.payload).await {
            Ok(_) => {
                if let Err(e) = self.queue.ack(&delivery).await {
                    warn!(item_id = %delivery.id, error = %e, "failed to acknowledge chunk");
                }
            }
            Err(e) => {
                error!(
                    item_id = %delivery.id,
                    feed = %feed,
                    attempt = delivery.attempt,
                    error = %e,
                    "failed to log import run, chunk will be redelivered"
                );
            }
        }
    }

    /// Wait until every permit is back
    async fn wait_idle(&self) {
        if let Ok(all) = self.permits.acquire_many(self.concurrency as u32).await {
            drop(all);
        }
    }
}

//! Top-level service: wires the pipeline together and owns its lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::cycle::{CycleReport, FetchCycle};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::feed_client::FeedClient;
use crate::processor::BatchProcessor;
use crate::queue::{PROCESS_BATCH_TOPIC, SqliteQueue, WorkQueue};
use crate::scheduler::FetchScheduler;
use crate::store::Store;
use crate::types::Event;
use crate::worker_pool::WorkerPool;

/// Scheduled feed ingestion service
///
/// Owns the database, the event bus, the work queue, the worker pool and the
/// fetch scheduler. Nothing is global; every component receives what it needs
/// at construction.
pub struct FeedHarvester {
    config: Arc<Config>,
    db: Arc<Database>,
    events: EventBus,
    queue: Arc<SqliteQueue>,
    cycle: Arc<FetchCycle>,
    pool: WorkerPool,
    scheduler_cancel: CancellationToken,
    scheduler_task: Mutex<Option<JoinHandle<()>>>,
    /// Cleared once shutdown begins
    accepting_new: AtomicBool,
}

impl FeedHarvester {
    /// Open the database and build every component from `config`
    ///
    /// # Errors
    /// Fails on invalid configuration, or if the database cannot be opened or
    /// migrated.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        let events = EventBus::new(config.event_capacity);
        let store: Arc<dyn Store> = db.clone();

        let queue = Arc::new(SqliteQueue::new(Arc::clone(&db), &config.queue));
        let client = Arc::new(FeedClient::new(&config, Arc::clone(&store), events.clone())?);
        let processor = BatchProcessor::new(store, events.clone());
        let pool = WorkerPool::new(
            queue.clone(),
            processor,
            events.clone(),
            config.processing.concurrency,
            config.queue.poll_interval,
        );
        let cycle = Arc::new(FetchCycle::new(
            client,
            queue.clone(),
            events.clone(),
            config.feeds.urls.clone(),
            config.processing.batch_size,
        )?);

        tracing::info!(
            feeds = config.feeds.urls.len(),
            database = %config.persistence.database_path.display(),
            "feed harvester initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            db,
            events,
            queue,
            cycle,
            pool,
            scheduler_cancel: CancellationToken::new(),
            scheduler_task: Mutex::new(None),
            accepting_new: AtomicBool::new(true),
        })
    }

    /// Subscribe to pipeline events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Start the worker pool and the cron scheduler
    ///
    /// # Errors
    /// Returns [`Error::ShuttingDown`] after [`FeedHarvester::shutdown`].
    pub async fn start(&self) -> Result<()> {
        self.ensure_accepting()?;

        self.pool.start().await;

        let mut task = self.scheduler_task.lock().await;
        if task.is_none() {
            let scheduler = FetchScheduler::new(
                &self.config.processing.cron_schedule,
                Arc::clone(&self.cycle),
                self.config.processing.overlap_policy,
            )?;
            if let Some(next) = scheduler.next_fire() {
                tracing::info!(next = %next, "first fetch cycle scheduled");
            }
            *task = Some(tokio::spawn(scheduler.run(self.scheduler_cancel.clone())));
        }

        Ok(())
    }

    /// Run one fetch cycle immediately, outside the schedule
    ///
    /// # Errors
    /// Returns [`Error::ShuttingDown`] after [`FeedHarvester::shutdown`].
    pub async fn run_cycle_now(&self) -> Result<CycleReport> {
        self.ensure_accepting()?;
        Ok(self.cycle.run().await)
    }

    /// Process every chunk currently visible in the queue and wait for them
    ///
    /// # Errors
    /// Fails if the queue cannot be read.
    pub async fn process_pending(&self) -> Result<usize> {
        self.ensure_accepting()?;
        self.pool.run_until_empty().await
    }

    /// Chunks still waiting in the queue
    pub async fn pending_chunks(&self) -> Result<i64> {
        self.queue.pending(PROCESS_BATCH_TOPIC).await
    }

    /// Database handle for querying jobs, import runs and bad feeds
    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// Stop the scheduler, then drain the worker pool
    ///
    /// In-flight chunks get up to the configured shutdown timeout to finish.
    /// Chunks that do not finish stay in the queue for the next start.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("initiating graceful shutdown");
        self.accepting_new.store(false, Ordering::SeqCst);

        self.scheduler_cancel.cancel();
        let task = self.scheduler_task.lock().await.take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "scheduler task ended abnormally");
        }

        let drained = self
            .pool
            .shutdown(self.config.processing.shutdown_timeout)
            .await;

        match self.queue.pending(PROCESS_BATCH_TOPIC).await {
            Ok(0) => {}
            Ok(left) => tracing::info!(left, "chunks left in queue for next start"),
            Err(e) => tracing::warn!(error = %e, "could not count remaining chunks"),
        }

        tracing::info!(drained, "graceful shutdown complete");
        Ok(())
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.accepting_new.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ShuttingDown)
        }
    }
}

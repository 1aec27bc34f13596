//! # feed-ingest
//!
//! Scheduled RSS/Atom ingestion into a SQLite job store.
//!
//! On a cron cadence every configured feed is fetched, parsed and split into
//! fixed-size chunks. Chunks go through a durable work queue to a pool of
//! workers that upsert each entry by its natural identifier and append one
//! import run per chunk. Feeds that cannot be fetched or parsed are recorded
//! with a snapshot of what came back.
//!
//! ## Quick Start
//!
//! ```no_run
//! use feed_ingest::{Config, FeedHarvester, run_with_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let harvester = FeedHarvester::new(config).await?;
//!
//!     let mut events = harvester.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("{}", event.label());
//!         }
//!     });
//!
//!     harvester.start().await?;
//!     run_with_shutdown(harvester).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Chunking of feed entries
pub mod batcher;
/// Configuration types
pub mod config;
/// One pass over every configured feed
pub mod cycle;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// In-process event fanout
pub mod events;
/// Feed fetching and parsing
pub mod feed_client;
/// Top-level service
pub mod harvester;
/// Chunk processing and outcome classification
pub mod processor;
/// Durable work queue
pub mod queue;
/// Cron scheduling of fetch cycles
pub mod scheduler;
/// Storage seam used by the pipeline
pub mod store;
/// Core types and events
pub mod types;
/// Bounded-concurrency chunk consumers
pub mod worker_pool;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use config::{Config, FeedConfig, HeaderProfile, OverlapPolicy};
pub use cycle::CycleReport;
pub use db::Database;
pub use error::{DatabaseError, EntryError, Error, ErrorCategory, FeedError, Result};
pub use events::EventBus;
pub use harvester::FeedHarvester;
pub use types::{
    BadFeedRecord, BatchPayload, Event, EventChannel, FeedEntry, ImportRun, ImportStatus,
};

/// Run the harvester until a termination signal arrives, then shut it down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(harvester: FeedHarvester) -> Result<()> {
    wait_for_signal().await;
    harvester.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}

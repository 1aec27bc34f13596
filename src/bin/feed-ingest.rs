//! feed-ingest: harvest configured feeds on a cron schedule.
//!
//! Configuration comes from the environment (and a `.env` file if present).

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use feed_ingest::{Config, FeedHarvester, run_with_shutdown};

/// Scheduled RSS/Atom ingestion into a SQLite job store.
#[derive(Parser, Debug)]
#[command(name = "feed-ingest", version, about)]
struct Cli {
    /// Run a single fetch cycle, process every queued chunk, then exit.
    #[arg(long)]
    once: bool,

    /// Load environment variables from this file instead of `./.env`.
    #[arg(long, env = "FEED_INGEST_ENV_FILE")]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("feed_ingest=info,warn")),
        )
        .init();

    let config = Config::from_env()?;
    let harvester = FeedHarvester::new(config).await?;

    if cli.once {
        let report = harvester.run_cycle_now().await?;
        let processed = harvester.process_pending().await?;
        info!(
            feeds = report.feeds,
            failed_feeds = report.failed_feeds,
            entries = report.entries,
            processed,
            "single run finished"
        );
        harvester.shutdown().await?;
        return Ok(());
    }

    harvester.start().await?;
    run_with_shutdown(harvester).await?;
    Ok(())
}

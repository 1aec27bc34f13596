//! Common test utilities for feed-ingest integration tests

#![allow(dead_code)]

use std::time::Duration;

use feed_ingest::{Config, Event, FeedHarvester};
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Job board RSS feed with one item per (guid, title)
pub fn job_feed(items: &[(&str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(guid, title)| {
            format!(
                r#"
    <item>
      <title>{title}</title>
      <link>https://jobs.example/posting/{guid}</link>
      <guid isPermaLink="false">{guid}</guid>
      <description>{title}, full time</description>
      <pubDate>Tue, 02 Jan 2024 09:30:00 +0000</pubDate>
    </item>"#
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Job Board</title>
    <link>https://jobs.example</link>
    <description>Open positions</description>{items}
  </channel>
</rss>"#
    )
}

/// Atom feed with one entry per (id, title)
pub fn atom_feed(entries: &[(&str, &str)]) -> String {
    let entries: String = entries
        .iter()
        .map(|(id, title)| {
            format!(
                r#"
  <entry>
    <id>{id}</id>
    <title>{title}</title>
    <link href="https://atom.example/{id}"/>
    <updated>2024-01-02T09:30:00Z</updated>
    <summary>{title} summary</summary>
    <author><name>Registrar</name></author>
  </entry>"#
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Jobs</title>
  <id>urn:atom-jobs</id>
  <updated>2024-01-02T09:30:00Z</updated>{entries}
</feed>"#
    )
}

/// Config pointing at `feeds` with a database inside `dir`
pub fn test_config(dir: &TempDir, feeds: Vec<String>, batch_size: usize) -> Config {
    let mut config = Config::default();
    config.feeds.urls = feeds;
    config.persistence.database_path = dir.path().join("feed-ingest.db");
    config.processing.batch_size = batch_size;
    config.processing.concurrency = 3;
    config.processing.shutdown_timeout = Duration::from_secs(5);
    config.http.timeout = Duration::from_secs(2);
    config.queue.poll_interval = Duration::from_millis(20);
    config
}

/// Build a harvester over `feeds`; the tempdir must be kept alive
pub async fn create_harvester(feeds: Vec<String>, batch_size: usize) -> (FeedHarvester, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let harvester = FeedHarvester::new(test_config(&dir, feeds, batch_size))
        .await
        .expect("harvester");
    (harvester, dir)
}

/// Drain whatever is buffered on a receiver and return the event labels
pub fn drain_labels(rx: &mut broadcast::Receiver<Event>) -> Vec<&'static str> {
    let mut labels = Vec::new();
    while let Ok(event) = rx.try_recv() {
        labels.push(event.label());
    }
    labels
}

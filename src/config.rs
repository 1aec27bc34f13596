//! Configuration types for feed-ingest

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::PathBuf, time::Duration};

/// Delimiter between feed URLs in `FEED_URLS`
pub const FEED_URL_DELIMITER: &str = "[-]";

/// Feed endpoint that rejects non-browser clients
const HIGHEREDJOBS_FEED: &str = "https://www.higheredjobs.com/rss/articleFeed.cfm";

/// Request headers applied to one feed, selected by exact URL match
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderProfile {
    /// Feed URL this profile applies to (compared verbatim)
    pub url: String,

    /// Header name to value
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Which feeds to harvest and how to request them
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Feed URLs fetched on every cycle, in order
    #[serde(default)]
    pub urls: Vec<String>,

    /// Per-feed header overrides
    #[serde(default = "default_header_profiles")]
    pub header_profiles: Vec<HeaderProfile>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            urls: vec![],
            header_profiles: default_header_profiles(),
        }
    }
}

impl FeedConfig {
    /// Header profile for an exact URL match
    pub fn profile_for(&self, url: &str) -> Option<&HeaderProfile> {
        self.header_profiles.iter().find(|p| p.url == url)
    }
}

/// What the scheduler does when a trigger fires while a cycle is still running
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Drop the trigger and log it
    #[default]
    Skip,
    /// Start another cycle alongside the running one
    Concurrent,
}

impl std::str::FromStr for OverlapPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(OverlapPolicy::Skip),
            "concurrent" => Ok(OverlapPolicy::Concurrent),
            other => Err(Error::config(
                "OVERLAP_POLICY",
                format!("unknown overlap policy '{other}' (expected skip or concurrent)"),
            )),
        }
    }
}

/// Batching, worker and scheduling settings
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Entries per queued chunk (default: 50)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Chunks processed at once (default: 5)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Cron expression for fetch cycles, 5 or 6 fields (default: hourly)
    #[serde(default = "default_cron_schedule")]
    pub cron_schedule: String,

    /// Behavior when a trigger overlaps a running cycle
    #[serde(default)]
    pub overlap_policy: OverlapPolicy,

    /// How long shutdown waits for in-flight chunks (default: 30 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            cron_schedule: default_cron_schedule(),
            overlap_policy: OverlapPolicy::default(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Work queue settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How long a claimed chunk stays hidden before redelivery (default: 300 seconds)
    #[serde(default = "default_visibility_timeout", with = "duration_serde")]
    pub visibility_timeout: Duration,

    /// Deliveries after which a chunk is no longer handed out (default: 5)
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,

    /// Wait between claims when the queue is empty (default: 1 second)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: default_visibility_timeout(),
            max_deliveries: default_max_deliveries(),
            poll_interval: default_poll_interval(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "feed-ingest.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// HTTP client settings for feed fetching
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Transport timeout per fetch (default: 30 seconds)
    #[serde(default = "default_fetch_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// User-Agent for feeds without a header profile
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_fetch_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Main configuration for the feed harvester
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Feeds and header profiles
    #[serde(default)]
    pub feeds: FeedConfig,

    /// Batching, workers and scheduling
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Work queue behavior
    #[serde(default)]
    pub queue: QueueConfig,

    /// Database location
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Feed HTTP client
    #[serde(default)]
    pub http: HttpConfig,

    /// Buffered events per listener before the slowest one starts lagging (default: 1000)
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feeds: FeedConfig::default(),
            processing: ProcessingConfig::default(),
            queue: QueueConfig::default(),
            persistence: PersistenceConfig::default(),
            http: HttpConfig::default(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Config {
    /// Build a configuration from environment variables
    ///
    /// Unset variables keep their defaults. `FEED_URLS` is split on `[-]`; an
    /// unset or empty value means no feeds.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(raw) = lookup("FEED_URLS") {
            config.feeds.urls = split_feed_urls(&raw);
        }
        if let Some(raw) = lookup("BATCH_SIZE") {
            config.processing.batch_size = parse_number("BATCH_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("CRON_SCHEDULE") {
            config.processing.cron_schedule = raw.trim().to_string();
        }
        if let Some(raw) = lookup("CONCURRENCY") {
            config.processing.concurrency = parse_number("CONCURRENCY", &raw)?;
        }
        if let Some(raw) = lookup("OVERLAP_POLICY") {
            config.processing.overlap_policy = raw.parse()?;
        }
        if let Some(raw) = lookup("DATABASE_PATH") {
            config.persistence.database_path = PathBuf::from(raw.trim());
        }
        if let Some(raw) = lookup("FETCH_TIMEOUT_SECS") {
            config.http.timeout = Duration::from_secs(parse_number("FETCH_TIMEOUT_SECS", &raw)?);
        }
        if let Some(raw) = lookup("QUEUE_VISIBILITY_TIMEOUT_SECS") {
            config.queue.visibility_timeout =
                Duration::from_secs(parse_number("QUEUE_VISIBILITY_TIMEOUT_SECS", &raw)?);
        }

        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.processing.batch_size == 0 {
            return Err(Error::config("BATCH_SIZE", "batch size must be positive"));
        }
        if self.processing.concurrency == 0 {
            return Err(Error::config("CONCURRENCY", "concurrency must be positive"));
        }
        if self.http.timeout.is_zero() {
            return Err(Error::config(
                "FETCH_TIMEOUT_SECS",
                "fetch timeout must be positive",
            ));
        }
        if self.queue.max_deliveries == 0 {
            return Err(Error::config(
                "max_deliveries",
                "max deliveries must be positive",
            ));
        }
        if self.event_capacity == 0 {
            return Err(Error::config(
                "event_capacity",
                "event capacity must be positive",
            ));
        }

        crate::scheduler::parse_schedule(&self.processing.cron_schedule)?;

        for url in &self.feeds.urls {
            url::Url::parse(url).map_err(|e| {
                Error::config("FEED_URLS", format!("invalid feed URL '{url}': {e}"))
            })?;
        }

        Ok(())
    }
}

/// Split a `[-]`-delimited list, trimming entries and dropping empty ones
pub fn split_feed_urls(raw: &str) -> Vec<String> {
    raw.split(FEED_URL_DELIMITER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::config(key, format!("{key} must be a number, got '{raw}': {e}")))
}

fn default_header_profiles() -> Vec<HeaderProfile> {
    let headers = [
        (
            "User-Agent",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        ),
        (
            "Accept",
            "application/rss+xml,application/xml;q=0.9,text/xml;q=0.8,*/*;q=0.7",
        ),
        ("Accept-Language", "en-US,en;q=0.9"),
        ("Referer", "https://www.higheredjobs.com/"),
        ("Connection", "keep-alive"),
    ];

    vec![HeaderProfile {
        url: HIGHEREDJOBS_FEED.to_string(),
        headers: headers
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }]
}

fn default_batch_size() -> usize {
    50
}

fn default_concurrency() -> usize {
    5
}

fn default_cron_schedule() -> String {
    "0 * * * *".to_string()
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_visibility_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_max_deliveries() -> u32 {
    5
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("feed-ingest.db")
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("feed-ingest/{}", env!("CARGO_PKG_VERSION"))
}

fn default_event_capacity() -> usize {
    1000
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

//! Core types for feed-ingest

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, ErrorCategory, Result};

/// Upper bound for the raw body snapshot kept with a bad-feed record (10 KB)
pub const BAD_FEED_SNAPSHOT_LIMIT: usize = 10 * 1024;

/// Stored form of a publication date that could not be parsed
pub const INVALID_DATE: &str = "invalid date";

/// Identifier recorded for an entry that has neither guid nor link
pub const MISSING_ID_PLACEHOLDER: &str = "<missing>";

/// Unique identifier for a queued chunk
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueItemId(pub i64);

impl QueueItemId {
    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One raw entry as given by the source feed
///
/// Every field is optional; nothing is validated until the batch processor
/// resolves an identifier for it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    /// Entry title
    #[serde(default)]
    pub title: Option<String>,
    /// Entry description or summary
    #[serde(default)]
    pub description: Option<String>,
    /// Author as given by the feed
    #[serde(default)]
    pub author: Option<String>,
    /// Entry link
    #[serde(default)]
    pub link: Option<String>,
    /// GUID for RSS, id for Atom
    #[serde(default)]
    pub guid: Option<String>,
    /// Publication date exactly as the feed wrote it
    #[serde(default)]
    pub pub_date: Option<String>,
}

/// One chunk of entries from a single feed, the unit of queued work
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPayload {
    /// Source feed identifier (the feed URL)
    pub feed: String,
    /// Entries in feed order
    pub entries: Vec<FeedEntry>,
}

/// Publication date of a normalized job
///
/// Unparsable or missing dates become [`PublicationDate::Invalid`], which is
/// stored as the literal `"invalid date"` instead of NULL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublicationDate {
    /// Parsed timestamp
    Valid(DateTime<Utc>),
    /// Missing or unparsable date
    Invalid,
}

impl PublicationDate {
    /// Parse a feed date: RFC 2822 (RSS), then RFC 3339 (Atom)
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return PublicationDate::Invalid;
        };

        DateTime::parse_from_rfc2822(raw)
            .or_else(|_| DateTime::parse_from_rfc3339(raw))
            .map(|dt| PublicationDate::Valid(dt.with_timezone(&Utc)))
            .unwrap_or(PublicationDate::Invalid)
    }

    /// Database string form (RFC 3339 in UTC, or the sentinel)
    pub fn to_db_string(&self) -> String {
        match self {
            PublicationDate::Valid(dt) => dt.to_rfc3339_opts(SecondsFormat::Secs, true),
            PublicationDate::Invalid => INVALID_DATE.to_string(),
        }
    }

    /// Read back the database string form
    pub fn from_db(value: &str) -> Self {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| PublicationDate::Valid(dt.with_timezone(&Utc)))
            .unwrap_or(PublicationDate::Invalid)
    }

    /// Whether the date parsed
    pub fn is_valid(&self) -> bool {
        matches!(self, PublicationDate::Valid(_))
    }
}

impl Serialize for PublicationDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_db_string())
    }
}

impl<'de> Deserialize<'de> for PublicationDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(PublicationDate::from_db(&value))
    }
}

/// Normalized record ready to be upserted by natural identifier
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedJob {
    /// guid if present, otherwise link
    pub natural_id: String,
    /// Title (empty if the feed gave none)
    pub title: String,
    /// Description (empty if the feed gave none)
    pub description: String,
    /// Author (empty if the feed gave none)
    pub author: String,
    /// Raw guid (empty if the feed gave none)
    pub guid: String,
    /// Raw link (empty if the feed gave none)
    pub link: String,
    /// Publication date or the invalid-date sentinel
    pub pub_date: PublicationDate,
}

impl NormalizedJob {
    /// Store-boundary validation
    pub fn validate(&self) -> Result<()> {
        if self.natural_id.trim().is_empty() {
            return Err(Error::InvalidRecord(
                "job natural_id must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Result of upserting one job
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// No record existed before this write
    pub created: bool,
    /// An existing record had at least one field changed
    pub changed: bool,
}

/// Derived status of one import run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    /// Every entry was created or updated
    Success,
    /// Some entries failed or were unchanged
    Partial,
    /// Every entry failed
    Failed,
}

impl ImportStatus {
    /// Stable string form used in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Success => "success",
            ImportStatus::Partial => "partial",
            ImportStatus::Failed => "failed",
        }
    }

    /// Parse the database string form (unknown values read as failed)
    pub fn from_db(value: &str) -> Self {
        match value {
            "success" => ImportStatus::Success,
            "partial" => ImportStatus::Partial,
            _ => ImportStatus::Failed,
        }
    }
}

impl std::fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entry that could not be stored
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJob {
    /// Natural identifier, or `"<missing>"` when none could be resolved
    pub natural_id: String,
    /// Failure reason
    pub reason: String,
}

/// Outcome counts for one processed chunk
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTally {
    /// Number of entries in the chunk
    pub total_fetched: usize,
    /// Entries stored for the first time
    pub new_jobs: usize,
    /// Existing entries whose fields changed
    pub updated_jobs: usize,
    /// Entries that could not be stored
    pub failed_jobs: Vec<FailedJob>,
}

impl BatchTally {
    /// Start a tally for a chunk of `total_fetched` entries
    pub fn new(total_fetched: usize) -> Self {
        Self {
            total_fetched,
            ..Default::default()
        }
    }

    /// New plus updated entries
    pub fn total_imported(&self) -> usize {
        self.new_jobs + self.updated_jobs
    }
}

/// Import run to be appended to the audit log
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewImportRun {
    /// Source feed identifier
    pub feed: String,
    /// When the chunk was processed
    pub run_at: DateTime<Utc>,
    /// Entries in the chunk
    pub total_fetched: usize,
    /// New plus updated entries
    pub total_imported: usize,
    /// Entries stored for the first time
    pub new_jobs: usize,
    /// Existing entries whose fields changed
    pub updated_jobs: usize,
    /// Entries that could not be stored
    pub failed_jobs: Vec<FailedJob>,
    /// Derived status
    pub status: ImportStatus,
}

impl NewImportRun {
    /// Build the audit record for a classified tally
    pub fn from_tally(
        feed: impl Into<String>,
        tally: BatchTally,
        status: ImportStatus,
        run_at: DateTime<Utc>,
    ) -> Self {
        Self {
            feed: feed.into(),
            run_at,
            total_fetched: tally.total_fetched,
            total_imported: tally.total_imported(),
            new_jobs: tally.new_jobs,
            updated_jobs: tally.updated_jobs,
            failed_jobs: tally.failed_jobs,
            status,
        }
    }

    /// Store-boundary validation
    pub fn validate(&self) -> Result<()> {
        if self.feed.trim().is_empty() {
            return Err(Error::InvalidRecord(
                "import run feed must not be empty".into(),
            ));
        }
        if self.total_imported != self.new_jobs + self.updated_jobs {
            return Err(Error::InvalidRecord(format!(
                "total_imported {} != new {} + updated {}",
                self.total_imported, self.new_jobs, self.updated_jobs
            )));
        }
        if self.total_imported + self.failed_jobs.len() > self.total_fetched {
            return Err(Error::InvalidRecord(format!(
                "imported {} + failed {} exceeds fetched {}",
                self.total_imported,
                self.failed_jobs.len(),
                self.total_fetched
            )));
        }
        Ok(())
    }
}

/// Import run read back from the audit log
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportRun {
    /// Unique database ID
    pub id: i64,
    /// Source feed identifier
    pub feed: String,
    /// When the chunk was processed
    pub run_at: DateTime<Utc>,
    /// Entries in the chunk
    pub total_fetched: u64,
    /// New plus updated entries
    pub total_imported: u64,
    /// Entries stored for the first time
    pub new_jobs: u64,
    /// Existing entries whose fields changed
    pub updated_jobs: u64,
    /// Entries that could not be stored
    pub failed_jobs: Vec<FailedJob>,
    /// Derived status
    pub status: ImportStatus,
    /// When the record was written
    pub created_at: DateTime<Utc>,
}

/// Bad-feed snapshot to be appended to the audit log
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewBadFeed {
    /// Feed URL
    pub feed_url: String,
    /// Fetch or parse failure
    pub category: ErrorCategory,
    /// Underlying error message
    pub message: String,
    /// Leading part of the raw body
    pub snapshot: String,
    /// When the failure happened
    pub failed_at: DateTime<Utc>,
}

impl NewBadFeed {
    /// Store-boundary validation
    pub fn validate(&self) -> Result<()> {
        if self.feed_url.trim().is_empty() {
            return Err(Error::InvalidRecord(
                "bad feed url must not be empty".into(),
            ));
        }
        if self.snapshot.len() > BAD_FEED_SNAPSHOT_LIMIT {
            return Err(Error::InvalidRecord(format!(
                "snapshot of {} bytes exceeds {} byte limit",
                self.snapshot.len(),
                BAD_FEED_SNAPSHOT_LIMIT
            )));
        }
        Ok(())
    }
}

/// Bad-feed record read back from the audit log
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BadFeedRecord {
    /// Unique database ID
    pub id: i64,
    /// Feed URL
    pub feed_url: String,
    /// Fetch or parse failure
    pub category: ErrorCategory,
    /// Underlying error message
    pub message: String,
    /// Leading part of the raw body
    pub snapshot: String,
    /// When the failure happened
    pub failed_at: DateTime<Utc>,
}

/// Persistent collections that can be counted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Collection {
    /// Normalized jobs
    Jobs,
    /// Import run audit log
    ImportRuns,
    /// Bad-feed audit log
    BadFeeds,
    /// Chunks waiting in the work queue
    QueueItems,
}

impl Collection {
    /// Backing table name
    pub fn table(&self) -> &'static str {
        match self {
            Collection::Jobs => "jobs",
            Collection::ImportRuns => "import_runs",
            Collection::BadFeeds => "bad_feeds",
            Collection::QueueItems => "queue_items",
        }
    }
}

/// Stream an event belongs to
///
/// Listeners that only care about finished imports subscribe to
/// [`EventChannel::Import`]; everything else is activity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventChannel {
    /// General progress stream
    Activity,
    /// Import completion notifications
    Import,
}

/// Event emitted during the ingestion lifecycle
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A fetch cycle started
    CycleStarted {
        /// When the event was published
        timestamp: DateTime<Utc>,
    },

    /// A whole feed failed to fetch or parse
    BadFeedEncountered {
        /// Feed URL
        url: String,
        /// Fetch or parse failure
        category: ErrorCategory,
        /// When the event was published
        timestamp: DateTime<Utc>,
    },

    /// Every feed in the cycle was fetched and its chunks dispatched
    FeedValidationCompleted {
        /// Feeds attempted in the cycle
        feeds: usize,
        /// Feeds that failed
        failed: usize,
        /// Chunks submitted to the queue
        chunks: usize,
        /// When the event was published
        timestamp: DateTime<Utc>,
    },

    /// The worker pool is ready and consuming chunks
    BatchProcessingInProgress {
        /// When the event was published
        timestamp: DateTime<Utc>,
    },

    /// The worker pool drained and stopped
    BatchProcessingCompleted {
        /// When the event was published
        timestamp: DateTime<Utc>,
    },

    /// An import run was written for one chunk
    RunLogged {
        /// Source feed identifier
        feed: String,
        /// Derived status
        status: ImportStatus,
        /// Entries stored for the first time
        new_jobs: usize,
        /// Existing entries whose fields changed
        updated_jobs: usize,
        /// Entries that could not be stored
        failed_jobs: usize,
        /// When the event was published
        timestamp: DateTime<Utc>,
    },

    /// Structured import completion notification
    ImportCompleted {
        /// Completion status ("Completed")
        status: String,
        /// When the event was published
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// `CycleStarted` stamped now
    pub fn cycle_started() -> Self {
        Event::CycleStarted {
            timestamp: Utc::now(),
        }
    }

    /// `BadFeedEncountered` stamped now
    pub fn bad_feed(url: impl Into<String>, category: ErrorCategory) -> Self {
        Event::BadFeedEncountered {
            url: url.into(),
            category,
            timestamp: Utc::now(),
        }
    }

    /// `BatchProcessingInProgress` stamped now
    pub fn processing_in_progress() -> Self {
        Event::BatchProcessingInProgress {
            timestamp: Utc::now(),
        }
    }

    /// `BatchProcessingCompleted` stamped now
    pub fn processing_completed() -> Self {
        Event::BatchProcessingCompleted {
            timestamp: Utc::now(),
        }
    }

    /// `ImportCompleted` stamped now
    pub fn import_completed() -> Self {
        Event::ImportCompleted {
            status: "Completed".to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Human-readable label shown by activity feeds
    pub fn label(&self) -> &'static str {
        match self {
            Event::CycleStarted { .. } => "Import process started",
            Event::BadFeedEncountered { .. } => "Bad feed encountered",
            Event::FeedValidationCompleted { .. } => "Data validation completed",
            Event::BatchProcessingInProgress { .. } => "Batch processing in progress",
            Event::BatchProcessingCompleted { .. } => "Batch processing completed",
            Event::RunLogged { .. } => "Import run logged",
            Event::ImportCompleted { .. } => "Import completed",
        }
    }

    /// Stream this event belongs to
    pub fn channel(&self) -> EventChannel {
        match self {
            Event::ImportCompleted { .. } => EventChannel::Import,
            _ => EventChannel::Activity,
        }
    }

    /// When the event was published
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::CycleStarted { timestamp }
            | Event::BadFeedEncountered { timestamp, .. }
            | Event::FeedValidationCompleted { timestamp, .. }
            | Event::BatchProcessingInProgress { timestamp }
            | Event::BatchProcessingCompleted { timestamp }
            | Event::RunLogged { timestamp, .. }
            | Event::ImportCompleted { timestamp, .. } => *timestamp,
        }
    }
}

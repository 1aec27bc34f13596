//! Error types for feed-ingest
//!
//! This module provides the error taxonomy for the ingestion pipeline:
//! - Feed-level failures ([`FeedError`]) that abort one feed's contribution to a cycle
//! - Entry-level failures ([`EntryError`]) that are recorded and never abort a chunk
//! - Database failures ([`DatabaseError`]) raised by the persistence layer
//! - The crate-wide [`Error`] with a stable machine-readable code per variant

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for feed-ingest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for feed-ingest
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "BATCH_SIZE")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Fetching or parsing a whole feed failed
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// A record failed validation at the store boundary
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Work queue operation failed
    #[error("queue error: {0}")]
    Queue(String),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shutdown in progress - not accepting new work
    #[error("shutdown in progress: not accepting new work")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a configuration error for a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Feed(e) => match e.category {
                ErrorCategory::FetchError => "fetch_error",
                ErrorCategory::ParsingError => "parsing_error",
            },
            Error::InvalidRecord(_) => "invalid_record",
            Error::Queue(_) => "queue_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Io(_) => "io_error",
            Error::ShuttingDown => "shutting_down",
            Error::Other(_) => "internal_error",
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Category of a feed-level failure, persisted with every bad-feed record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Transport-level failure reaching the feed (connection, timeout, HTTP status)
    FetchError,
    /// Feed body is not well-formed RSS or Atom
    ParsingError,
}

impl ErrorCategory {
    /// Stable string form used in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::FetchError => "FetchError",
            ErrorCategory::ParsingError => "ParsingError",
        }
    }

    /// Parse the database string form
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "FetchError" => Some(ErrorCategory::FetchError),
            "ParsingError" => Some(ErrorCategory::ParsingError),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A whole feed could not be fetched or parsed
///
/// Carries whatever part of the response body was retrieved so the failure can be
/// inspected later. The snapshot is already bounded by the feed client.
#[derive(Debug, Clone, Error)]
#[error("{category} for {url}: {message}")]
pub struct FeedError {
    /// Whether the fetch or the parse step failed
    pub category: ErrorCategory,
    /// Feed URL
    pub url: String,
    /// Underlying error message
    pub message: String,
    /// Leading part of the raw body (empty if nothing was received)
    pub snapshot: String,
}

impl FeedError {
    /// Transport-level failure
    pub fn fetch(url: impl Into<String>, message: impl Into<String>, snapshot: String) -> Self {
        Self {
            category: ErrorCategory::FetchError,
            url: url.into(),
            message: message.into(),
            snapshot,
        }
    }

    /// Body could not be parsed as a feed
    pub fn parsing(url: impl Into<String>, message: impl Into<String>, snapshot: String) -> Self {
        Self {
            category: ErrorCategory::ParsingError,
            url: url.into(),
            message: message.into(),
            snapshot,
        }
    }
}

/// Failure of a single feed entry inside a chunk
///
/// The `Display` output is the reason recorded in the import run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    /// Entry has neither a guid nor a link
    #[error("Missing identifier")]
    MissingIdentifier,

    /// The store rejected the write
    #[error("{0}")]
    Upsert(String),
}

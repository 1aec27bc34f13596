//! Feed fetching and parsing.
//!
//! One HTTP request per feed per cycle, no retries. The body is parsed as RSS 2.0
//! first and as Atom if that fails. When a whole feed cannot be fetched or
//! parsed, the failure is snapshotted into the bad-feed log and announced on the
//! event bus before it is returned to the caller.

use crate::config::{Config, FeedConfig, HeaderProfile};
use crate::error::{Error, FeedError, Result};
use crate::events::EventBus;
use crate::store::Store;
use crate::types::{BAD_FEED_SNAPSHOT_LIMIT, Event, FeedEntry, NewBadFeed};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fetches feeds and records the ones that fail
pub struct FeedClient {
    /// HTTP client for fetching feeds
    http_client: reqwest::Client,

    /// Feed list and header profiles
    feeds: FeedConfig,

    /// Where bad-feed snapshots are written
    store: Arc<dyn Store>,

    /// Where bad-feed events are published
    events: EventBus,
}

impl FeedClient {
    /// Create a new feed client
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(config: &Config, store: Arc<dyn Store>, events: EventBus) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.http.timeout)
            .user_agent(config.http.user_agent.clone())
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            feeds: config.feeds.clone(),
            store,
            events,
        })
    }

    /// Fetch and parse one feed
    ///
    /// On failure the bad-feed record is written and a `bad_feed_encountered`
    /// event is published before the error is returned. A failure to write the
    /// record is logged and otherwise ignored.
    pub async fn fetch_feed(&self, url: &str) -> Result<Vec<FeedEntry>> {
        let outcome = match self.fetch_body(url).await {
            Ok(body) => parse_feed(url, &body[..]),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(entries) => {
                info!(url = %url, entries = entries.len(), "feed fetched");
                Ok(entries)
            }
            Err(feed_err) => {
                warn!(
                    url = %url,
                    category = %feed_err.category,
                    error = %feed_err.message,
                    "feed failed"
                );
                self.record_bad_feed(&feed_err).await;
                Err(Error::Feed(feed_err))
            }
        }
    }

    /// Feed URLs this client was configured with
    pub fn feed_urls(&self) -> &[String] {
        &self.feeds.urls
    }

    /// Issue the single GET for a feed and read its raw body
    ///
    /// The body stays as bytes so the XML parser can decode it with the
    /// encoding the document declares.
    async fn fetch_body(&self, url: &str) -> std::result::Result<Vec<u8>, FeedError> {
        debug!(url = %url, "fetching feed");

        let mut request = self.http_client.get(url);
        if let Some(profile) = self.feeds.profile_for(url) {
            debug!(url = %url, headers = profile.headers.len(), "applying header profile");
            request = request.headers(header_map(profile));
        }

        let response = request
            .send()
            .await
            .map_err(|e| FeedError::fetch(url, format!("request failed: {}", e), String::new()))?;

        // Check HTTP status before trying to parse the response body
        let status = response.status();
        if !status.is_success() {
            let snapshot = match response.bytes().await {
                Ok(bytes) => snapshot_from_bytes(&bytes),
                Err(_) => String::new(),
            };
            return Err(FeedError::fetch(
                url,
                format!("HTTP {}", status.as_u16()),
                snapshot,
            ));
        }

        let bytes = response.bytes().await.map_err(|e| {
            FeedError::fetch(url, format!("failed to read body: {}", e), String::new())
        })?;

        Ok(bytes.to_vec())
    }

    async fn record_bad_feed(&self, err: &FeedError) {
        let record = NewBadFeed {
            feed_url: err.url.clone(),
            category: err.category,
            message: err.message.clone(),
            snapshot: truncate_snapshot(&err.snapshot),
            failed_at: chrono::Utc::now(),
        };

        if let Err(e) = self.store.append_bad_feed(&record).await {
            warn!(url = %err.url, error = %e, "failed to record bad feed");
        }

        self.events.publish(Event::bad_feed(&err.url, err.category));
    }
}

/// Parse a feed body, RSS first and Atom as fallback
///
/// The body is handed to the XML reader as bytes, so documents declaring a
/// non-UTF-8 encoding (ISO-8859-1 and the like) decode correctly.
/// A document with no items is zero entries, not an error.
pub fn parse_feed(
    url: &str,
    content: impl AsRef<[u8]>,
) -> std::result::Result<Vec<FeedEntry>, FeedError> {
    let content = content.as_ref();
    match parse_as_rss(content) {
        Ok(entries) => {
            debug!(url = %url, entries = entries.len(), "parsed as RSS");
            Ok(entries)
        }
        Err(rss_err) => {
            debug!(url = %url, error = %rss_err, "not RSS, trying Atom");
            match parse_as_atom(content) {
                Ok(entries) => {
                    debug!(url = %url, entries = entries.len(), "parsed as Atom");
                    Ok(entries)
                }
                Err(atom_err) => Err(FeedError::parsing(
                    url,
                    format!(
                        "not an RSS or Atom feed. RSS error: {}. Atom error: {}",
                        rss_err, atom_err
                    ),
                    snapshot_from_bytes(content),
                )),
            }
        }
    }
}

fn parse_as_rss(content: &[u8]) -> std::result::Result<Vec<FeedEntry>, rss::Error> {
    let channel = rss::Channel::read_from(content)?;

    Ok(channel
        .items()
        .iter()
        .map(|item| FeedEntry {
            title: item.title().map(String::from),
            description: item.description().map(String::from),
            author: item.author().map(String::from).or_else(|| {
                item.dublin_core_ext()
                    .and_then(|dc| dc.creators().first().cloned())
            }),
            link: item.link().map(String::from),
            guid: item.guid().map(|g| g.value().to_string()),
            pub_date: item.pub_date().map(String::from),
        })
        .collect())
}

fn parse_as_atom(content: &[u8]) -> std::result::Result<Vec<FeedEntry>, atom_syndication::Error> {
    let feed = atom_syndication::Feed::read_from(content)?;

    Ok(feed
        .entries()
        .iter()
        .map(|entry| {
            // Prefer the alternate link, otherwise whatever comes first
            let link = entry
                .links()
                .iter()
                .find(|l| l.rel() == "alternate")
                .or_else(|| entry.links().first())
                .map(|l| l.href().to_string());

            let authors: Vec<&str> = entry.authors().iter().map(|p| p.name()).collect();

            let description = entry
                .summary()
                .map(|s| s.as_str().to_string())
                .or_else(|| entry.content().and_then(|c| c.value().map(String::from)));

            let pub_date = entry.published().unwrap_or(entry.updated()).to_rfc3339();

            FeedEntry {
                title: Some(entry.title().as_str().to_string()).filter(|t| !t.is_empty()),
                description,
                author: Some(authors.join(", ")).filter(|a| !a.is_empty()),
                link,
                guid: Some(entry.id().to_string()).filter(|id| !id.is_empty()),
                pub_date: Some(pub_date),
            }
        })
        .collect())
}

/// Headers for a profile, skipping any that are not valid HTTP headers
fn header_map(profile: &HeaderProfile) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in &profile.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!(url = %profile.url, header = %name, "skipping invalid header"),
        }
    }
    map
}

/// Cut a body down to the bad-feed snapshot limit on a character boundary
pub fn truncate_snapshot(body: &str) -> String {
    if body.len() <= BAD_FEED_SNAPSHOT_LIMIT {
        return body.to_string();
    }
    let mut end = BAD_FEED_SNAPSHOT_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

/// Snapshot of a raw body: the leading bytes up to the limit, decoded lossily
///
/// Invalid sequences become U+FFFD, which can grow the text, so the decoded
/// string is cut to the limit again on a character boundary.
pub fn snapshot_from_bytes(body: &[u8]) -> String {
    let head = &body[..body.len().min(BAD_FEED_SNAPSHOT_LIMIT)];
    truncate_snapshot(&String::from_utf8_lossy(head))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use super::*;
use crate::error::ErrorCategory;
use crate::test_helpers::{FlakyStore, create_test_database, rss_document};
use crate::types::Collection;
use std::collections::BTreeMap;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn create_test_client(
    config: Config,
) -> (FeedClient, Arc<FlakyStore>, EventBus, tempfile::TempDir) {
    let (db, temp_dir) = create_test_database().await;
    let store = Arc::new(FlakyStore::new(db));
    let events = EventBus::new(64);
    let client = FeedClient::new(&config, store.clone(), events.clone()).unwrap();
    (client, store, events, temp_dir)
}

fn unwrap_feed_error(result: Result<Vec<FeedEntry>>) -> FeedError {
    match result {
        Err(Error::Feed(e)) => e,
        other => panic!("expected a feed error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_fetch_rss_feed() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(rss_document(&[("g1", "Lecturer"), ("g2", "Dean")])),
        )
        .mount(&mock_server)
        .await;

    let (client, _store, _events, _dir) = create_test_client(Config::default()).await;
    let entries = client
        .fetch_feed(&format!("{}/rss", mock_server.uri()))
        .await
        .unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].guid.as_deref(), Some("g1"));
    assert_eq!(entries[0].title.as_deref(), Some("Lecturer"));
    assert_eq!(entries[0].link.as_deref(), Some("https://jobs.example/g1"));
    assert_eq!(entries[0].author.as_deref(), Some("hr@jobs.example"));
    assert_eq!(
        entries[0].pub_date.as_deref(),
        Some("Mon, 01 Jan 2024 12:00:00 +0000")
    );
    assert_eq!(entries[1].guid.as_deref(), Some("g2"));
}

#[test]
fn test_parse_atom_feed() {
    let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
    <title>Test Atom Feed</title>
    <id>urn:uuid:feed</id>
    <updated>2024-01-01T12:00:00Z</updated>
    <entry>
        <title>Professor of Physics</title>
        <id>urn:uuid:entry-1</id>
        <link rel="alternate" href="https://jobs.example/physics"/>
        <updated>2024-01-02T09:00:00Z</updated>
        <published>2024-01-01T08:00:00Z</published>
        <author><name>Faculty Office</name></author>
        <summary>Tenure track</summary>
    </entry>
</feed>"#;

    let entries = parse_feed("https://a.example/atom", atom).unwrap();
    assert_eq!(entries.len(), 1);

    let entry = &entries[0];
    assert_eq!(entry.guid.as_deref(), Some("urn:uuid:entry-1"));
    assert_eq!(entry.title.as_deref(), Some("Professor of Physics"));
    assert_eq!(entry.link.as_deref(), Some("https://jobs.example/physics"));
    assert_eq!(entry.author.as_deref(), Some("Faculty Office"));
    assert_eq!(entry.description.as_deref(), Some("Tenure track"));
    assert_eq!(entry.pub_date.as_deref(), Some("2024-01-01T08:00:00+00:00"));
}

#[test]
fn test_empty_channel_is_zero_entries() {
    let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Empty</title><link>https://x</link><description>none</description></channel></rss>"#;
    let entries = parse_feed("https://a.example/rss", rss).unwrap();
    assert!(entries.is_empty());
}

#[test]
fn test_item_without_guid_or_link_is_still_an_entry() {
    let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>T</title><link>https://x</link><description>d</description>
<item><title>Orphan</title></item>
</channel></rss>"#;
    let entries = parse_feed("https://a.example/rss", rss).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].guid, None);
    assert_eq!(entries[0].link, None);
    assert_eq!(entries[0].pub_date, None);
}

#[test]
fn test_non_feed_body_is_parsing_error() {
    let err = parse_feed("https://a.example/rss", "<html><body>Maintenance</body></html>")
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::ParsingError);
    assert_eq!(err.snapshot, "<html><body>Maintenance</body></html>");
    assert!(err.message.contains("RSS error"));
}

#[tokio::test]
async fn test_http_error_is_fetch_error_and_recorded() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
        .mount(&mock_server)
        .await;

    let (client, store, events, _dir) = create_test_client(Config::default()).await;
    let mut rx = events.subscribe();
    let url = format!("{}/broken", mock_server.uri());

    let err = unwrap_feed_error(client.fetch_feed(&url).await);
    assert_eq!(err.category, ErrorCategory::FetchError);
    assert_eq!(err.message, "HTTP 503");

    let records = store.db.bad_feeds_for_url(&url).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].category, ErrorCategory::FetchError);
    assert_eq!(records[0].snapshot, "upstream down");

    match rx.try_recv().unwrap() {
        Event::BadFeedEncountered {
            url: event_url,
            category,
            ..
        } => {
            assert_eq!(event_url, url);
            assert_eq!(category, ErrorCategory::FetchError);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_body_is_parsing_error_and_recorded() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/garbage"))
        .respond_with(ResponseTemplate::new(200).set_body_string("this is not xml at all"))
        .mount(&mock_server)
        .await;

    let (client, store, _events, _dir) = create_test_client(Config::default()).await;
    let url = format!("{}/garbage", mock_server.uri());

    let err = unwrap_feed_error(client.fetch_feed(&url).await);
    assert_eq!(err.category, ErrorCategory::ParsingError);

    let records = store.db.bad_feeds_for_url(&url).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].category, ErrorCategory::ParsingError);
    assert_eq!(records[0].snapshot, "this is not xml at all");
}

#[tokio::test]
async fn test_large_body_snapshot_is_truncated_to_limit() {
    let mock_server = MockServer::start().await;
    let body = "x".repeat(50 * 1024);
    Mock::given(method("GET"))
        .and(path("/huge"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&mock_server)
        .await;

    let (client, store, _events, _dir) = create_test_client(Config::default()).await;
    let url = format!("{}/huge", mock_server.uri());

    let err = unwrap_feed_error(client.fetch_feed(&url).await);
    assert_eq!(err.snapshot.len(), 10240);

    let records = store.db.bad_feeds_for_url(&url).await.unwrap();
    assert_eq!(records[0].snapshot.len(), 10240);
}

#[tokio::test]
async fn test_unreachable_feed_is_fetch_error_with_empty_snapshot() {
    // Bind then drop a listener so the port is closed
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let (client, store, _events, _dir) = create_test_client(Config::default()).await;
    let url = format!("http://127.0.0.1:{port}/rss");

    let err = unwrap_feed_error(client.fetch_feed(&url).await);
    assert_eq!(err.category, ErrorCategory::FetchError);
    assert!(err.snapshot.is_empty());
    assert_eq!(store.count(Collection::BadFeeds).await.unwrap(), 1);
}

#[tokio::test]
async fn test_timeout_is_fetch_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(rss_document(&[("g1", "Slow")]))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&mock_server)
        .await;

    let mut config = Config::default();
    config.http.timeout = Duration::from_millis(200);
    let (client, _store, _events, _dir) = create_test_client(config).await;

    let err = unwrap_feed_error(
        client
            .fetch_feed(&format!("{}/slow", mock_server.uri()))
            .await,
    );
    assert_eq!(err.category, ErrorCategory::FetchError);
}

#[tokio::test]
async fn test_bad_feed_write_failure_does_not_propagate() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let (client, store, events, _dir) = create_test_client(Config::default()).await;
    store.set_fail_bad_feeds(true);
    let mut rx = events.subscribe();

    let err = unwrap_feed_error(
        client
            .fetch_feed(&format!("{}/broken", mock_server.uri()))
            .await,
    );
    assert_eq!(err.category, ErrorCategory::FetchError);
    assert_eq!(store.count(Collection::BadFeeds).await.unwrap(), 0);

    // The event still goes out
    assert!(matches!(
        rx.try_recv().unwrap(),
        Event::BadFeedEncountered { .. }
    ));
}

#[tokio::test]
async fn test_header_profile_applies_only_on_exact_url_match() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss_document(&[])))
        .mount(&mock_server)
        .await;

    let special = format!("{}/special", mock_server.uri());
    let plain = format!("{}/special?page=2", mock_server.uri());

    let mut config = Config::default();
    config.feeds.header_profiles = vec![HeaderProfile {
        url: special.clone(),
        headers: BTreeMap::from([
            ("Referer".to_string(), "https://jobs.example/".to_string()),
            ("User-Agent".to_string(), "Mozilla/5.0 Test".to_string()),
        ]),
    }];
    let (client, _store, _events, _dir) = create_test_client(config).await;

    client.fetch_feed(&special).await.unwrap();
    client.fetch_feed(&plain).await.unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);

    let with_profile = &requests[0];
    assert_eq!(
        with_profile.headers.get("referer").unwrap(),
        "https://jobs.example/"
    );
    assert_eq!(
        with_profile.headers.get("user-agent").unwrap(),
        "Mozilla/5.0 Test"
    );

    let without_profile = &requests[1];
    assert!(without_profile.headers.get("referer").is_none());
    assert!(
        without_profile
            .headers
            .get("user-agent")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("feed-ingest/")
    );
}

#[test]
fn test_truncate_snapshot_respects_char_boundaries() {
    assert_eq!(truncate_snapshot("short"), "short");

    // 'é' is two bytes; put one straddling the limit
    let mut body = "a".repeat(BAD_FEED_SNAPSHOT_LIMIT - 1);
    body.push('é');
    body.push_str("tail");

    let snapshot = truncate_snapshot(&body);
    assert_eq!(snapshot.len(), BAD_FEED_SNAPSHOT_LIMIT - 1);
    assert!(snapshot.chars().all(|c| c == 'a'));
}

fn latin1_rss() -> Vec<u8> {
    let mut body = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\n\
<rss version=\"2.0\"><channel><title>Offres</title><link>https://emploi.example</link>\
<description>Postes</description><item><guid>c1</guid><title>Caf"
        .to_vec();
    body.push(0xE9);
    body.extend_from_slice(b" manager</title></item></channel></rss>");
    body
}

#[test]
fn test_parse_feed_decodes_declared_latin1_encoding() {
    let entries = parse_feed("https://emploi.example/rss", latin1_rss()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].title.as_deref(), Some("Café manager"));
}

#[tokio::test]
async fn test_fetch_latin1_feed_keeps_accented_characters() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latin1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(latin1_rss(), "application/rss+xml; charset=iso-8859-1"),
        )
        .mount(&mock_server)
        .await;

    let (client, _store, _events, _dir) = create_test_client(Config::default()).await;
    let entries = client
        .fetch_feed(&format!("{}/latin1", mock_server.uri()))
        .await
        .unwrap();

    assert_eq!(entries[0].guid.as_deref(), Some("c1"));
    assert_eq!(entries[0].title.as_deref(), Some("Café manager"));
}

#[test]
fn test_snapshot_from_bytes_stays_within_limit_for_invalid_utf8() {
    // Every byte becomes a three-byte replacement character when decoded
    let body = vec![0xE9u8; 50 * 1024];
    let snapshot = snapshot_from_bytes(&body);

    assert!(snapshot.len() <= BAD_FEED_SNAPSHOT_LIMIT);
    assert!(snapshot.chars().all(|c| c == char::REPLACEMENT_CHARACTER));
    assert_eq!(snapshot_from_bytes(b"plain"), "plain");
}

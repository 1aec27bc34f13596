use super::*;
use crate::error::Error;
use crate::test_helpers::{FlakyStore, create_test_database, entry};
use crate::types::Collection;

async fn create_test_processor() -> (BatchProcessor, Arc<FlakyStore>, EventBus, tempfile::TempDir) {
    let (db, temp_dir) = create_test_database().await;
    let store = Arc::new(FlakyStore::new(db));
    let events = EventBus::new(64);
    let processor = BatchProcessor::new(store.clone(), events.clone());
    (processor, store, events, temp_dir)
}

fn chunk(entries: Vec<FeedEntry>) -> BatchPayload {
    BatchPayload {
        feed: "https://jobs.example/rss".to_string(),
        entries,
    }
}

fn tally(total: usize, new_jobs: usize, updated_jobs: usize, failed: usize) -> BatchTally {
    BatchTally {
        total_fetched: total,
        new_jobs,
        updated_jobs,
        failed_jobs: (0..failed)
            .map(|i| FailedJob {
                natural_id: format!("f{i}"),
                reason: "boom".into(),
            })
            .collect(),
    }
}

// --- natural identifier resolution ---

#[test]
fn guid_wins_over_link() {
    let e = entry(Some("g1"), Some("http://x"), "Job");
    assert_eq!(resolve_natural_id(&e).as_deref(), Some("g1"));
}

#[test]
fn link_is_used_when_guid_is_absent_or_blank() {
    let e = entry(None, Some("http://x"), "Job");
    assert_eq!(resolve_natural_id(&e).as_deref(), Some("http://x"));

    let e = entry(Some("   "), Some(" http://x "), "Job");
    assert_eq!(resolve_natural_id(&e).as_deref(), Some("http://x"));
}

#[test]
fn no_guid_and_no_link_is_unresolved() {
    assert_eq!(resolve_natural_id(&entry(None, None, "Job")), None);
    assert_eq!(resolve_natural_id(&entry(Some(""), Some(" "), "Job")), None);
}

#[test]
fn normalize_defaults_missing_fields() {
    let raw = FeedEntry {
        guid: Some("g1".into()),
        pub_date: Some("not a date".into()),
        ..Default::default()
    };
    let job = normalize(&raw, "g1".into());
    assert_eq!(job.title, "");
    assert_eq!(job.description, "");
    assert_eq!(job.author, "");
    assert_eq!(job.link, "");
    assert_eq!(job.guid, "g1");
    assert_eq!(job.pub_date, PublicationDate::Invalid);
}

// --- outcome classification ---

#[test]
fn all_failed_is_failed() {
    assert_eq!(classify_outcome(&tally(10, 0, 0, 10)), ImportStatus::Failed);
}

#[test]
fn all_imported_is_success() {
    assert_eq!(classify_outcome(&tally(10, 7, 3, 0)), ImportStatus::Success);
}

#[test]
fn mixed_is_partial() {
    assert_eq!(classify_outcome(&tally(10, 4, 2, 4)), ImportStatus::Partial);
}

#[test]
fn unchanged_entries_make_a_run_partial() {
    assert_eq!(classify_outcome(&tally(10, 0, 0, 0)), ImportStatus::Partial);
}

#[test]
fn empty_chunk_is_failed() {
    assert_eq!(classify_outcome(&tally(0, 0, 0, 0)), ImportStatus::Failed);
}

// --- processing ---

#[tokio::test]
async fn missing_identifier_is_recorded_and_the_rest_processed() {
    let (processor, store, _events, _dir) = create_test_processor().await;

    let payload = chunk(vec![
        entry(Some("g1"), None, "A"),
        entry(Some("g2"), None, "B"),
        entry(None, None, "Orphan"),
        entry(None, Some("https://jobs.example/d"), "D"),
        entry(Some("g5"), None, "E"),
    ]);

    let result = processor.process(&payload).await.unwrap();
    assert_eq!(result.tally.total_fetched, 5);
    assert_eq!(result.tally.new_jobs, 4);
    assert_eq!(
        result.tally.failed_jobs,
        vec![FailedJob {
            natural_id: "<missing>".into(),
            reason: "Missing identifier".into(),
        }]
    );
    assert_eq!(result.status, ImportStatus::Partial);
    assert_eq!(store.count(Collection::Jobs).await.unwrap(), 4);
}

#[tokio::test]
async fn replaying_a_chunk_converges_without_duplicates() {
    let (processor, store, _events, _dir) = create_test_processor().await;

    let payload = chunk(vec![
        entry(Some("g1"), None, "A"),
        entry(Some("g2"), None, "B"),
        entry(Some("g3"), None, "C"),
    ]);

    let first = processor.process(&payload).await.unwrap();
    assert_eq!(first.tally.new_jobs, 3);
    assert_eq!(first.status, ImportStatus::Success);

    let second = processor.process(&payload).await.unwrap();
    assert_eq!(second.tally.new_jobs, 0);
    assert_eq!(second.tally.updated_jobs, 0);
    assert!(second.tally.failed_jobs.is_empty());

    assert_eq!(store.count(Collection::Jobs).await.unwrap(), 3);
    assert_eq!(store.count(Collection::ImportRuns).await.unwrap(), 2);
}

#[tokio::test]
async fn changed_entry_on_replay_counts_as_updated() {
    let (processor, store, _events, _dir) = create_test_processor().await;

    processor
        .process(&chunk(vec![entry(Some("g1"), None, "Lecturer")]))
        .await
        .unwrap();
    let result = processor
        .process(&chunk(vec![entry(Some("g1"), None, "Senior Lecturer")]))
        .await
        .unwrap();

    assert_eq!(result.tally.new_jobs, 0);
    assert_eq!(result.tally.updated_jobs, 1);
    assert_eq!(result.status, ImportStatus::Success);

    let stored = store.db.get_job("g1").await.unwrap().unwrap();
    assert_eq!(stored.title, "Senior Lecturer");
}

#[tokio::test]
async fn store_error_is_recorded_with_its_message() {
    let (processor, store, _events, _dir) = create_test_processor().await;
    store.fail_upsert_of("g2");

    let result = processor
        .process(&chunk(vec![
            entry(Some("g1"), None, "A"),
            entry(Some("g2"), None, "B"),
        ]))
        .await
        .unwrap();

    assert_eq!(result.tally.new_jobs, 1);
    assert_eq!(
        result.tally.failed_jobs,
        vec![FailedJob {
            natural_id: "g2".into(),
            reason: "write rejected for g2".into(),
        }]
    );
    assert_eq!(result.status, ImportStatus::Partial);
}

#[tokio::test]
async fn all_failed_chunk_still_writes_a_run() {
    let (processor, store, _events, _dir) = create_test_processor().await;

    let result = processor
        .process(&chunk(vec![entry(None, None, "A"), entry(None, None, "B")]))
        .await
        .unwrap();
    assert_eq!(result.status, ImportStatus::Failed);

    let run = store.db.get_import_run(result.run_id).await.unwrap().unwrap();
    assert_eq!(run.status, ImportStatus::Failed);
    assert_eq!(run.total_fetched, 2);
    assert_eq!(run.failed_jobs.len(), 2);
}

#[tokio::test]
async fn audit_write_failure_is_returned() {
    let (processor, store, _events, _dir) = create_test_processor().await;
    store.set_fail_import_runs(true);

    let err = processor
        .process(&chunk(vec![entry(Some("g1"), None, "A")]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Other(_)));

    // The entry itself was stored; the replay will find it unchanged
    assert_eq!(store.count(Collection::Jobs).await.unwrap(), 1);
    assert_eq!(store.count(Collection::ImportRuns).await.unwrap(), 0);
}

#[tokio::test]
async fn run_logged_event_carries_counts() {
    let (processor, _store, events, _dir) = create_test_processor().await;
    let mut rx = events.subscribe();

    processor
        .process(&chunk(vec![entry(Some("g1"), None, "A"), entry(None, None, "B")]))
        .await
        .unwrap();

    match rx.try_recv().unwrap() {
        Event::RunLogged {
            feed,
            status,
            new_jobs,
            updated_jobs,
            failed_jobs,
            ..
        } => {
            assert_eq!(feed, "https://jobs.example/rss");
            assert_eq!(status, ImportStatus::Partial);
            assert_eq!((new_jobs, updated_jobs, failed_jobs), (1, 0, 1));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tessera_node::{
    DeleteMode, EventData, EventNumber, ExpectedVersion, LogPosition, LogRecord, SliceReadStatus, Store, StoreConfig,
    StreamMetadata, StreamPosition,
};
use tessera_persistence::checkpoint::{Checkpoint, CheckpointManager};
use tessera_persistence::idx::INDEX_FILE_NAME;
use tokio_util::sync::CancellationToken;

const CHUNK: u64 = 2048;

fn config(dir: &Path) -> StoreConfig {
    StoreConfig::new(dir).with_chunk_size(CHUNK).with_sync_on_write(false)
}

fn fill(store: &Store, stream: &str, count: usize) {
    for i in 0..count {
        store
            .append_to_stream(stream, ExpectedVersion::Any, vec![EventData::new("Filled", format!("{}#{}", stream, i))])
            .unwrap();
    }
}

fn whole_log(store: &Store) -> Vec<LogRecord> {
    let mut records = Vec::new();
    let mut from = LogPosition::ZERO;
    loop {
        let slice = store.read_all_forward(from, 100).unwrap();
        records.extend(slice.events);
        from = slice.next_position;
        if slice.is_end {
            return records;
        }
    }
}

fn chunk_versions(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .filter(|n| n.starts_with("chunk-"))
        .collect();
    names.sort();
    names
}

#[test]
fn test_scavenge_without_garbage_is_idempotent() {
    let dir = tempdir().unwrap();
    let store = Store::open(config(dir.path())).unwrap();
    fill(&store, "a", 40);
    fill(&store, "b", 40);
    let before = whole_log(&store);

    let report = store.scavenge(&CancellationToken::new()).unwrap();
    assert!(report.chunks_scavenged > 0);
    assert_eq!(report.records_dropped, 0);
    assert_eq!(report.chunks_skipped, 0);
    assert_eq!(whole_log(&store), before);

    let again = store.scavenge(&CancellationToken::new()).unwrap();
    assert_eq!(again.records_dropped, 0);
    assert_eq!(whole_log(&store), before);
}

#[test]
fn test_scavenge_drops_unreadable_records() {
    let dir = tempdir().unwrap();
    let store = Store::open(config(dir.path())).unwrap();
    fill(&store, "trimmed", 30);
    fill(&store, "deleted", 10);
    fill(&store, "kept", 10);
    for n in 0..3u64 {
        let meta = StreamMetadata::new().with_truncate_before(EventNumber(20 + n));
        store.set_stream_metadata("trimmed", ExpectedVersion::Any, meta).unwrap();
    }
    store.delete_stream("deleted", ExpectedVersion::Any, DeleteMode::Hard).unwrap();
    // Push everything above into completed chunks.
    fill(&store, "padding", 40);

    let visible_before = store.read_stream_forward("trimmed", StreamPosition::Start, 100, false).unwrap();
    let report = store.scavenge(&CancellationToken::new()).unwrap();
    assert!(report.records_dropped >= 22 + 10 + 2, "{:?}", report);
    assert!(report.bytes_reclaimed > 0);

    let visible_after = store.read_stream_forward("trimmed", StreamPosition::Start, 100, false).unwrap();
    assert_eq!(visible_after, visible_before);
    assert_eq!(visible_after.event_numbers(), (22..30u64).collect::<Vec<_>>());
    assert_eq!(
        store.read_stream_forward("kept", StreamPosition::Start, 100, false).unwrap().events.len(),
        10
    );
    let log = whole_log(&store);
    assert!(log.iter().all(|r| r.stream.as_str() != "deleted" || r.event_number == EventNumber::DELETED));

    store.close().unwrap();
    drop(store);
    std::fs::remove_file(dir.path().join(INDEX_FILE_NAME)).unwrap();

    // A rebuilt index still knows versions and deletions.
    let store = Store::open(config(dir.path())).unwrap();
    assert!(!store.recovery_report().index_loaded);
    let trimmed = store.read_stream_forward("trimmed", StreamPosition::Start, 100, false).unwrap();
    assert_eq!(trimmed.event_numbers(), (22..30u64).collect::<Vec<_>>());
    assert_eq!(store.get_stream_metadata("trimmed").unwrap().version, Some(EventNumber(2)));
    let deleted = store.read_stream_forward("deleted", StreamPosition::Start, 100, false).unwrap();
    assert_eq!(deleted.status, SliceReadStatus::StreamDeleted);
    store
        .append_to_stream("trimmed", ExpectedVersion::Exact(EventNumber(29)), vec![EventData::new("Filled", "more")])
        .unwrap();
}

#[test]
fn test_soft_deleted_stream_keeps_version_after_scavenge() {
    let dir = tempdir().unwrap();
    let store = Store::open(config(dir.path())).unwrap();
    fill(&store, "cart", 15);
    store.delete_stream("cart", ExpectedVersion::Any, DeleteMode::Soft).unwrap();
    fill(&store, "padding", 40);
    store.scavenge(&CancellationToken::new()).unwrap();
    store.close().unwrap();
    drop(store);
    std::fs::remove_file(dir.path().join(INDEX_FILE_NAME)).unwrap();

    let store = Store::open(config(dir.path())).unwrap();
    let res = store.append_to_stream("cart", ExpectedVersion::Exact(EventNumber(14)), vec![EventData::new("Filled", "x")]);
    assert_eq!(res.unwrap().next_expected_version, EventNumber(15));
    let slice = store.read_stream_forward("cart", StreamPosition::Start, 100, false).unwrap();
    assert_eq!(slice.event_numbers(), vec![15]);
}

#[test]
fn test_cancelled_scavenge_leaves_chunks_untouched() {
    let dir = tempdir().unwrap();
    let store = Store::open(config(dir.path())).unwrap();
    fill(&store, "a", 60);
    store
        .set_stream_metadata("a", ExpectedVersion::Any, StreamMetadata::new().with_max_count(1))
        .unwrap();
    let files = chunk_versions(dir.path());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = store.scavenge(&cancel).unwrap();
    assert!(report.cancelled);
    assert_eq!(report.chunks_scavenged, 0);
    assert_eq!(chunk_versions(dir.path()), files);
    assert_eq!(
        store.read_stream_backward("a", StreamPosition::End, 5, false).unwrap().event_numbers(),
        vec![59]
    );
}

#[test]
fn test_reads_during_scavenge() {
    let dir = tempdir().unwrap();
    let store = Store::open(config(dir.path())).unwrap();
    fill(&store, "hot", 80);
    store
        .set_stream_metadata("hot", ExpectedVersion::Any, StreamMetadata::new().with_max_count(40))
        .unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let store = store.clone();
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            let mut reads = 0;
            while !done.load(Ordering::Acquire) || reads == 0 {
                let slice = store.read_stream_backward("hot", StreamPosition::End, 40, false).unwrap();
                assert_eq!(slice.event_numbers(), (40..80u64).rev().collect::<Vec<_>>());
                reads += 1;
            }
            reads
        })
    };
    for _ in 0..3 {
        store.scavenge(&CancellationToken::new()).unwrap();
    }
    done.store(true, Ordering::Release);
    assert!(reader.join().unwrap() > 0);
}

#[tokio::test]
async fn test_background_tasks_checkpoint_and_scavenge() {
    let dir = tempdir().unwrap();
    let cfg = config(dir.path())
        .with_checkpoint_interval(Duration::from_millis(10))
        .with_scavenge_interval(Duration::from_millis(50));
    let store = Store::open(cfg).unwrap();
    let tasks = store.spawn_background();

    fill(&store, "bg", 60);
    store
        .set_stream_metadata("bg", ExpectedVersion::Any, StreamMetadata::new().with_max_count(2))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    tasks.shutdown().await;

    let checkpoint = CheckpointManager::new(dir.path()).read(Checkpoint::Writer).unwrap();
    assert_eq!(checkpoint, Some(store.write_position()));
    assert!(chunk_versions(dir.path()).iter().any(|n| !n.ends_with(".000000")));
    assert_eq!(
        store.read_stream_forward("bg", StreamPosition::Start, 100, false).unwrap().event_numbers(),
        vec![58, 59]
    );
    store.close().unwrap();
}

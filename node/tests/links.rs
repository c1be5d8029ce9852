// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use tempfile::{tempdir, TempDir};
use tessera_node::{
    DeleteMode, EventData, EventNumber, ExpectedVersion, RecordBody, Store, StoreConfig, StreamMetadata,
    StreamPosition,
};

fn open_store() -> (TempDir, Store) {
    let dir = tempdir().unwrap();
    let cfg = StoreConfig::new(dir.path()).with_chunk_size(16 * 1024).with_sync_on_write(false);
    let store = Store::open(cfg).unwrap();
    (dir, store)
}

fn seed(store: &Store, stream: &str, count: usize) {
    let events = (0..count).map(|i| EventData::new("Source", format!("{}:{}", stream, i))).collect();
    store.append_to_stream(stream, ExpectedVersion::Any, events).unwrap();
}

fn link(store: &Store, from: &str, target: &str, n: u64) {
    store
        .append_to_stream(from, ExpectedVersion::Any, vec![EventData::link(target, EventNumber(n))])
        .unwrap();
}

#[test]
fn test_links_resolve_to_targets() {
    let (_dir, store) = open_store();
    seed(&store, "orders-1", 2);
    seed(&store, "orders-2", 2);
    link(&store, "by-category", "orders-1", 1);
    link(&store, "by-category", "orders-2", 0);

    let slice = store.read_stream_forward("by-category", StreamPosition::Start, 10, true).unwrap();
    assert_eq!(slice.events.len(), 2);
    assert!(slice.events.iter().all(|e| e.is_resolved()));
    assert_eq!(slice.events[0].event.data(), b"orders-1:1");
    assert_eq!(slice.events[1].event.data(), b"orders-2:0");
    assert_eq!(slice.event_numbers(), vec![0, 1]);

    let raw = store.read_stream_forward("by-category", StreamPosition::Start, 10, false).unwrap();
    assert!(raw.events.iter().all(|e| !e.is_resolved() && e.event.is_link()));
}

#[test]
fn test_link_to_deleted_stream_is_dropped() {
    let (_dir, store) = open_store();
    seed(&store, "soft", 1);
    seed(&store, "hard", 1);
    seed(&store, "alive", 1);
    link(&store, "index", "soft", 0);
    link(&store, "index", "hard", 0);
    link(&store, "index", "alive", 0);
    store.delete_stream("soft", ExpectedVersion::Any, DeleteMode::Soft).unwrap();
    store.delete_stream("hard", ExpectedVersion::Any, DeleteMode::Hard).unwrap();

    let slice = store.read_stream_forward("index", StreamPosition::Start, 10, true).unwrap();
    assert_eq!(slice.events.len(), 1);
    assert_eq!(slice.events[0].event.data(), b"alive:0");
    assert_eq!(slice.events[0].original_event_number(), EventNumber(2));
}

#[test]
fn test_link_to_truncated_event_is_dropped() {
    let (_dir, store) = open_store();
    seed(&store, "source", 5);
    link(&store, "refs", "source", 0);
    link(&store, "refs", "source", 4);
    store
        .set_stream_metadata("source", ExpectedVersion::Any, StreamMetadata::new().with_max_count(2))
        .unwrap();

    let slice = store.read_stream_backward("refs", StreamPosition::End, 10, true).unwrap();
    assert_eq!(slice.events.len(), 1);
    assert_eq!(slice.events[0].event.data(), b"source:4");
}

#[test]
fn test_missing_target_surfaces_the_link() {
    let (_dir, store) = open_store();
    seed(&store, "short", 1);
    link(&store, "dangling", "nowhere", 0);
    link(&store, "dangling", "short", 7);

    let slice = store.read_stream_forward("dangling", StreamPosition::Start, 10, true).unwrap();
    assert_eq!(slice.events.len(), 2);
    for event in &slice.events {
        assert!(!event.is_resolved());
        assert!(matches!(event.event.body, RecordBody::Link { .. }));
    }
}

#[test]
fn test_read_event_resolves_links() {
    let (_dir, store) = open_store();
    seed(&store, "target", 1);
    link(&store, "pointer", "target", 0);
    let read = store.read_event("pointer", EventNumber(0), true).unwrap();
    let event = read.event.unwrap();
    assert_eq!(event.event.data(), b"target:0");
    assert_eq!(event.original_event().stream.as_str(), "pointer");
}

// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use serde_json::json;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tessera_node::{
    DeleteMode, EngineError, EventData, EventNumber, ExpectedVersion, SliceReadStatus, Store, StoreConfig,
    StreamMetadata, StreamPosition,
};

fn open_store() -> (TempDir, Store) {
    let dir = tempdir().unwrap();
    let cfg = StoreConfig::new(dir.path()).with_chunk_size(16 * 1024).with_sync_on_write(false);
    let store = Store::open(cfg).unwrap();
    (dir, store)
}

fn events(prefix: &str, count: usize) -> Vec<EventData> {
    (0..count).map(|i| EventData::new("Happened", format!("{}{}", prefix, i))).collect()
}

fn visible(store: &Store, stream: &str) -> Vec<u64> {
    store
        .read_stream_forward(stream, StreamPosition::Start, 1000, false)
        .unwrap()
        .event_numbers()
}

#[test]
fn test_expected_version_checks() {
    let (_dir, store) = open_store();
    let res = store.append_to_stream("orders", ExpectedVersion::StreamExists, events("a", 1));
    assert!(matches!(res, Err(EngineError::WrongExpectedVersion { current: None, .. })));

    let first = store.append_to_stream("orders", ExpectedVersion::NoStream, events("a", 3)).unwrap();
    assert_eq!(first.next_expected_version, EventNumber(2));

    let res = store.append_to_stream("orders", ExpectedVersion::NoStream, events("b", 1));
    assert!(matches!(res, Err(EngineError::WrongExpectedVersion { .. })));
    let res = store.append_to_stream("orders", ExpectedVersion::Exact(EventNumber(1)), events("b", 1));
    assert!(matches!(
        res,
        Err(EngineError::WrongExpectedVersion { current: Some(EventNumber(2)), .. })
    ));
    assert_eq!(visible(&store, "orders"), vec![0, 1, 2]);

    let next = store
        .append_to_stream("orders", ExpectedVersion::Exact(first.next_expected_version), events("c", 2))
        .unwrap();
    assert_eq!(next.next_expected_version, EventNumber(4));
    assert!(next.log_position > first.log_position);
    store.append_to_stream("orders", ExpectedVersion::Any, events("d", 1)).unwrap();
    assert_eq!(visible(&store, "orders"), vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn test_read_your_writes() {
    let (_dir, store) = open_store();
    for i in 0..20u64 {
        let written = store
            .append_to_stream("feed", ExpectedVersion::Any, vec![EventData::new("Item", format!("item-{}", i))])
            .unwrap();
        let read = store.read_event("feed", written.next_expected_version, false).unwrap();
        assert_eq!(read.event.unwrap().event.data(), format!("item-{}", i).as_bytes());
    }
}

#[test]
fn test_contract_violations() {
    let (_dir, store) = open_store();
    let cases = [
        store.append_to_stream("orders", ExpectedVersion::Any, Vec::new()),
        store.append_to_stream("", ExpectedVersion::Any, events("a", 1)),
        store.append_to_stream("$$orders", ExpectedVersion::Any, events("a", 1)),
        store.append_to_stream("orders", ExpectedVersion::Any, vec![EventData::new("", "x")]),
        store.append_to_stream("orders", ExpectedVersion::Any, vec![EventData::new("Big", vec![0u8; 32 * 1024])]),
        store.set_stream_metadata("orders", ExpectedVersion::Any, StreamMetadata::new().with_max_count(0)),
    ];
    for res in cases {
        assert!(matches!(res, Err(EngineError::InvalidArgument(_))), "{:?}", res);
    }
    let slice = store.read_stream_forward("orders", StreamPosition::Start, 10, false).unwrap();
    assert_eq!(slice.status, SliceReadStatus::StreamNotFound);
}

#[test]
fn test_soft_delete_and_undelete() {
    let (_dir, store) = open_store();
    store.append_to_stream("cart", ExpectedVersion::NoStream, events("a", 3)).unwrap();
    store.delete_stream("cart", ExpectedVersion::Exact(EventNumber(2)), DeleteMode::Soft).unwrap();

    let slice = store.read_stream_forward("cart", StreamPosition::Start, 10, false).unwrap();
    assert_eq!(slice.status, SliceReadStatus::StreamDeleted);
    assert!(slice.events.is_empty());

    // The stream keeps its version across the delete.
    let res = store.append_to_stream("cart", ExpectedVersion::NoStream, events("b", 1));
    assert!(matches!(res, Err(EngineError::WrongExpectedVersion { .. })));
    let revived = store
        .append_to_stream("cart", ExpectedVersion::Exact(EventNumber(2)), events("b", 2))
        .unwrap();
    assert_eq!(revived.next_expected_version, EventNumber(4));

    let slice = store.read_stream_forward("cart", StreamPosition::Start, 10, false).unwrap();
    assert_eq!(slice.status, SliceReadStatus::Success);
    assert_eq!(slice.event_numbers(), vec![3, 4]);
    let meta = store.get_stream_metadata("cart").unwrap();
    assert!(!meta.metadata.deleted);
    assert_eq!(meta.metadata.truncate_before, Some(EventNumber(3)));
}

#[test]
fn test_hard_delete_is_permanent() {
    let (_dir, store) = open_store();
    store.append_to_stream("gone", ExpectedVersion::Any, events("a", 2)).unwrap();
    store.delete_stream("gone", ExpectedVersion::Any, DeleteMode::Hard).unwrap();

    let res = store.append_to_stream("gone", ExpectedVersion::Any, events("b", 1));
    assert!(matches!(res, Err(EngineError::StreamDeleted(_))));
    let res = store.delete_stream("gone", ExpectedVersion::Any, DeleteMode::Soft);
    assert!(matches!(res, Err(EngineError::StreamDeleted(_))));
    let res = store.set_stream_metadata("gone", ExpectedVersion::Any, StreamMetadata::new());
    assert!(matches!(res, Err(EngineError::StreamDeleted(_))));
    assert_eq!(store.get_stream_metadata("gone").unwrap().status, SliceReadStatus::StreamDeleted);
}

#[test]
fn test_max_count_hides_older_events() {
    let (_dir, store) = open_store();
    store.append_to_stream("recent", ExpectedVersion::Any, events("a", 10)).unwrap();
    store
        .set_stream_metadata("recent", ExpectedVersion::NoStream, StreamMetadata::new().with_max_count(3))
        .unwrap();
    assert_eq!(visible(&store, "recent"), vec![7, 8, 9]);

    let back = store.read_stream_backward("recent", StreamPosition::End, 10, false).unwrap();
    assert_eq!(back.event_numbers(), vec![9, 8, 7]);
    assert!(back.is_end_of_stream);
}

#[test]
fn test_truncate_before() {
    let (_dir, store) = open_store();
    store.append_to_stream("log", ExpectedVersion::Any, events("a", 10)).unwrap();
    store
        .set_stream_metadata(
            "log",
            ExpectedVersion::Any,
            StreamMetadata::new().with_truncate_before(EventNumber(5)),
        )
        .unwrap();
    let back = store.read_stream_backward("log", StreamPosition::End, 10, false).unwrap();
    assert_eq!(back.event_numbers(), vec![9, 8, 7, 6, 5]);
    let below = store.read_stream_backward("log", 2u64.into(), 5, false).unwrap();
    assert_eq!(below.status, SliceReadStatus::Success);
    assert!(below.events.is_empty());
}

#[test]
fn test_max_age_expires_events() {
    let (_dir, store) = open_store();
    store.append_to_stream("old", ExpectedVersion::Any, events("a", 3)).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    store
        .set_stream_metadata("old", ExpectedVersion::Any, StreamMetadata::new().with_max_age(Duration::ZERO))
        .unwrap();
    let slice = store.read_stream_forward("old", StreamPosition::Start, 10, false).unwrap();
    assert_eq!(slice.status, SliceReadStatus::Success);
    assert!(slice.events.is_empty());
    assert_eq!(slice.last_event_number, Some(EventNumber(2)));
}

#[test]
fn test_metadata_versions() {
    let (_dir, store) = open_store();
    let none = store.get_stream_metadata("configured").unwrap();
    assert_eq!(none.status, SliceReadStatus::StreamNotFound);
    assert_eq!(none.version, None);

    let meta = StreamMetadata::new().with_max_count(100).with_custom("owner", json!("billing"));
    let written = store.set_stream_metadata("configured", ExpectedVersion::NoStream, meta.clone()).unwrap();
    assert_eq!(written.next_expected_version, EventNumber(0));

    let read = store.get_stream_metadata("configured").unwrap();
    assert_eq!(read.status, SliceReadStatus::Success);
    assert_eq!(read.version, Some(EventNumber(0)));
    assert_eq!(read.metadata, meta);

    let res = store.set_stream_metadata("configured", ExpectedVersion::NoStream, StreamMetadata::new());
    assert!(matches!(res, Err(EngineError::WrongExpectedVersion { .. })));
    store
        .set_stream_metadata("configured", ExpectedVersion::Exact(EventNumber(0)), StreamMetadata::new())
        .unwrap();
    assert_eq!(store.get_stream_metadata("configured").unwrap().version, Some(EventNumber(1)));

    // The metastream reads like any other stream.
    assert_eq!(visible(&store, "$$configured"), vec![0, 1]);
}

#[test]
fn test_closed_store_rejects_calls() {
    let (_dir, store) = open_store();
    store.append_to_stream("s", ExpectedVersion::Any, events("a", 1)).unwrap();
    store.close().unwrap();
    let res = store.append_to_stream("s", ExpectedVersion::Any, events("b", 1));
    assert!(matches!(res, Err(EngineError::Closed)));
    assert!(matches!(
        store.read_stream_forward("s", StreamPosition::Start, 1, false),
        Err(EngineError::Closed)
    ));
}

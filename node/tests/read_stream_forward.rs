// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use tempfile::{tempdir, TempDir};
use tessera_node::{
    EventData, EventNumber, EventReadStatus, ExpectedVersion, LogPosition, SliceReadStatus, Store, StoreConfig,
    StreamPosition,
};

fn open_store() -> (TempDir, Store) {
    let dir = tempdir().unwrap();
    let cfg = StoreConfig::new(dir.path()).with_chunk_size(4096).with_sync_on_write(false);
    let store = Store::open(cfg).unwrap();
    (dir, store)
}

fn append(store: &Store, stream: &str, count: usize) {
    for i in 0..count {
        store
            .append_to_stream(stream, ExpectedVersion::Any, vec![EventData::new("Tick", format!("{}-{}", stream, i))])
            .unwrap();
    }
}

#[test]
fn test_forward_pages() {
    let (_dir, store) = open_store();
    append(&store, "ticks", 10);

    let first = store.read_stream_forward("ticks", StreamPosition::Start, 4, false).unwrap();
    assert_eq!(first.status, SliceReadStatus::Success);
    assert_eq!(first.event_numbers(), vec![0, 1, 2, 3]);
    assert_eq!(first.next_event_number, Some(EventNumber(4)));
    assert!(!first.is_end_of_stream);

    let last = store.read_stream_forward("ticks", 8u64.into(), 4, false).unwrap();
    assert_eq!(last.event_numbers(), vec![8, 9]);
    assert_eq!(last.next_event_number, Some(EventNumber(10)));
    assert!(last.is_end_of_stream);

    let past = store.read_stream_forward("ticks", StreamPosition::End, 4, false).unwrap();
    assert_eq!(past.status, SliceReadStatus::Success);
    assert!(past.events.is_empty());
    assert!(past.is_end_of_stream);
}

#[test]
fn test_payloads_survive_chunk_rollover() {
    let (_dir, store) = open_store();
    append(&store, "ticks", 200);
    let slice = store.read_stream_forward("ticks", StreamPosition::Start, 500, false).unwrap();
    assert_eq!(slice.events.len(), 200);
    for (i, event) in slice.events.iter().enumerate() {
        assert_eq!(event.event.event_number, EventNumber(i as u64));
        assert_eq!(event.event.data(), format!("ticks-{}", i).as_bytes());
        assert_eq!(event.event.event_type, "Tick");
    }
    assert!(store.write_position() > LogPosition(4096));
}

#[test]
fn test_streams_are_isolated() {
    let (_dir, store) = open_store();
    for i in 0..5 {
        store.append_to_stream("left", ExpectedVersion::Any, vec![EventData::new("L", format!("l{}", i))]).unwrap();
        store.append_to_stream("right", ExpectedVersion::Any, vec![EventData::new("R", format!("r{}", i))]).unwrap();
    }
    let left = store.read_stream_forward("left", StreamPosition::Start, 10, false).unwrap();
    assert_eq!(left.event_numbers(), vec![0, 1, 2, 3, 4]);
    assert!(left.events.iter().all(|e| e.event.stream.as_str() == "left"));
}

#[test]
fn test_read_event() {
    let (_dir, store) = open_store();
    append(&store, "ticks", 3);

    let found = store.read_event("ticks", EventNumber(1), false).unwrap();
    assert_eq!(found.status, EventReadStatus::Success);
    assert_eq!(found.event.unwrap().event.data(), b"ticks-1");

    let missing = store.read_event("ticks", EventNumber(3), false).unwrap();
    assert_eq!(missing.status, EventReadStatus::NotFound);
    let nostream = store.read_event("other", EventNumber(0), false).unwrap();
    assert_eq!(nostream.status, EventReadStatus::NoStream);
}

#[test]
fn test_read_all_in_log_order() {
    let (_dir, store) = open_store();
    append(&store, "a", 30);
    append(&store, "b", 30);

    let mut from = LogPosition::ZERO;
    let mut records = Vec::new();
    loop {
        let slice = store.read_all_forward(from, 7).unwrap();
        records.extend(slice.events);
        from = slice.next_position;
        if slice.is_end {
            break;
        }
    }
    assert_eq!(records.len(), 60);
    assert!(records.windows(2).all(|w| w[0].position < w[1].position));
    assert_eq!(records[0].stream.as_str(), "a");
    assert_eq!(records[59].stream.as_str(), "b");
}

// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::index::StreamIndex;
use crate::types::id::{EventNumber, LogPosition, StreamId};

fn build(streams: &[(&str, u64)]) -> StreamIndex {
    let mut index = StreamIndex::new();
    let mut pos = 0;
    for (name, count) in streams {
        for n in 0..*count {
            index
                .append(&StreamId::from(*name), EventNumber(n), LogPosition(pos))
                .unwrap();
            pos += 64;
        }
    }
    index
}

fn backward(index: &StreamIndex, stream: &str, from: Option<u64>, count: usize) -> Vec<u64> {
    index
        .scan_backward(&StreamId::from(stream), from.map(EventNumber), count)
        .iter()
        .map(|e| e.event_number.0)
        .collect()
}

#[test]
fn test_backward_from_end_of_ten() {
    let index = build(&[("s", 10)]);
    assert_eq!(backward(&index, "s", None, 1), vec![9]);
    assert_eq!(backward(&index, "s", Some(9), 3), vec![9, 8, 7]);
}

#[test]
fn test_backward_clamps_to_start() {
    let index = build(&[("s", 10)]);
    assert_eq!(backward(&index, "s", Some(1), 5), vec![1, 0]);
    assert_eq!(backward(&index, "s", Some(0), 1), vec![0]);
}

#[test]
fn test_backward_past_end_starts_at_last() {
    let index = build(&[("s", 10)]);
    assert_eq!(backward(&index, "s", Some(100), 2), vec![9, 8]);
}

#[test]
fn test_backward_single_event() {
    let index = build(&[("s", 1)]);
    assert_eq!(backward(&index, "s", None, 5), vec![0]);
}

#[test]
fn test_backward_unknown_stream_is_empty() {
    let index = build(&[("s", 3)]);
    assert!(backward(&index, "other", None, 5).is_empty());
}

#[test]
fn test_streams_are_isolated() {
    let index = build(&[("a", 3), ("b", 4)]);
    assert_eq!(index.get_last_event_number(&StreamId::from("a")), Some(EventNumber(2)));
    assert_eq!(index.get_last_event_number(&StreamId::from("b")), Some(EventNumber(3)));
    assert_eq!(index.entry_count(), 7);
    assert_eq!(index.stream_count(), 2);
    let a_positions: Vec<_> = index
        .scan_forward(&StreamId::from("a"), EventNumber(0), 10)
        .iter()
        .map(|e| e.position.0)
        .collect();
    assert_eq!(a_positions, vec![0, 64, 128]);
}

#[test]
fn test_positions_are_strictly_increasing_per_stream() {
    let index = build(&[("a", 5), ("b", 5)]);
    for (stream, _) in index.streams() {
        let entries = index.scan_forward(stream, EventNumber(0), usize::MAX);
        assert!(entries.windows(2).all(|w| w[0].position < w[1].position));
    }
}

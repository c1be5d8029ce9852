// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::codec::{decode, encode, frame_len, MIN_FRAME_LEN};
use crate::event::{metadata_record, EventData, LogRecord, RecordBody, RecordFlags};
use crate::metadata::StreamMetadata;
use crate::types::id::{EventNumber, LogPosition, StreamId};

fn records() -> Vec<LogRecord> {
    let mut plain = EventData::new("OrderPlaced", &b"{\"total\":12}"[..])
        .with_metadata(&b"{\"corr\":\"a1\"}"[..])
        .into_record(StreamId::from("orders-1"), EventNumber(0), 1_700_000_000_000);
    plain.position = LogPosition(0);
    plain.flags = RecordFlags::for_batch_slot(0, 2);

    let mut link = EventData::link("orders-1", EventNumber(0)).into_record(
        StreamId::from("$ce-orders"),
        EventNumber(3),
        1_700_000_000_001,
    );
    link.position = LogPosition(200);
    link.flags = RecordFlags::for_batch_slot(1, 2);

    let json = StreamMetadata::new().with_max_count(2).to_json().unwrap();
    let mut meta = metadata_record(StreamId::from("orders-1").metastream(), EventNumber(0), json, 5);
    meta.position = LogPosition(400);
    meta.flags = RecordFlags::for_batch_slot(0, 1);

    vec![plain, link, meta]
}

#[test]
fn test_every_kind_decodes_to_the_same_record() {
    for record in records() {
        let bytes = encode(&record).unwrap();
        assert!(bytes.len() >= MIN_FRAME_LEN);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, record);
    }
}

#[test]
fn test_link_body_survives_encoding() {
    let link = &records()[1];
    let decoded = decode(&encode(link).unwrap()).unwrap();
    match decoded.body {
        RecordBody::Link { target_stream, target_event_number } => {
            assert_eq!(target_stream, StreamId::from("orders-1"));
            assert_eq!(target_event_number, EventNumber(0));
        }
        other => panic!("expected link, got {:?}", other),
    }
}

#[test]
fn test_any_single_byte_flip_is_detected() {
    // Every byte is covered by the length pair, the version check or the checksum.
    for record in records() {
        let bytes = encode(&record).unwrap();
        for i in 0..bytes.len() {
            let mut corrupted = bytes.clone();
            corrupted[i] ^= 0x5a;
            assert!(
                decode(&corrupted).is_err(),
                "flip at byte {} of {} went undetected",
                i,
                bytes.len()
            );
        }
    }
}

#[test]
fn test_concatenated_frames_walk() {
    let mut log = Vec::new();
    for record in records() {
        log.extend(encode(&record).unwrap());
    }

    let mut offset = 0;
    let mut seen = Vec::new();
    while offset < log.len() {
        let len = frame_len(&log[offset..]).unwrap();
        seen.push(decode(&log[offset..offset + len]).unwrap().event_type);
        offset += len;
    }
    assert_eq!(seen, vec!["OrderPlaced", "$>", "$metadata"]);
}

// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Simple Crash Recovery Demo
//!
//! Writes events, "crashes" without closing, tears the log tail and shows
//! the store coming back with every committed event.

use std::fs::OpenOptions;
use std::io::Write;
use tempfile::tempdir;
use tessera_node::telemetry::init_tracing;
use tessera_node::{EventData, ExpectedVersion, Store, StoreConfig, StreamPosition};

fn main() {
    init_tracing();
    println!("\n╔════════════════════════════════════════╗");
    println!("║  Tessera Crash Recovery Demo           ║");
    println!("╚════════════════════════════════════════╝\n");

    let dir = tempdir().unwrap();
    let config = StoreConfig::new(dir.path()).with_chunk_size(4096);

    // Phase 1: Append and close cleanly
    println!("📝 Phase 1: Append 50 events + close");
    {
        let store = Store::open(config.clone()).unwrap();
        for i in 0..50 {
            store
                .append_to_stream("demo", ExpectedVersion::Any, vec![EventData::new("Demoed", format!("{{\"i\":{}}}", i))])
                .unwrap();
        }
        store.close().unwrap();
    }
    println!("   ✅ Index persisted\n");

    // Phase 2: Append more, then drop without closing
    println!("📝 Phase 2: Append 50 more, crash without closing");
    let end = {
        let store = Store::open(config.clone()).unwrap();
        for i in 50..100 {
            store
                .append_to_stream("demo", ExpectedVersion::Any, vec![EventData::new("Demoed", format!("{{\"i\":{}}}", i))])
                .unwrap();
        }
        store.write_position()
    };
    println!("   💥 Crash at log position {}\n", end);

    // Phase 3: Tear the tail as a half-finished write would
    let mut chunks: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.file_name().is_some_and(|n| n.to_string_lossy().starts_with("chunk-")))
        .collect();
    chunks.sort();
    if let Some(active) = chunks.last() {
        let mut file = OpenOptions::new().append(true).open(active).unwrap();
        file.write_all(&[0x5A; 23]).unwrap();
        println!("📝 Phase 3: Appended 23 garbage bytes to {:?}\n", active.file_name().unwrap());
    }

    // Phase 4: Recover
    println!("📝 Phase 4: Reopen");
    let store = Store::open(config).unwrap();
    let report = store.recovery_report();
    println!("   Index loaded:     {}", report.index_loaded);
    println!("   Records replayed: {}", report.replayed_records);
    println!("   Truncated at:     {:?}", report.truncated_at);

    let slice = store.read_stream_backward("demo", StreamPosition::End, 3, false).unwrap();
    println!("   Last events:      {:?}", slice.event_numbers());
    assert_eq!(slice.event_numbers(), vec![99, 98, 97]);
    println!("\n✅ Recovery complete");
}

// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Crash Recovery
//!
//! Rebuilds the in-memory index at open:
//! - load `index.map` when the checkpoints vouch for it
//! - replay the log from the position the index covers
//! - below the writer checkpoint every frame must decode
//! - past it, drop a torn frame or an unfinished batch and everything after
//! - rewrite the writer checkpoint at the recovered end
//!
//! Replay is deterministic: the same chunk files and checkpoints always
//! produce the same index.

use crate::errors::{EngineError, Result};
use crate::telemetry::RECOVERY_DURATION;
use crate::writer::index_record;
use std::path::Path;
use std::time::Instant;
use tessera_kernel::codec::decode;
use tessera_kernel::{LogPosition, LogRecord, StreamIndex};
use tessera_persistence::{idx, Checkpoint, CheckpointManager, ChunkStore, PersistenceError};

/// What recovery found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// `index.map` was usable and replay started from its position.
    pub index_loaded: bool,
    pub replayed_records: u64,
    /// Where the log was cut back, if it was.
    pub truncated_at: Option<LogPosition>,
    /// Writer checkpoint after recovery.
    pub writer_checkpoint: LogPosition,
}

fn load_index(path: &Path, writer: LogPosition, chaser: Option<LogPosition>) -> Option<StreamIndex> {
    let index = match idx::load(path) {
        Ok(Some(index)) => index,
        Ok(None) => {
            tracing::info!("No index file, rebuilding from the log");
            return None;
        }
        Err(e) => {
            tracing::warn!("Index file unreadable, rebuilding from the log: {}", e);
            return None;
        }
    };
    let covered = index.covered();
    if covered > writer || chaser != Some(covered) {
        tracing::warn!(
            "Index covers {} but checkpoints are writer={} chaser={:?}, rebuilding",
            covered,
            writer,
            chaser
        );
        return None;
    }
    Some(index)
}

/// Whether a bad frame at `position` may be discarded as an unfinished write.
fn check_discardable(position: LogPosition, writer: LogPosition, active_start: LogPosition, reason: &str) -> Result<()> {
    if position < writer || position < active_start {
        tracing::error!("{} at {} inside the durable log (writer checkpoint {})", reason, position, writer);
        return Err(EngineError::Corruption {
            position,
            reason: reason.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn recover(chunks: &ChunkStore, checkpoints: &CheckpointManager, index_path: &Path) -> Result<(StreamIndex, RecoveryReport)> {
    let started = Instant::now();
    let writer = checkpoints.read(Checkpoint::Writer)?.unwrap_or_default();
    let chaser = checkpoints.read(Checkpoint::Chaser)?;
    let end_of_data = chunks.write_position();
    if writer > end_of_data {
        return Err(EngineError::Corruption {
            position: end_of_data,
            reason: format!("log ends before the writer checkpoint {}", writer),
        });
    }

    let loaded = load_index(index_path, writer, chaser);
    let index_loaded = loaded.is_some();
    let mut index = loaded.unwrap_or_default();
    let active_start = chunks.active_start();

    let mut report = RecoveryReport {
        index_loaded,
        ..RecoveryReport::default()
    };
    let mut position = index.covered();
    // Records of a batch in the active chunk, held until its end is seen.
    let mut pending: Vec<LogRecord> = Vec::new();
    let mut cut: Option<LogPosition> = None;

    loop {
        let (found, frame) = match chunks.next_frame(position) {
            Ok(Some(next)) => next,
            Ok(None) => break,
            Err(PersistenceError::Corruption { position: bad, source }) => {
                check_discardable(bad, writer, active_start, &source.to_string())?;
                cut = Some(bad);
                break;
            }
            Err(e) => return Err(e.into()),
        };
        let record = match decode(&frame) {
            Ok(record) => record,
            Err(e) => {
                check_discardable(found, writer, active_start, &e.to_string())?;
                cut = Some(found);
                break;
            }
        };
        position = found.advance(frame.len() as u64);

        // Completed chunks may have been scavenged, which breaks batch
        // framing; they were sealed after every batch in them finished.
        if found < active_start {
            index_record(&mut index, &record, true)?;
            report.replayed_records += 1;
            continue;
        }

        if record.flags.is_batch_begin() && !pending.is_empty() {
            let start = pending[0].position;
            check_discardable(start, writer, active_start, "batch without an end record")?;
            cut = Some(start);
            pending.clear();
            break;
        }
        let ends_batch = record.flags.is_batch_end();
        pending.push(record);
        if ends_batch {
            for record in pending.drain(..) {
                index_record(&mut index, &record, true)?;
                report.replayed_records += 1;
            }
        }
    }

    if let Some(first) = pending.first() {
        check_discardable(first.position, writer, active_start, "incomplete trailing batch")?;
        cut = Some(cut.map_or(first.position, |c| c.min(first.position)));
    }

    if let Some(at) = cut {
        tracing::warn!("Discarding unfinished writes from {} to {}", at, end_of_data);
        chunks.truncate_active(at)?;
        report.truncated_at = Some(at);
    }

    let end = chunks.write_position();
    index.set_covered(end)?;
    report.writer_checkpoint = chunks.flush()?;
    checkpoints.write(Checkpoint::Writer, report.writer_checkpoint)?;

    metrics::histogram!(RECOVERY_DURATION, started.elapsed().as_secs_f64());
    tracing::info!(
        "Recovery complete: index {}, {} records replayed, end {}",
        if index_loaded { "loaded" } else { "rebuilt" },
        report.replayed_records,
        end
    );
    Ok((index, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_kernel::{EventNumber, StreamId};
    use tessera_persistence::fixtures::{append_incomplete_batch, append_torn_tail, generate_multi_chunk_log};
    use tessera_persistence::ChunkStoreOptions;
    use tempfile::tempdir;

    const CHUNK: u64 = 2048;

    fn open(dir: &Path) -> (ChunkStore, CheckpointManager) {
        let chunks = ChunkStore::open(
            dir,
            ChunkStoreOptions {
                chunk_size: CHUNK,
                verify_on_open: false,
            },
        )
        .unwrap();
        (chunks, CheckpointManager::new(dir))
    }

    #[test]
    fn test_rebuild_without_index_file() {
        let dir = tempdir().unwrap();
        let scenario = generate_multi_chunk_log(dir.path(), CHUNK, &[("a", 20), ("b", 7)]).unwrap();
        let (chunks, checkpoints) = open(dir.path());

        let (index, report) = recover(&chunks, &checkpoints, &dir.path().join(idx::INDEX_FILE_NAME)).unwrap();
        assert!(!report.index_loaded);
        assert_eq!(report.replayed_records, 27);
        assert_eq!(report.truncated_at, None);
        for (stream, n, position) in &scenario.positions {
            assert_eq!(index.get_position(stream, *n), Some(*position));
        }
        assert_eq!(index.covered(), scenario.writer_checkpoint);
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let scenario = generate_multi_chunk_log(dir.path(), CHUNK, &[("a", 5)]).unwrap();
        let torn = append_torn_tail(dir.path(), CHUNK).unwrap();
        let (chunks, checkpoints) = open(dir.path());

        let (index, report) = recover(&chunks, &checkpoints, &dir.path().join(idx::INDEX_FILE_NAME)).unwrap();
        assert_eq!(report.truncated_at, Some(torn));
        assert_eq!(chunks.write_position(), scenario.writer_checkpoint);
        assert!(!index.contains(&StreamId::from("torn")));
        assert_eq!(checkpoints.read(Checkpoint::Writer).unwrap(), Some(scenario.writer_checkpoint));
    }

    #[test]
    fn test_incomplete_batch_is_dropped_whole() {
        let dir = tempdir().unwrap();
        generate_multi_chunk_log(dir.path(), CHUNK, &[("a", 3)]).unwrap();
        let start = append_incomplete_batch(dir.path(), CHUNK, "a", EventNumber(3)).unwrap();
        let (chunks, checkpoints) = open(dir.path());

        let (index, report) = recover(&chunks, &checkpoints, &dir.path().join(idx::INDEX_FILE_NAME)).unwrap();
        assert_eq!(report.truncated_at, Some(start));
        assert_eq!(index.get_last_event_number(&StreamId::from("a")), Some(EventNumber(2)));
    }

    #[test]
    fn test_stale_index_file_is_ignored() {
        let dir = tempdir().unwrap();
        generate_multi_chunk_log(dir.path(), CHUNK, &[("a", 4)]).unwrap();
        let mut stale = StreamIndex::new();
        stale.set_covered(LogPosition(1_000_000)).unwrap();
        let path = dir.path().join(idx::INDEX_FILE_NAME);
        idx::save(&path, &stale).unwrap();

        let (chunks, checkpoints) = open(dir.path());
        let (index, report) = recover(&chunks, &checkpoints, &path).unwrap();
        assert!(!report.index_loaded);
        assert_eq!(index.get_last_event_number(&StreamId::from("a")), Some(EventNumber(3)));
    }
}

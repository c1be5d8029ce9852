// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Transaction Log Writer
//!
//! The only path that mutates the log or the index. A batch is committed as:
//! 1. validate, check the expected version and that the index accepts
//!    every record
//! 2. encode every record with its final position and batch flags
//! 3. roll the chunk over if the batch does not fit
//! 4. append, optionally fsync
//! 5. publish all index entries under one write lock
//!
//! A failed append truncates the active chunk back to the batch start, so a
//! batch is either fully in the log or absent.

use crate::errors::{EngineError, Result};
use crate::metadata::StreamState;
use crate::store::{now_ms, Shared};
use crate::telemetry::{APPEND_DURATION, EVENTS_APPENDED};
use std::sync::Arc;
use std::time::Instant;
use tessera_kernel::codec::{encode_batch, encoded_len};
use tessera_kernel::error::KernelError;
use tessera_kernel::event::{metadata_record, tombstone_record};
use tessera_kernel::index::IndexError;
use tessera_kernel::{
    DeleteMode, EventData, EventNumber, ExpectedVersion, LogPosition, LogRecord, RecordKind, StreamId, StreamIndex,
    StreamMetadata,
};
use tessera_persistence::{idx, Checkpoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    /// Last event number written to the stream; pass it as
    /// `ExpectedVersion::Exact` to append after this write.
    pub next_expected_version: EventNumber,
    /// Position of the last record of the batch.
    pub log_position: LogPosition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteResult {
    pub log_position: LogPosition,
}

/// Applies one committed record to the index. Rebuilds tolerate event
/// numbers jumping forward where scavenging removed a stream's prefix.
pub(crate) fn index_record(index: &mut StreamIndex, record: &LogRecord, rebuilding: bool) -> std::result::Result<(), IndexError> {
    if record.kind() == RecordKind::Tombstone {
        index.mark_hard_deleted(&record.stream, record.position);
        return Ok(());
    }
    if rebuilding {
        index.append_after_gap(&record.stream, record.event_number, record.position)
    } else {
        index.append(&record.stream, record.event_number, record.position)
    }
}

fn validate_stream(stream: &StreamId) -> Result<()> {
    if stream.is_empty() {
        return Err(EngineError::InvalidArgument("stream id must not be empty".to_string()));
    }
    if stream.is_metastream() {
        return Err(EngineError::InvalidArgument(format!(
            "{} is a metadata stream; use set_stream_metadata",
            stream
        )));
    }
    Ok(())
}

fn check_expected(stream: &StreamId, expected: ExpectedVersion, current: Option<EventNumber>) -> Result<()> {
    if expected.matches(current) {
        return Ok(());
    }
    tracing::debug!("Wrong expected version for {}: {:?} vs {:?}", stream, expected, current);
    Err(EngineError::WrongExpectedVersion {
        stream: stream.to_string(),
        expected,
        current,
    })
}

pub(crate) struct Writer {
    shared: Arc<Shared>,
    since_index_flush: u64,
}

impl Writer {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            since_index_flush: 0,
        }
    }

    pub fn append_to_stream(&mut self, stream: &StreamId, expected: ExpectedVersion, events: Vec<EventData>) -> Result<WriteResult> {
        validate_stream(stream)?;
        if events.is_empty() {
            return Err(EngineError::InvalidArgument("cannot append an empty batch".to_string()));
        }
        if let Some(i) = events.iter().position(|e| e.event_type.is_empty()) {
            return Err(EngineError::InvalidArgument(format!("event {} has an empty event type", i)));
        }

        let state = StreamState::load(&self.shared, stream)?;
        if state.hard_deleted {
            return Err(EngineError::StreamDeleted(stream.to_string()));
        }
        check_expected(stream, expected, state.last)?;

        let timestamp = now_ms();
        let mut records = Vec::with_capacity(events.len() + 1);

        if let Some((meta_version, meta)) = state.metadata.as_ref().filter(|(_, m)| m.deleted) {
            // Appending to a soft-deleted stream brings it back. Events from
            // before the delete stay hidden behind `$tb`.
            let mut revived = meta.clone();
            revived.deleted = false;
            revived.truncate_before = Some(meta.truncate_before.unwrap_or(state.next).max(state.next));
            records.push(metadata_record(
                stream.metastream(),
                meta_version.next(),
                revived.to_json()?,
                timestamp,
            ));
            tracing::info!("Undeleting stream {}", stream);
        }

        let first = state.next;
        let count = events.len() as u64;
        for (i, event) in events.into_iter().enumerate() {
            records.push(event.into_record(stream.clone(), EventNumber(first.0 + i as u64), timestamp));
        }

        let committed = self.commit(records)?;
        let log_position = committed.last().map(|r| r.position).unwrap_or_default();
        Ok(WriteResult {
            next_expected_version: EventNumber(first.0 + count - 1),
            log_position,
        })
    }

    pub fn delete_stream(&mut self, stream: &StreamId, expected: ExpectedVersion, mode: DeleteMode) -> Result<DeleteResult> {
        validate_stream(stream)?;
        let state = StreamState::load(&self.shared, stream)?;
        if state.hard_deleted {
            return Err(EngineError::StreamDeleted(stream.to_string()));
        }
        check_expected(stream, expected, state.last)?;

        let timestamp = now_ms();
        let record = match mode {
            DeleteMode::Soft => {
                let mut meta = state.metadata().cloned().unwrap_or_default();
                meta.deleted = true;
                meta.truncate_before = Some(state.next);
                let version = state.metadata.as_ref().map(|(v, _)| v.next()).unwrap_or_default();
                metadata_record(stream.metastream(), version, meta.to_json()?, timestamp)
            }
            DeleteMode::Hard => tombstone_record(stream.clone(), timestamp),
        };

        let committed = self.commit(vec![record])?;
        let log_position = committed.last().map(|r| r.position).unwrap_or_default();
        tracing::info!("Stream {} deleted ({:?}) at {}", stream, mode, log_position);
        Ok(DeleteResult { log_position })
    }

    pub fn set_stream_metadata(&mut self, stream: &StreamId, expected: ExpectedVersion, metadata: StreamMetadata) -> Result<WriteResult> {
        validate_stream(stream)?;
        metadata
            .validate()
            .map_err(|reason| EngineError::InvalidArgument(reason.to_string()))?;

        let state = StreamState::load(&self.shared, stream)?;
        if state.hard_deleted {
            return Err(EngineError::StreamDeleted(stream.to_string()));
        }
        let metastream = stream.metastream();
        let current = state.metadata.as_ref().map(|(v, _)| *v);
        check_expected(&metastream, expected, current)?;

        let version = current.map(|v| v.next()).unwrap_or_default();
        let record = metadata_record(metastream, version, metadata.to_json()?, now_ms());
        let committed = self.commit(vec![record])?;
        let log_position = committed.last().map(|r| r.position).unwrap_or_default();
        Ok(WriteResult {
            next_expected_version: version,
            log_position,
        })
    }

    /// Writes `records` as one batch and publishes them to the index.
    fn commit(&mut self, mut records: Vec<LogRecord>) -> Result<Vec<LogRecord>> {
        let started = Instant::now();
        let chunks = &self.shared.chunks;

        let batch_len: u64 = records.iter().map(|r| encoded_len(r) as u64).sum();
        if batch_len > chunks.chunk_size() {
            return Err(EngineError::InvalidArgument(format!(
                "batch of {} bytes exceeds the chunk size {}",
                batch_len,
                chunks.chunk_size()
            )));
        }
        self.shared.index.read().check_batch(&records)?;
        if batch_len > chunks.remaining_in_active() {
            chunks.rollover()?;
        }

        let start = chunks.write_position();
        let bytes = encode_batch(&mut records, start).map_err(|e| match e {
            KernelError::FieldTooLarge { field, len, max } => {
                EngineError::InvalidArgument(format!("{} is {} bytes, limit is {}", field, len, max))
            }
            other => EngineError::Kernel(other),
        })?;

        let written = chunks.append(&bytes).and_then(|position| {
            if self.shared.config.sync_on_write {
                chunks.flush()?;
            }
            Ok(position)
        });
        if let Err(e) = written {
            tracing::error!("Append at {} failed, rolling back: {}", start, e);
            if let Err(undo) = chunks.truncate_active(start) {
                tracing::error!("Rollback to {} failed: {}", start, undo);
            }
            return Err(e.into());
        }

        {
            let mut index = self.shared.index.write();
            for record in &records {
                index_record(&mut index, record, false)?;
            }
            index.set_covered(start.advance(bytes.len() as u64))?;
        }

        metrics::counter!(EVENTS_APPENDED, records.len() as u64);
        metrics::histogram!(APPEND_DURATION, started.elapsed().as_secs_f64());
        tracing::trace!("Committed {} records at {}", records.len(), start);

        self.since_index_flush += records.len() as u64;
        if self.since_index_flush >= self.shared.config.index_flush_threshold {
            if let Err(e) = self.persist_index() {
                tracing::warn!("Index flush failed, will retry: {}", e);
            }
        }
        Ok(records)
    }

    /// Fsyncs the log and moves the writer checkpoint to the durable end.
    /// Runs under the writer lock, so the checkpoint lands on a batch
    /// boundary and never ahead of the data.
    pub fn flush(&mut self) -> Result<LogPosition> {
        let end = self.shared.chunks.flush()?;
        self.shared.checkpoints.write(Checkpoint::Writer, end)?;
        Ok(end)
    }

    /// Saves `index.map` and moves the chaser checkpoint to the position it
    /// covers. The log is flushed first so the index never covers bytes the
    /// writer checkpoint does not.
    pub fn persist_index(&mut self) -> Result<()> {
        self.flush()?;
        let covered = {
            let index = self.shared.index.read();
            idx::save(&self.shared.index_path, &index)?;
            index.covered()
        };
        self.shared.checkpoints.write(Checkpoint::Chaser, covered)?;
        self.since_index_flush = 0;
        tracing::debug!("Index persisted up to {}", covered);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Store, StoreConfig};
    use tempfile::tempdir;

    #[test]
    fn test_unindexable_batch_never_reaches_the_log() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::new(dir.path()).with_chunk_size(64 * 1024).with_sync_on_write(false);
        let store = Store::open(config).unwrap();
        store
            .append_to_stream("a", ExpectedVersion::Any, vec![EventData::new("Tested", "0")])
            .unwrap();
        let before = store.write_position();

        let mut writer = Writer::new(Arc::clone(store.shared()));
        let stray = EventData::new("Tested", "5").into_record(StreamId::from("a"), EventNumber(5), now_ms());
        let res = writer.commit(vec![stray]);
        assert!(matches!(res, Err(EngineError::Index(IndexError::OutOfOrder { .. }))), "{:?}", res);
        assert_eq!(store.shared().chunks.write_position(), before);
        assert_eq!(store.write_position(), before);

        let next = store
            .append_to_stream("a", ExpectedVersion::Exact(EventNumber(0)), vec![EventData::new("Tested", "1")])
            .unwrap();
        assert_eq!(next.next_expected_version, EventNumber(1));
    }
}

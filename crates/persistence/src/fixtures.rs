// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! On-disk scenarios for recovery and scavenging tests.

use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::chunk::{chunk_file_name, ChunkFooter, ChunkHeader};
use crate::chunk_store::{ChunkStore, ChunkStoreOptions};
use crate::error::{PersistenceError, Result};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tessera_kernel::codec::encode_batch;
use tessera_kernel::{ChunkNumber, EventData, EventNumber, LogPosition, LogRecord, StreamId};

pub struct Scenario {
    pub dir: PathBuf,
    /// Position of every event written, in log order.
    pub positions: Vec<(StreamId, EventNumber, LogPosition)>,
    /// Durable end recorded in `writer.chk`.
    pub writer_checkpoint: LogPosition,
}

fn options(chunk_size: u64) -> ChunkStoreOptions {
    ChunkStoreOptions {
        chunk_size,
        verify_on_open: false,
    }
}

fn payload(stream: &StreamId, n: u64) -> Vec<u8> {
    format!("{{\"stream\":\"{}\",\"n\":{}}}", stream, n).into_bytes()
}

/// Encodes `records` as one batch at the write position, rolling over
/// first when the batch does not fit in the active chunk.
fn encode_fitting(store: &ChunkStore, records: &mut [LogRecord]) -> Result<(LogPosition, Vec<u8>)> {
    let encode = |records: &mut [LogRecord], start| {
        encode_batch(records, start).map_err(|e| PersistenceError::InvalidFormat(e.to_string()))
    };
    let start = store.write_position();
    let bytes = encode(records, start)?;
    if bytes.len() as u64 <= store.remaining_in_active() {
        return Ok((start, bytes));
    }
    store.rollover()?;
    let start = store.write_position();
    Ok((start, encode(records, start)?))
}

/// Appends one batch of plain events, rolling over when it does not fit.
pub fn write_batch(store: &ChunkStore, mut records: Vec<LogRecord>) -> Result<Vec<LogRecord>> {
    let (_, bytes) = encode_fitting(store, &mut records)?;
    store.append(&bytes)?;
    Ok(records)
}

/// Writes `count` events to each stream, one event per batch, interleaving
/// streams, and checkpoints the end.
pub fn generate_multi_chunk_log(dir: &Path, chunk_size: u64, streams: &[(&str, u64)]) -> Result<Scenario> {
    let store = ChunkStore::open(dir, options(chunk_size))?;
    let mut positions = Vec::new();
    let rounds = streams.iter().map(|(_, c)| *c).max().unwrap_or(0);
    for n in 0..rounds {
        for (name, count) in streams {
            if n >= *count {
                continue;
            }
            let stream = StreamId::from(*name);
            let record = EventData::new("FixtureEvent", payload(&stream, n)).into_record(stream.clone(), EventNumber(n), 0);
            let written = write_batch(&store, vec![record])?;
            positions.push((stream, EventNumber(n), written[0].position));
        }
    }
    let writer_checkpoint = store.flush()?;
    CheckpointManager::new(dir).write(Checkpoint::Writer, writer_checkpoint)?;
    Ok(Scenario {
        dir: dir.to_path_buf(),
        positions,
        writer_checkpoint,
    })
}

/// Appends the first half of a frame after the checkpointed end, as left by
/// a crash in the middle of a write.
pub fn append_torn_tail(dir: &Path, chunk_size: u64) -> Result<LogPosition> {
    let store = ChunkStore::open(dir, options(chunk_size))?;
    let stream = StreamId::from("torn");
    let mut records = vec![EventData::new("Torn", payload(&stream, 0)).into_record(stream, EventNumber(0), 0)];
    let (start, bytes) = encode_fitting(&store, &mut records)?;
    store.append(&bytes[..bytes.len() / 2])?;
    store.flush()?;
    Ok(start)
}

/// Appends the leading records of a batch without its closing record.
/// Every frame is intact; only the batch is incomplete.
pub fn append_incomplete_batch(dir: &Path, chunk_size: u64, stream: &str, first: EventNumber) -> Result<LogPosition> {
    let store = ChunkStore::open(dir, options(chunk_size))?;
    let stream = StreamId::from(stream);
    let mut records: Vec<_> = (0..3)
        .map(|i| {
            EventData::new("Partial", payload(&stream, first.0 + i)).into_record(
                stream.clone(),
                EventNumber(first.0 + i),
                0,
            )
        })
        .collect();
    let (start, bytes) = encode_fitting(&store, &mut records)?;
    let kept = records[2].position.0 - start.0;
    store.append(&bytes[..kept as usize])?;
    store.flush()?;
    Ok(start)
}

/// Footer written on the active chunk, no successor created yet.
struct Sealed {
    number: ChunkNumber,
    path: PathBuf,
    /// Header plus frames; the footer starts here.
    content_len: u64,
    end: LogPosition,
}

fn seal_last(dir: &Path, chunk_size: u64) -> Result<Sealed> {
    let store = ChunkStore::open(dir, options(chunk_size))?;
    let end = store.flush()?;
    let number = ChunkNumber(store.chunk_count().saturating_sub(1) as u32);
    let active = store
        .chunk(number)
        .ok_or_else(|| PersistenceError::InvalidFormat(format!("no chunk {}", number)))?;
    let sealed = active.seal()?;
    Ok(Sealed {
        number,
        path: sealed.path().to_path_buf(),
        content_len: ChunkHeader::SIZE as u64 + sealed.data_size(),
        end,
    })
}

/// Seals the active chunk without creating the next one, as left by a
/// crash between the two steps of a rollover. Returns the end of the log.
pub fn seal_active_chunk(dir: &Path, chunk_size: u64) -> Result<LogPosition> {
    Ok(seal_last(dir, chunk_size)?.end)
}

/// Seals the active chunk and leaves only the first `header_bytes` of its
/// successor on disk. Returns the log position the successor starts at.
pub fn create_headerless_next_chunk(dir: &Path, chunk_size: u64, header_bytes: usize) -> Result<LogPosition> {
    let sealed = seal_last(dir, chunk_size)?;
    let next = sealed.number.next();
    let header = ChunkHeader::new(next, chunk_size, 0).to_bytes();
    fs::write(
        dir.join(chunk_file_name(next, 0)),
        &header[..header_bytes.min(ChunkHeader::SIZE)],
    )?;
    Ok(LogPosition(next.0 as u64 * chunk_size))
}

/// Leaves half of the active chunk's footer behind, as left by a crash in
/// the middle of sealing it. Returns the end of the log.
pub fn append_torn_footer(dir: &Path, chunk_size: u64) -> Result<LogPosition> {
    let sealed = seal_last(dir, chunk_size)?;
    let file = OpenOptions::new().write(true).open(&sealed.path)?;
    file.set_len(sealed.content_len + ChunkFooter::SIZE as u64 / 2)?;
    file.sync_all()?;
    Ok(sealed.end)
}

// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Scavenger
//!
//! Rewrites completed chunks without the records nobody can read any more.
//! A record is dropped when:
//! - its stream is hard-deleted (the tombstone itself stays)
//! - it is below the stream's `$tb` or outside `$maxCount`
//! - it is older than `$maxAge`
//! - it is a metadata record superseded by a later one
//!
//! The last event of every live stream is always kept so an index rebuilt
//! from the log still knows the stream's version. Survivors keep their log
//! positions. The active chunk is never touched.

use crate::errors::Result;
use crate::metadata::read_stream_metadata;
use crate::store::{now_ms, Shared};
use crate::telemetry::{CHUNKS_SCAVENGED, SCAVENGE_BYTES_RECLAIMED};
use std::collections::HashMap;
use std::time::Instant;
use tessera_kernel::codec::decode;
use tessera_kernel::{EventNumber, LogRecord, RecordKind, StreamId, StreamMetadata};
use tessera_persistence::{Chunk, ChunkRewrite, PersistenceError};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScavengeReport {
    pub chunks_scavenged: u64,
    /// Chunks that failed and were left as they were; the next pass retries them.
    pub chunks_skipped: u64,
    pub records_kept: u64,
    pub records_dropped: u64,
    pub bytes_reclaimed: u64,
    /// The pass stopped early. The chunk in progress was left untouched.
    pub cancelled: bool,
}

#[derive(Default)]
struct ChunkCounts {
    kept: u64,
    dropped: u64,
}

/// Retention inputs of one stream, looked up once per chunk.
struct Retention {
    last: Option<EventNumber>,
    metadata: Option<StreamMetadata>,
}

pub(crate) struct Scavenger<'a> {
    shared: &'a Shared,
    now: i64,
}

impl<'a> Scavenger<'a> {
    pub fn new(shared: &'a Shared) -> Self {
        Self { shared, now: now_ms() }
    }

    /// Scavenges every completed chunk, oldest first.
    pub fn run(&self, cancel: &CancellationToken) -> ScavengeReport {
        let started = Instant::now();
        let mut report = ScavengeReport::default();

        for chunk in self.shared.chunks.completed_chunks() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match self.scavenge_chunk(&chunk, cancel) {
                Ok(Some((counts, reclaimed))) => {
                    report.chunks_scavenged += 1;
                    report.records_kept += counts.kept;
                    report.records_dropped += counts.dropped;
                    report.bytes_reclaimed += reclaimed;
                    metrics::counter!(CHUNKS_SCAVENGED, 1);
                    metrics::counter!(SCAVENGE_BYTES_RECLAIMED, reclaimed);
                }
                Ok(None) => {
                    tracing::info!("Scavenge cancelled at chunk {}", chunk.number());
                    report.cancelled = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!("Skipping chunk {} this pass: {}", chunk.number(), e);
                    report.chunks_skipped += 1;
                }
            }
        }

        tracing::info!(
            "Scavenge pass: {} chunks rewritten, {} skipped, {} records dropped, {} bytes reclaimed in {:?}",
            report.chunks_scavenged,
            report.chunks_skipped,
            report.records_dropped,
            report.bytes_reclaimed,
            started.elapsed()
        );
        report
    }

    /// `Ok(None)` when cancelled before the replacement was installed.
    fn scavenge_chunk(&self, chunk: &Chunk, cancel: &CancellationToken) -> Result<Option<(ChunkCounts, u64)>> {
        let mut rewrite = self.shared.chunks.begin_rewrite(chunk)?;
        match self.copy_survivors(chunk, &mut rewrite, cancel) {
            Ok(Some(counts)) => {
                let stats = self.shared.chunks.replace_chunk(rewrite)?;
                tracing::debug!(
                    "Chunk {} scavenged: kept {}, dropped {}",
                    chunk.number(),
                    counts.kept,
                    counts.dropped
                );
                Ok(Some((counts, stats.old_size.saturating_sub(stats.new_size))))
            }
            Ok(None) => {
                rewrite.abort();
                Ok(None)
            }
            Err(e) => {
                rewrite.abort();
                Err(e)
            }
        }
    }

    fn copy_survivors(&self, chunk: &Chunk, rewrite: &mut ChunkRewrite, cancel: &CancellationToken) -> Result<Option<ChunkCounts>> {
        let mut counts = ChunkCounts::default();
        let mut retention: HashMap<StreamId, Retention> = HashMap::new();
        let mut local = 0;

        while let Some((found, frame)) = chunk.next_frame(local)? {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let position = chunk.start_position().advance(found);
            let record = decode(&frame).map_err(|e| PersistenceError::corruption(position, e))?;
            local = found + frame.len() as u64;

            if self.keep(&record, &mut retention)? {
                rewrite.push(found, &frame)?;
                counts.kept += 1;
            } else {
                counts.dropped += 1;
            }
        }
        Ok(Some(counts))
    }

    fn keep(&self, record: &LogRecord, retention: &mut HashMap<StreamId, Retention>) -> Result<bool> {
        if record.kind() == RecordKind::Tombstone {
            return Ok(true);
        }
        let owner = record.stream.original_stream().unwrap_or_else(|| record.stream.clone());
        if self.shared.index.read().is_hard_deleted(&owner) {
            return Ok(false);
        }

        if record.stream.is_metastream() {
            let latest = self.shared.index.read().get_last_event_number(&record.stream);
            return Ok(latest == Some(record.event_number));
        }

        if !retention.contains_key(&record.stream) {
            let last = self.shared.index.read().get_last_event_number(&record.stream);
            let metadata = read_stream_metadata(self.shared, &record.stream)?.map(|(_, m)| m);
            retention.insert(record.stream.clone(), Retention { last, metadata });
        }
        let Some(stream) = retention.get(&record.stream) else {
            return Ok(true);
        };
        let Some(last) = stream.last else {
            return Ok(true);
        };
        if record.event_number >= last {
            return Ok(true);
        }
        let Some(metadata) = &stream.metadata else {
            return Ok(true);
        };
        if record.event_number < metadata.first_visible(last) {
            return Ok(false);
        }
        Ok(!metadata.is_expired(record.timestamp, self.now))
    }
}

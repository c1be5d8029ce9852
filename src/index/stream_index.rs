// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Stream index.
//!
//! Maps `(stream, event number)` to log positions. Each stream keeps a
//! contiguous run of positions ending at its last event. Scavenging only
//! ever removes a stream's oldest events, so a suffix is all a rebuilt index
//! needs to hold.

use crate::event::{LogRecord, RecordKind};
use crate::index::{IndexEntry, IndexError};
use crate::types::id::{EventNumber, LogPosition, StreamId};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEntries {
    /// Event number the next append receives.
    next: u64,
    /// Positions of events `next - positions.len() .. next`.
    positions: Vec<LogPosition>,
    /// Set once the stream is hard-deleted.
    tombstone: Option<LogPosition>,
}

impl StreamEntries {
    pub fn next_event_number(&self) -> EventNumber {
        EventNumber(self.next)
    }

    pub fn last_event_number(&self) -> Option<EventNumber> {
        self.next.checked_sub(1).map(EventNumber)
    }

    /// Lowest event number still indexed.
    pub fn first_indexed(&self) -> EventNumber {
        EventNumber(self.next - self.positions.len() as u64)
    }

    pub fn tombstone(&self) -> Option<LogPosition> {
        self.tombstone
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    fn get(&self, n: EventNumber) -> Option<LogPosition> {
        let first = self.first_indexed().0;
        if n.0 < first || n.0 >= self.next {
            return None;
        }
        self.positions.get((n.0 - first) as usize).copied()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StreamIndex {
    streams: FxHashMap<StreamId, StreamEntries>,
    /// Log position up to which records are reflected here.
    covered: LogPosition,
}

impl StreamIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn covered(&self) -> LogPosition {
        self.covered
    }

    /// Records that everything before `position` is indexed.
    pub fn set_covered(&mut self, position: LogPosition) -> Result<(), IndexError> {
        if position < self.covered {
            return Err(IndexError::PositionRegressed {
                current: self.covered.0,
                found: position.0,
            });
        }
        self.covered = position;
        Ok(())
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn entry_count(&self) -> usize {
        self.streams.values().map(|s| s.positions.len()).sum()
    }

    pub fn streams(&self) -> impl Iterator<Item = (&StreamId, &StreamEntries)> {
        self.streams.iter()
    }

    pub fn entries(&self, stream: &StreamId) -> Option<&StreamEntries> {
        self.streams.get(stream)
    }

    pub fn contains(&self, stream: &StreamId) -> bool {
        self.streams.contains_key(stream)
    }

    /// Appends the next event of `stream`. Event numbers must arrive in order.
    pub fn append(&mut self, stream: &StreamId, event_number: EventNumber, position: LogPosition) -> Result<(), IndexError> {
        let entries = self.streams.entry(stream.clone()).or_default();
        if entries.tombstone.is_some() {
            return Err(IndexError::StreamDeleted(stream.to_string()));
        }
        if event_number.0 != entries.next {
            return Err(IndexError::OutOfOrder {
                stream: stream.to_string(),
                expected: entries.next,
                found: event_number.0,
            });
        }
        entries.positions.push(position);
        entries.next += 1;
        Ok(())
    }

    /// Rebuild variant of [`append`](Self::append): a forward jump means the
    /// skipped events were scavenged, so the run restarts at `event_number`.
    pub fn append_after_gap(&mut self, stream: &StreamId, event_number: EventNumber, position: LogPosition) -> Result<(), IndexError> {
        let entries = self.streams.entry(stream.clone()).or_default();
        if event_number.0 > entries.next {
            entries.positions.clear();
            entries.next = event_number.0;
        }
        self.append(stream, event_number, position)
    }

    /// Checks that `records` could be indexed in order, without touching
    /// the index. Commits run this before anything reaches the log.
    pub fn check_batch(&self, records: &[LogRecord]) -> Result<(), IndexError> {
        // `None` once the stream is hard-deleted.
        let mut pending: FxHashMap<&StreamId, Option<u64>> = FxHashMap::default();
        for record in records {
            let slot = pending
                .entry(&record.stream)
                .or_insert_with(|| match self.streams.get(&record.stream) {
                    Some(entries) if entries.tombstone.is_some() => None,
                    Some(entries) => Some(entries.next),
                    None => Some(0),
                });
            if record.kind() == RecordKind::Tombstone {
                *slot = None;
                continue;
            }
            match slot {
                None => return Err(IndexError::StreamDeleted(record.stream.to_string())),
                Some(next) if *next != record.event_number.0 => {
                    return Err(IndexError::OutOfOrder {
                        stream: record.stream.to_string(),
                        expected: *next,
                        found: record.event_number.0,
                    })
                }
                Some(next) => *next += 1,
            }
        }
        Ok(())
    }

    pub fn mark_hard_deleted(&mut self, stream: &StreamId, tombstone: LogPosition) {
        let entries = self.streams.entry(stream.clone()).or_default();
        entries.tombstone = Some(tombstone);
    }

    pub fn is_hard_deleted(&self, stream: &StreamId) -> bool {
        self.streams
            .get(stream)
            .map(|s| s.tombstone.is_some())
            .unwrap_or(false)
    }

    pub fn get_position(&self, stream: &StreamId, event_number: EventNumber) -> Option<LogPosition> {
        self.streams.get(stream)?.get(event_number)
    }

    pub fn get_last_event_number(&self, stream: &StreamId) -> Option<EventNumber> {
        self.streams.get(stream)?.last_event_number()
    }

    pub fn next_event_number(&self, stream: &StreamId) -> EventNumber {
        self.streams
            .get(stream)
            .map(|s| s.next_event_number())
            .unwrap_or_default()
    }

    /// Ascending entries `from ..= from + max_count - 1`, clipped to what is
    /// indexed.
    pub fn scan_forward(&self, stream: &StreamId, from: EventNumber, max_count: usize) -> Vec<IndexEntry> {
        let Some(entries) = self.streams.get(stream) else {
            return Vec::new();
        };
        let Some(last) = entries.last_event_number() else {
            return Vec::new();
        };
        if max_count == 0 || from > last {
            return Vec::new();
        }
        let start = from.max(entries.first_indexed()).0;
        let end = from.0.saturating_add(max_count as u64 - 1).min(last.0);
        let hash = stream.hash64();
        (start..=end)
            .filter_map(|n| {
                entries.get(EventNumber(n)).map(|position| IndexEntry {
                    stream_hash: hash,
                    event_number: EventNumber(n),
                    position,
                })
            })
            .collect()
    }

    /// Descending entries from `min(from, last)` down to
    /// `max(0, min(from, last) - max_count + 1)`. `None` starts at the end.
    pub fn scan_backward(&self, stream: &StreamId, from: Option<EventNumber>, max_count: usize) -> Vec<IndexEntry> {
        let Some(entries) = self.streams.get(stream) else {
            return Vec::new();
        };
        let Some(last) = entries.last_event_number() else {
            return Vec::new();
        };
        if max_count == 0 {
            return Vec::new();
        }
        let start = from.map(|f| f.min(last)).unwrap_or(last).0;
        let first = entries.first_indexed().0;
        if start < first {
            return Vec::new();
        }
        let low = start.saturating_sub(max_count as u64 - 1).max(first);
        let hash = stream.hash64();
        (low..=start)
            .rev()
            .filter_map(|n| {
                entries.get(EventNumber(n)).map(|position| IndexEntry {
                    stream_hash: hash,
                    event_number: EventNumber(n),
                    position,
                })
            })
            .collect()
    }
}

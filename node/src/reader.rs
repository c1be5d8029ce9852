// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Reader
//!
//! Stream reads resolve event numbers through the index, then fetch and
//! decode records from the chunk store. Visibility of a stream's events:
//! - at or above `max($tb, last + 1 - $maxCount)`
//! - not older than `$maxAge`
//! - still present in the log (scavenged records are skipped)
//!
//! Link policy: a link whose target stream is deleted, or whose target event
//! is hidden by truncation or retention, is left out of the slice. Any other
//! failure to resolve (unknown stream, number past the end, scavenged
//! record) returns the link record itself with `link: None`.

use crate::errors::{EngineError, Result};
use crate::metadata::StreamState;
use crate::store::{now_ms, Shared};
use std::sync::Arc;
use tessera_kernel::codec::decode;
use tessera_kernel::index::IndexEntry;
use tessera_kernel::{
    EventNumber, LogPosition, LogRecord, ReadDirection, RecordBody, SliceReadStatus, StreamId, StreamMetadata,
    StreamPosition,
};
use tessera_persistence::PersistenceError;

/// A record as returned to callers. When a link was resolved, `event` is the
/// target and `link` the link record that pointed at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEvent {
    pub event: LogRecord,
    pub link: Option<LogRecord>,
}

impl ResolvedEvent {
    fn plain(event: LogRecord) -> Self {
        Self { event, link: None }
    }

    /// The record stored in the stream that was read.
    pub fn original_event(&self) -> &LogRecord {
        self.link.as_ref().unwrap_or(&self.event)
    }

    pub fn original_event_number(&self) -> EventNumber {
        self.original_event().event_number
    }

    pub fn is_resolved(&self) -> bool {
        self.link.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSlice {
    pub status: SliceReadStatus,
    pub stream: StreamId,
    pub from: StreamPosition,
    pub direction: ReadDirection,
    pub events: Vec<ResolvedEvent>,
    /// Where the next read in the same direction starts. `None` once a
    /// backward read has passed the first visible event.
    pub next_event_number: Option<EventNumber>,
    pub last_event_number: Option<EventNumber>,
    pub is_end_of_stream: bool,
}

impl StreamSlice {
    fn empty(status: SliceReadStatus, stream: &StreamId, from: StreamPosition, direction: ReadDirection) -> Self {
        Self {
            status,
            stream: stream.clone(),
            from,
            direction,
            events: Vec::new(),
            next_event_number: None,
            last_event_number: None,
            is_end_of_stream: true,
        }
    }

    /// Event numbers in slice order, as stored in the stream read.
    pub fn event_numbers(&self) -> Vec<u64> {
        self.events.iter().map(|e| e.original_event_number().0).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventReadStatus {
    Success,
    NotFound,
    NoStream,
    StreamDeleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventReadResult {
    pub status: EventReadStatus,
    pub stream: StreamId,
    pub event_number: EventNumber,
    pub event: Option<ResolvedEvent>,
}

/// Records of the whole log in position order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllSlice {
    pub events: Vec<LogRecord>,
    /// Position to pass to the next call.
    pub next_position: LogPosition,
    pub is_end: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamMetadataResult {
    pub stream: StreamId,
    pub status: SliceReadStatus,
    /// Event number of the metadata record in `$$<stream>`; `None` when no
    /// metadata was ever written.
    pub version: Option<EventNumber>,
    pub metadata: StreamMetadata,
}

/// How a link resolved.
enum Link {
    Resolved(LogRecord),
    Dangling,
    Hidden,
}

fn validate_read(stream: &StreamId, max_count: i32) -> Result<usize> {
    if max_count <= 0 {
        return Err(EngineError::InvalidArgument(format!(
            "max_count must be positive, got {}",
            max_count
        )));
    }
    if stream.is_empty() {
        return Err(EngineError::InvalidArgument("stream id must not be empty".to_string()));
    }
    Ok(max_count as usize)
}

pub(crate) struct Reader {
    shared: Arc<Shared>,
}

impl Reader {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Status for streams that cannot be read, `None` for readable ones.
    fn unreadable(state: &StreamState) -> Option<SliceReadStatus> {
        if state.is_deleted() {
            Some(SliceReadStatus::StreamDeleted)
        } else if state.is_absent() {
            Some(SliceReadStatus::StreamNotFound)
        } else {
            None
        }
    }

    pub fn read_stream_forward(&self, stream: &StreamId, from: StreamPosition, max_count: i32, resolve_links: bool) -> Result<StreamSlice> {
        let max_count = validate_read(stream, max_count)?;
        let direction = ReadDirection::Forward;
        let state = StreamState::load(&self.shared, stream)?;
        if let Some(status) = Self::unreadable(&state) {
            return Ok(StreamSlice::empty(status, stream, from, direction));
        }
        let Some(last) = state.last else {
            let mut slice = StreamSlice::empty(SliceReadStatus::Success, stream, from, direction);
            slice.next_event_number = Some(state.next);
            return Ok(slice);
        };

        let requested = match from {
            StreamPosition::Start => EventNumber(0),
            StreamPosition::End => last.next(),
            StreamPosition::Event(n) => n,
        };
        let start = requested.max(state.first_visible());
        let end = start.0.saturating_add(max_count as u64 - 1);
        let is_end_of_stream = end >= last.0;
        let next_event_number = if is_end_of_stream { last.next() } else { EventNumber(end + 1) };

        let entries = self.shared.index.read().scan_forward(stream, start, max_count);
        let events = self.load(&state, &entries, resolve_links)?;
        tracing::trace!("Forward read of {} from {} returned {} events", stream, start, events.len());

        Ok(StreamSlice {
            status: SliceReadStatus::Success,
            stream: stream.clone(),
            from,
            direction,
            events,
            next_event_number: Some(next_event_number),
            last_event_number: Some(last),
            is_end_of_stream,
        })
    }

    /// Events from `from` downwards, highest event number first.
    pub fn read_stream_backward(&self, stream: &StreamId, from: StreamPosition, max_count: i32, resolve_links: bool) -> Result<StreamSlice> {
        let max_count = validate_read(stream, max_count)?;
        let direction = ReadDirection::Backward;
        let state = StreamState::load(&self.shared, stream)?;
        if let Some(status) = Self::unreadable(&state) {
            return Ok(StreamSlice::empty(status, stream, from, direction));
        }
        let Some(last) = state.last else {
            return Ok(StreamSlice::empty(SliceReadStatus::Success, stream, from, direction));
        };

        let start = match from {
            StreamPosition::Start => EventNumber(0),
            StreamPosition::End => last,
            StreamPosition::Event(n) => n.min(last),
        };
        let first_visible = state.first_visible();
        if start < first_visible {
            let mut slice = StreamSlice::empty(SliceReadStatus::Success, stream, from, direction);
            slice.last_event_number = Some(last);
            return Ok(slice);
        }

        let low = EventNumber(start.0.saturating_sub(max_count as u64 - 1)).max(first_visible);
        let is_end_of_stream = low == first_visible;
        let next_event_number = if is_end_of_stream { None } else { Some(EventNumber(low.0 - 1)) };

        let entries: Vec<IndexEntry> = self
            .shared
            .index
            .read()
            .scan_backward(stream, Some(start), max_count)
            .into_iter()
            .filter(|e| e.event_number >= first_visible)
            .collect();
        let events = self.load(&state, &entries, resolve_links)?;
        tracing::trace!("Backward read of {} from {} returned {} events", stream, start, events.len());

        Ok(StreamSlice {
            status: SliceReadStatus::Success,
            stream: stream.clone(),
            from,
            direction,
            events,
            next_event_number,
            last_event_number: Some(last),
            is_end_of_stream,
        })
    }

    pub fn read_event(&self, stream: &StreamId, event_number: EventNumber, resolve_links: bool) -> Result<EventReadResult> {
        if stream.is_empty() {
            return Err(EngineError::InvalidArgument("stream id must not be empty".to_string()));
        }
        let result = |status, event| EventReadResult {
            status,
            stream: stream.clone(),
            event_number,
            event,
        };

        let state = StreamState::load(&self.shared, stream)?;
        if state.is_deleted() {
            return Ok(result(EventReadStatus::StreamDeleted, None));
        }
        if state.is_absent() {
            return Ok(result(EventReadStatus::NoStream, None));
        }
        let visible = state.last.is_some_and(|last| event_number <= last) && event_number >= state.first_visible();
        if !visible {
            return Ok(result(EventReadStatus::NotFound, None));
        }
        let position = self.shared.index.read().get_position(stream, event_number);
        let Some(position) = position else {
            return Ok(result(EventReadStatus::NotFound, None));
        };
        let entry = IndexEntry {
            stream_hash: stream.hash64(),
            event_number,
            position,
        };
        match self.load(&state, &[entry], resolve_links)?.pop() {
            Some(event) => Ok(result(EventReadStatus::Success, Some(event))),
            None => Ok(result(EventReadStatus::NotFound, None)),
        }
    }

    /// Reads up to `max_count` records starting at `from`, which must be a
    /// record position or the `next_position` of an earlier slice. Records
    /// not yet scavenged are returned even when their stream hides them.
    pub fn read_all_forward(&self, from: LogPosition, max_count: i32) -> Result<AllSlice> {
        if max_count <= 0 {
            return Err(EngineError::InvalidArgument(format!(
                "max_count must be positive, got {}",
                max_count
            )));
        }
        let end = self.shared.index.read().covered();
        let mut events = Vec::new();
        let mut position = from;
        while events.len() < max_count as usize && position < end {
            let Some((found, frame)) = self.shared.chunks.next_frame(position)? else {
                break;
            };
            if found >= end {
                break;
            }
            let record = decode(&frame).map_err(|e| EngineError::from(PersistenceError::corruption(found, e)))?;
            position = found.advance(frame.len() as u64);
            events.push(record);
        }
        Ok(AllSlice {
            events,
            next_position: position,
            is_end: position >= end,
        })
    }

    pub fn get_stream_metadata(&self, stream: &StreamId) -> Result<StreamMetadataResult> {
        if stream.is_empty() || stream.is_metastream() {
            return Err(EngineError::InvalidArgument(format!("invalid stream id {:?}", stream.as_str())));
        }
        let state = StreamState::load(&self.shared, stream)?;
        let status = if state.hard_deleted {
            SliceReadStatus::StreamDeleted
        } else if state.is_absent() {
            SliceReadStatus::StreamNotFound
        } else {
            SliceReadStatus::Success
        };
        let (version, metadata) = match state.metadata {
            Some((version, metadata)) => (Some(version), metadata),
            None => (None, StreamMetadata::default()),
        };
        Ok(StreamMetadataResult {
            stream: stream.clone(),
            status,
            version,
            metadata,
        })
    }

    /// Fetches the records behind `entries`, in order, dropping those that
    /// are expired, scavenged or hidden links.
    fn load(&self, state: &StreamState, entries: &[IndexEntry], resolve_links: bool) -> Result<Vec<ResolvedEvent>> {
        let now = now_ms();
        let mut events = Vec::with_capacity(entries.len());
        for entry in entries {
            let record = match self.shared.chunks.read_record(entry.position) {
                Ok(record) => record,
                Err(PersistenceError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            if state.is_expired(record.timestamp, now) {
                continue;
            }
            if !resolve_links || !record.is_link() {
                events.push(ResolvedEvent::plain(record));
                continue;
            }
            match self.resolve(&record)? {
                Link::Resolved(target) => events.push(ResolvedEvent {
                    event: target,
                    link: Some(record),
                }),
                Link::Dangling => events.push(ResolvedEvent::plain(record)),
                Link::Hidden => tracing::trace!("Link {}@{} skipped: target hidden", record.event_number, record.stream),
            }
        }
        Ok(events)
    }

    fn resolve(&self, link: &LogRecord) -> Result<Link> {
        let RecordBody::Link {
            target_stream,
            target_event_number,
        } = &link.body
        else {
            return Ok(Link::Dangling);
        };
        let target = StreamState::load(&self.shared, target_stream)?;
        if target.is_deleted() {
            return Ok(Link::Hidden);
        }
        let Some(last) = target.last else {
            return Ok(Link::Dangling);
        };
        if *target_event_number > last {
            return Ok(Link::Dangling);
        }
        if *target_event_number < target.first_visible() {
            return Ok(Link::Hidden);
        }
        let position = self.shared.index.read().get_position(target_stream, *target_event_number);
        let Some(position) = position else {
            return Ok(Link::Dangling);
        };
        let record = match self.shared.chunks.read_record(position) {
            Ok(record) => record,
            Err(PersistenceError::NotFound(_)) => return Ok(Link::Dangling),
            Err(e) => return Err(e.into()),
        };
        if target.is_expired(record.timestamp, now_ms()) {
            return Ok(Link::Hidden);
        }
        Ok(Link::Resolved(record))
    }
}

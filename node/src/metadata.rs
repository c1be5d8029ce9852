// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Stream state lookups shared by the writer, the reader and the scavenger.
//!
//! Metadata of `orders` is the latest record of `$$orders`; older records
//! are history and may be scavenged.

use crate::errors::Result;
use crate::store::Shared;
use tessera_kernel::{EventNumber, LogPosition, StreamId, StreamMetadata};
use tessera_persistence::PersistenceError;

/// Latest metadata of `stream` and the metastream event number holding it.
pub(crate) fn read_stream_metadata(shared: &Shared, stream: &StreamId) -> Result<Option<(EventNumber, StreamMetadata)>> {
    let metastream = stream.metastream();
    let located: Option<(EventNumber, LogPosition)> = {
        let index = shared.index.read();
        index
            .get_last_event_number(&metastream)
            .and_then(|last| index.get_position(&metastream, last).map(|p| (last, p)))
    };
    let Some((version, position)) = located else {
        return Ok(None);
    };

    let record = match shared.chunks.read_record(position) {
        Ok(record) => record,
        Err(PersistenceError::NotFound(_)) => {
            tracing::warn!("Latest metadata record of {} at {} no longer resolves", stream, position);
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    Ok(Some((version, StreamMetadata::from_json(record.data())?)))
}

/// Point-in-time view of one stream.
#[derive(Debug, Clone, Default)]
pub(crate) struct StreamState {
    pub last: Option<EventNumber>,
    pub next: EventNumber,
    pub hard_deleted: bool,
    pub metadata: Option<(EventNumber, StreamMetadata)>,
}

impl StreamState {
    pub fn load(shared: &Shared, stream: &StreamId) -> Result<Self> {
        let (last, next, hard_deleted) = {
            let index = shared.index.read();
            let owner = stream.original_stream().unwrap_or_else(|| stream.clone());
            (
                index.get_last_event_number(stream),
                index.next_event_number(stream),
                index.is_hard_deleted(&owner),
            )
        };
        // Metastreams carry no metadata of their own.
        let metadata = if stream.is_metastream() || hard_deleted {
            None
        } else {
            read_stream_metadata(shared, stream)?
        };
        Ok(Self {
            last,
            next,
            hard_deleted,
            metadata,
        })
    }

    pub fn metadata(&self) -> Option<&StreamMetadata> {
        self.metadata.as_ref().map(|(_, m)| m)
    }

    pub fn is_soft_deleted(&self) -> bool {
        self.metadata().map(|m| m.deleted).unwrap_or(false)
    }

    pub fn is_deleted(&self) -> bool {
        self.hard_deleted || self.is_soft_deleted()
    }

    /// The stream was never written and carries no metadata.
    pub fn is_absent(&self) -> bool {
        self.last.is_none() && self.metadata.is_none() && !self.hard_deleted
    }

    /// Lowest event number readers may see. Only meaningful when `last` is set.
    pub fn first_visible(&self) -> EventNumber {
        match (self.metadata(), self.last) {
            (Some(meta), Some(last)) => meta.first_visible(last),
            (Some(meta), None) => meta.truncate_before.unwrap_or_default(),
            (None, _) => EventNumber(0),
        }
    }

    pub fn is_expired(&self, timestamp_ms: i64, now_ms: i64) -> bool {
        self.metadata()
            .map(|m| m.is_expired(timestamp_ms, now_ms))
            .unwrap_or(false)
    }
}

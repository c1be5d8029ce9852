// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Log records.
//!
//! Every entry of the transaction log is a `LogRecord`. Records are
//! immutable once appended: scavenging may drop a record but never rewrites
//! its contents or moves it to another position.
//!
//! # Record kinds
//! - `Plain`: an ordinary event carrying an opaque payload
//! - `Link`: a pointer to an event in another stream
//! - `Metadata`: a stream metadata document, written to `$$<stream>`
//! - `Tombstone`: hard-delete marker, written at `EventNumber::DELETED`

use crate::config::{LINK_EVENT_TYPE, METADATA_EVENT_TYPE, TOMBSTONE_EVENT_TYPE};
use crate::error::CorruptionError;
use crate::types::id::{EventNumber, LogPosition, StreamId};
use bytes::Bytes;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    Plain = 0,
    Link = 1,
    Metadata = 2,
    Tombstone = 3,
}

impl RecordKind {
    pub fn from_u8(v: u8) -> Result<Self, CorruptionError> {
        match v {
            0 => Ok(RecordKind::Plain),
            1 => Ok(RecordKind::Link),
            2 => Ok(RecordKind::Metadata),
            3 => Ok(RecordKind::Tombstone),
            other => Err(CorruptionError::UnknownKind(other)),
        }
    }
}

/// Body of a record, tagged by kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordBody {
    Plain(Bytes),
    Link {
        target_stream: StreamId,
        target_event_number: EventNumber,
    },
    /// JSON encoded `StreamMetadata`.
    Metadata(Bytes),
    Tombstone,
}

impl RecordBody {
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordBody::Plain(_) => RecordKind::Plain,
            RecordBody::Link { .. } => RecordKind::Link,
            RecordBody::Metadata(_) => RecordKind::Metadata,
            RecordBody::Tombstone => RecordKind::Tombstone,
        }
    }

    /// Bytes stored in the frame's body field.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            RecordBody::Plain(b) | RecordBody::Metadata(b) => b.clone(),
            RecordBody::Link {
                target_stream,
                target_event_number,
            } => Bytes::from(format!("{}@{}", target_event_number.0, target_stream)),
            RecordBody::Tombstone => Bytes::new(),
        }
    }

    pub fn from_bytes(kind: RecordKind, body: Bytes) -> Result<Self, CorruptionError> {
        match kind {
            RecordKind::Plain => Ok(RecordBody::Plain(body)),
            RecordKind::Metadata => Ok(RecordBody::Metadata(body)),
            RecordKind::Tombstone => {
                if !body.is_empty() {
                    return Err(CorruptionError::InvalidField("tombstone body"));
                }
                Ok(RecordBody::Tombstone)
            }
            RecordKind::Link => {
                let text = std::str::from_utf8(&body)
                    .map_err(|_| CorruptionError::InvalidField("link body"))?;
                let (number, stream) = text
                    .split_once('@')
                    .ok_or(CorruptionError::InvalidField("link body"))?;
                let number = number
                    .parse::<u64>()
                    .map_err(|_| CorruptionError::InvalidField("link event number"))?;
                if stream.is_empty() {
                    return Err(CorruptionError::InvalidField("link stream"));
                }
                Ok(RecordBody::Link {
                    target_stream: StreamId::from(stream),
                    target_event_number: EventNumber(number),
                })
            }
        }
    }
}

/// Batch boundary flags. A batch is durable only once its `BATCH_END`
/// record is in the log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RecordFlags(pub u16);

impl RecordFlags {
    pub const NONE: RecordFlags = RecordFlags(0);
    pub const BATCH_BEGIN: u16 = 0x0001;
    pub const BATCH_END: u16 = 0x0002;

    pub fn for_batch_slot(index: usize, len: usize) -> Self {
        let mut bits = 0;
        if index == 0 {
            bits |= Self::BATCH_BEGIN;
        }
        if index + 1 == len {
            bits |= Self::BATCH_END;
        }
        RecordFlags(bits)
    }

    pub fn is_batch_begin(&self) -> bool {
        self.0 & Self::BATCH_BEGIN != 0
    }

    pub fn is_batch_end(&self) -> bool {
        self.0 & Self::BATCH_END != 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub position: LogPosition,
    pub stream: StreamId,
    pub event_number: EventNumber,
    pub event_type: String,
    pub body: RecordBody,
    pub metadata: Bytes,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub flags: RecordFlags,
}

impl LogRecord {
    pub fn kind(&self) -> RecordKind {
        self.body.kind()
    }

    pub fn is_link(&self) -> bool {
        matches!(self.body, RecordBody::Link { .. })
    }

    /// Payload of a plain or metadata record; empty for links and tombstones.
    pub fn data(&self) -> &[u8] {
        match &self.body {
            RecordBody::Plain(b) | RecordBody::Metadata(b) => b,
            _ => &[],
        }
    }
}

/// Body accepted from callers. Metadata and tombstones are written by the
/// engine itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventBody {
    Plain(Bytes),
    Link {
        target_stream: StreamId,
        target_event_number: EventNumber,
    },
}

impl From<EventBody> for RecordBody {
    fn from(body: EventBody) -> Self {
        match body {
            EventBody::Plain(b) => RecordBody::Plain(b),
            EventBody::Link {
                target_stream,
                target_event_number,
            } => RecordBody::Link {
                target_stream,
                target_event_number,
            },
        }
    }
}

/// An event to append.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventData {
    pub event_type: String,
    pub body: EventBody,
    pub metadata: Bytes,
}

impl EventData {
    pub fn new(event_type: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            event_type: event_type.into(),
            body: EventBody::Plain(payload.into()),
            metadata: Bytes::new(),
        }
    }

    /// A link to `target_event_number` of `target_stream`.
    pub fn link(target_stream: impl Into<StreamId>, target_event_number: EventNumber) -> Self {
        Self {
            event_type: LINK_EVENT_TYPE.to_string(),
            body: EventBody::Link {
                target_stream: target_stream.into(),
                target_event_number,
            },
            metadata: Bytes::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: impl Into<Bytes>) -> Self {
        self.metadata = metadata.into();
        self
    }

    /// Builds the record the writer appends. Position and flags are filled
    /// in once the record's place in the log is known.
    pub fn into_record(self, stream: StreamId, event_number: EventNumber, timestamp: i64) -> LogRecord {
        LogRecord {
            position: LogPosition::ZERO,
            stream,
            event_number,
            event_type: self.event_type,
            body: self.body.into(),
            metadata: self.metadata,
            timestamp,
            flags: RecordFlags::NONE,
        }
    }
}

/// Builds a metadata record for `$$<stream>`.
pub fn metadata_record(metastream: StreamId, event_number: EventNumber, json: Bytes, timestamp: i64) -> LogRecord {
    LogRecord {
        position: LogPosition::ZERO,
        stream: metastream,
        event_number,
        event_type: METADATA_EVENT_TYPE.to_string(),
        body: RecordBody::Metadata(json),
        metadata: Bytes::new(),
        timestamp,
        flags: RecordFlags::NONE,
    }
}

/// Builds the hard-delete tombstone of `stream`.
pub fn tombstone_record(stream: StreamId, timestamp: i64) -> LogRecord {
    LogRecord {
        position: LogPosition::ZERO,
        stream,
        event_number: EventNumber::DELETED,
        event_type: TOMBSTONE_EVENT_TYPE.to_string(),
        body: RecordBody::Tombstone,
        metadata: Bytes::new(),
        timestamp,
        flags: RecordFlags::NONE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_body_roundtrip() {
        let body = RecordBody::Link {
            target_stream: StreamId::from("orders@eu"),
            target_event_number: EventNumber(42),
        };
        let bytes = body.to_bytes();
        assert_eq!(&bytes[..], b"42@orders@eu");
        let decoded = RecordBody::from_bytes(RecordKind::Link, bytes).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_malformed_link_body() {
        let res = RecordBody::from_bytes(RecordKind::Link, Bytes::from_static(b"abc@orders"));
        assert!(matches!(res, Err(CorruptionError::InvalidField(_))));
        let res = RecordBody::from_bytes(RecordKind::Link, Bytes::from_static(b"12@"));
        assert!(res.is_err());
    }

    #[test]
    fn test_batch_flags() {
        let single = RecordFlags::for_batch_slot(0, 1);
        assert!(single.is_batch_begin() && single.is_batch_end());
        let middle = RecordFlags::for_batch_slot(1, 3);
        assert!(!middle.is_batch_begin() && !middle.is_batch_end());
        let last = RecordFlags::for_batch_slot(2, 3);
        assert!(last.is_batch_end());
    }
}

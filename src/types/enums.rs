// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Stream-level enums shared by the writer and the reader.

use crate::types::id::EventNumber;
use serde::{Deserialize, Serialize};

/// Optimistic concurrency guard for writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// Skip the check.
    Any,
    /// The stream must not have any events.
    NoStream,
    /// Same check as `NoStream`; kept for callers that create streams explicitly.
    EmptyStream,
    /// The stream must have at least one event.
    StreamExists,
    /// The last event number must be exactly this.
    Exact(EventNumber),
}

impl ExpectedVersion {
    /// Checks the guard against a stream's last event number.
    pub fn matches(&self, last: Option<EventNumber>) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::NoStream | ExpectedVersion::EmptyStream => last.is_none(),
            ExpectedVersion::StreamExists => last.is_some(),
            ExpectedVersion::Exact(n) => last == Some(*n),
        }
    }
}

/// Where a stream read starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamPosition {
    Start,
    End,
    Event(EventNumber),
}

impl From<u64> for StreamPosition {
    fn from(n: u64) -> Self {
        StreamPosition::Event(EventNumber(n))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadDirection {
    Forward,
    Backward,
}

/// Outcome of a stream read. Absent and deleted streams are statuses, not errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SliceReadStatus {
    Success,
    StreamNotFound,
    StreamDeleted,
}

/// Soft deletion hides a stream but keeps its metadata and version;
/// hard deletion tombstones the name forever.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteMode {
    Soft,
    Hard,
}

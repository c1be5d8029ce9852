// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod stream_index;

use crate::types::id::{EventNumber, LogPosition};
use thiserror::Error;

pub use stream_index::{StreamEntries, StreamIndex};

/// One `(stream, event number) -> position` mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub stream_hash: u64,
    pub event_number: EventNumber,
    pub position: LogPosition,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IndexError {
    #[error("Out of order index update for {stream}: expected event {expected}, got {found}")]
    OutOfOrder {
        stream: String,
        expected: u64,
        found: u64,
    },

    #[error("Stream {0} is deleted")]
    StreamDeleted(String),

    #[error("Index position cannot move backwards: at {current}, got {found}")]
    PositionRegressed { current: u64, found: u64 },
}

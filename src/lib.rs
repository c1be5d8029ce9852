// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.

//! tessera-kernel: record formats and in-memory indexing for an append-only
//! event store. Pure data structures, no I/O.

pub mod config;
pub mod error;
pub mod types;
pub mod event;
pub mod codec;
pub mod metadata;
pub mod index;

#[cfg(test)]
pub mod tests;

pub use error::{CorruptionError, KernelError, KernelResult};
pub use event::{EventBody, EventData, LogRecord, RecordBody, RecordFlags, RecordKind};
pub use index::{IndexEntry, IndexError, StreamIndex};
pub use metadata::{StreamAcl, StreamMetadata};
pub use types::{
    ChunkNumber, DeleteMode, EventNumber, ExpectedVersion, LogPosition, ReadDirection, SliceReadStatus, StreamId,
    StreamPosition,
};

// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod id;
pub mod enums;

pub use enums::{DeleteMode, ExpectedVersion, ReadDirection, SliceReadStatus, StreamPosition};
pub use id::{ChunkNumber, EventNumber, LogPosition, StreamId, METASTREAM_PREFIX};

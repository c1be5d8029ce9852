// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Identity types.

use core::fmt;
use core::hash::{Hash, Hasher};
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

/// Global offset of a record in the transaction log.
///
/// `chunk_number * chunk_size + local_offset`. Assigned once at append time
/// and preserved by scavenging.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct LogPosition(pub u64);

impl LogPosition {
    pub const ZERO: LogPosition = LogPosition(0);

    pub fn advance(&self, bytes: u64) -> Self {
        LogPosition(self.0 + bytes)
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Zero-based, per-stream sequence number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct EventNumber(pub u64);

impl EventNumber {
    /// Reserved number carried by hard-delete tombstones. Never indexed.
    pub const DELETED: EventNumber = EventNumber(i64::MAX as u64);

    pub fn next(&self) -> Self {
        EventNumber(self.0 + 1)
    }
}

impl fmt::Display for EventNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct ChunkNumber(pub u32);

impl ChunkNumber {
    pub fn next(&self) -> Self {
        ChunkNumber(self.0 + 1)
    }
}

impl fmt::Display for ChunkNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Prefix marking the metadata stream of a stream (`$$orders` holds the
/// metadata history of `orders`).
pub const METASTREAM_PREFIX: &str = "$$";

/// Name of an event stream.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(name: impl Into<String>) -> Self {
        StreamId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_metastream(&self) -> bool {
        self.0.starts_with(METASTREAM_PREFIX)
    }

    /// `$$name` for `name`.
    pub fn metastream(&self) -> StreamId {
        StreamId(format!("{}{}", METASTREAM_PREFIX, self.0))
    }

    /// `name` for `$$name`, `None` for ordinary streams.
    pub fn original_stream(&self) -> Option<StreamId> {
        self.0
            .strip_prefix(METASTREAM_PREFIX)
            .map(|s| StreamId(s.to_string()))
    }

    /// Stable 64-bit hash used in index entries.
    pub fn hash64(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.0.hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        StreamId(s.to_string())
    }
}

impl From<String> for StreamId {
    fn from(s: String) -> Self {
        StreamId(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metastream_naming() {
        let stream = StreamId::from("orders");
        let meta = stream.metastream();
        assert_eq!(meta.as_str(), "$$orders");
        assert!(meta.is_metastream());
        assert!(!stream.is_metastream());
        assert_eq!(meta.original_stream(), Some(stream));
    }

    #[test]
    fn test_hash_is_stable() {
        let a = StreamId::from("orders");
        let b = StreamId::from(String::from("orders"));
        assert_eq!(a.hash64(), b.hash64());
        assert_ne!(a.hash64(), StreamId::from("orders-2").hash64());
    }
}

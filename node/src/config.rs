// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Construction-time settings of a [`Store`](crate::store::Store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    /// Capacity of each chunk's frame area. A single batch must fit in one chunk.
    pub chunk_size: u64,
    /// Fsync the active chunk before an append returns.
    pub sync_on_write: bool,
    /// How often the background flusher advances the writer checkpoint.
    pub checkpoint_interval: Duration,
    /// Records appended between two saves of `index.map`.
    pub index_flush_threshold: u64,
    /// Background scavenge period; `None` leaves scavenging to explicit calls.
    pub scavenge_interval: Option<Duration>,
    /// Verify every completed chunk's checksum at open.
    pub verify_chunks_on_open: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            chunk_size: 256 * 1024 * 1024,
            sync_on_write: true,
            checkpoint_interval: Duration::from_secs(1),
            index_flush_threshold: 100_000,
            scavenge_interval: None,
            verify_chunks_on_open: false,
        }
    }
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_sync_on_write(mut self, sync_on_write: bool) -> Self {
        self.sync_on_write = sync_on_write;
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn with_index_flush_threshold(mut self, records: u64) -> Self {
        self.index_flush_threshold = records;
        self
    }

    pub fn with_scavenge_interval(mut self, interval: Duration) -> Self {
        self.scavenge_interval = Some(interval);
        self
    }

    pub fn with_verify_chunks_on_open(mut self, verify: bool) -> Self {
        self.verify_chunks_on_open = verify;
        self
    }
}

// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use tessera_kernel::{CorruptionError, LogPosition};
use thiserror::Error;
use std::io;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Invalid magic bytes in header")]
    InvalidMagic,
    #[error("Checksum mismatch: expected {expected}, found {found}")]
    ChecksumMismatch {
        expected: u64,
        found: u64,
    },
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u32),
    #[error("Chunk full: {needed} bytes needed, {remaining} remaining")]
    ChunkFull {
        needed: u64,
        remaining: u64,
    },
    #[error("No record at position {0}")]
    NotFound(LogPosition),
    #[error("Corrupted record at position {position}: {source}")]
    Corruption {
        position: LogPosition,
        #[source]
        source: CorruptionError,
    },
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),
}

impl PersistenceError {
    pub fn corruption(position: LogPosition, source: CorruptionError) -> Self {
        PersistenceError::Corruption { position, source }
    }

    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            PersistenceError::Corruption { .. }
                | PersistenceError::ChecksumMismatch { .. }
                | PersistenceError::InvalidMagic
                | PersistenceError::InvalidFormat(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

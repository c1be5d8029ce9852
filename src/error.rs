// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use thiserror::Error;

/// A frame that cannot be trusted. Never a silently wrong value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorruptionError {
    #[error("Checksum mismatch: expected {expected:#018x}, found {found:#018x}")]
    ChecksumMismatch { expected: u64, found: u64 },

    #[error("Frame length {declared} inconsistent with {available} available bytes")]
    LengthMismatch { declared: usize, available: usize },

    #[error("Frame length suffix {suffix} does not match prefix {prefix}")]
    SuffixMismatch { prefix: u32, suffix: u32 },

    #[error("Unsupported record format version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown record kind: {0}")]
    UnknownKind(u8),

    #[error("Invalid record field: {0}")]
    InvalidField(&'static str),
}

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("Corrupted record: {0}")]
    Corruption(#[from] CorruptionError),

    #[error("Field {field} too large: {len} bytes (max {max})")]
    FieldTooLarge { field: &'static str, len: usize, max: usize },

    #[error("Invalid stream metadata: {0}")]
    InvalidMetadata(#[from] serde_json::Error),
}

pub type KernelResult<T> = core::result::Result<T, KernelError>;
pub type Result<T> = KernelResult<T>;

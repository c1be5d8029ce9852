// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Format constants.

/// Version byte written into every record frame.
pub const RECORD_FORMAT_VERSION: u8 = 1;

/// Largest stream name or event type, bounded by the `u16` length field.
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

/// Largest payload or metadata blob carried by one record.
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Event type given to link records.
pub const LINK_EVENT_TYPE: &str = "$>";

/// Event type given to stream metadata records.
pub const METADATA_EVENT_TYPE: &str = "$metadata";

/// Event type given to hard-delete tombstones.
pub const TOMBSTONE_EVENT_TYPE: &str = "$streamDeleted";

// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Record Codec
//!
//! Whole-record framing for the transaction log.
//!
//! # Frame Format
//! ```text
//! [len: u32][version: u8][kind: u8][flags: u16][position: u64]
//! [event_number: u64][timestamp: i64]
//! [stream_len: u16][stream][type_len: u16][event_type]
//! [body_len: u32][body][meta_len: u32][metadata]
//! [checksum: u64][len: u32]
//! ```
//!
//! All integers are little endian. `len` counts the bytes between the two
//! length fields; the trailing copy lets a scanner walk the log backwards.
//! The checksum is CRC-64 over everything between the leading `len` and the
//! checksum itself.

use crate::config::{MAX_BODY_SIZE, MAX_NAME_LEN, RECORD_FORMAT_VERSION};
use crate::error::{CorruptionError, KernelError, Result};
use crate::event::{LogRecord, RecordBody, RecordFlags, RecordKind};
use crate::types::id::{EventNumber, LogPosition, StreamId};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use crc64fast::Digest;
use std::io::{Cursor, Read};

/// Bytes taken by the two length fields.
pub const FRAME_OVERHEAD: usize = 4 + 4;

/// Smallest possible inner frame: every fixed field, empty variable fields.
const MIN_INNER_LEN: usize = 1 + 1 + 2 + 8 + 8 + 8 + 2 + 2 + 4 + 4 + 8;

/// Smallest possible complete frame.
pub const MIN_FRAME_LEN: usize = MIN_INNER_LEN + FRAME_OVERHEAD;

/// Total frame size announced by a frame's first four bytes.
pub fn frame_len(prefix: &[u8]) -> Option<usize> {
    let len: [u8; 4] = prefix.get(0..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(len) as usize + FRAME_OVERHEAD)
}

/// Size `record` will occupy once encoded.
pub fn encoded_len(record: &LogRecord) -> usize {
    let body_len = match &record.body {
        RecordBody::Plain(b) | RecordBody::Metadata(b) => b.len(),
        RecordBody::Link { .. } => record.body.to_bytes().len(),
        RecordBody::Tombstone => 0,
    };
    MIN_FRAME_LEN + record.stream.as_str().len() + record.event_type.len() + body_len + record.metadata.len()
}

fn check_len(field: &'static str, len: usize, max: usize) -> Result<()> {
    if len > max {
        return Err(KernelError::FieldTooLarge { field, len, max });
    }
    Ok(())
}

/// Serializes `record` into a self-contained frame.
pub fn encode(record: &LogRecord) -> Result<Vec<u8>> {
    let stream = record.stream.as_str().as_bytes();
    let event_type = record.event_type.as_bytes();
    let body = record.body.to_bytes();

    check_len("stream", stream.len(), MAX_NAME_LEN)?;
    check_len("event_type", event_type.len(), MAX_NAME_LEN)?;
    check_len("body", body.len(), MAX_BODY_SIZE)?;
    check_len("metadata", record.metadata.len(), MAX_BODY_SIZE)?;

    let inner_len = MIN_INNER_LEN + stream.len() + event_type.len() + body.len() + record.metadata.len();
    let mut buf = Vec::with_capacity(inner_len + FRAME_OVERHEAD);

    // Writes into a Vec cannot fail.
    let _ = buf.write_u32::<LittleEndian>(inner_len as u32);
    let _ = buf.write_u8(RECORD_FORMAT_VERSION);
    let _ = buf.write_u8(record.kind() as u8);
    let _ = buf.write_u16::<LittleEndian>(record.flags.0);
    let _ = buf.write_u64::<LittleEndian>(record.position.0);
    let _ = buf.write_u64::<LittleEndian>(record.event_number.0);
    let _ = buf.write_i64::<LittleEndian>(record.timestamp);
    let _ = buf.write_u16::<LittleEndian>(stream.len() as u16);
    buf.extend_from_slice(stream);
    let _ = buf.write_u16::<LittleEndian>(event_type.len() as u16);
    buf.extend_from_slice(event_type);
    let _ = buf.write_u32::<LittleEndian>(body.len() as u32);
    buf.extend_from_slice(&body);
    let _ = buf.write_u32::<LittleEndian>(record.metadata.len() as u32);
    buf.extend_from_slice(&record.metadata);

    let mut digest = Digest::new();
    digest.write(&buf[4..]);
    let _ = buf.write_u64::<LittleEndian>(digest.sum64());
    let _ = buf.write_u32::<LittleEndian>(inner_len as u32);

    debug_assert_eq!(buf.len(), inner_len + FRAME_OVERHEAD);
    Ok(buf)
}

/// Encodes `records` as one contiguous batch starting at `start`. Fills in
/// each record's position and batch flags.
pub fn encode_batch(records: &mut [LogRecord], start: LogPosition) -> Result<Vec<u8>> {
    let total: usize = records.iter().map(encoded_len).sum();
    let mut out = Vec::with_capacity(total);
    let len = records.len();
    for (i, record) in records.iter_mut().enumerate() {
        record.position = start.advance(out.len() as u64);
        record.flags = RecordFlags::for_batch_slot(i, len);
        out.extend(encode(record)?);
    }
    Ok(out)
}

fn truncated(declared: usize, available: usize) -> CorruptionError {
    CorruptionError::LengthMismatch { declared, available }
}

fn read_bytes(cursor: &mut Cursor<&[u8]>, len: usize, limit: usize) -> core::result::Result<Vec<u8>, CorruptionError> {
    let start = cursor.position() as usize;
    if start + len > limit {
        return Err(truncated(start + len, limit));
    }
    let mut out = vec![0u8; len];
    cursor
        .read_exact(&mut out)
        .map_err(|_| truncated(start + len, limit))?;
    Ok(out)
}

/// Parses one complete frame. `bytes` must hold exactly one frame.
pub fn decode(bytes: &[u8]) -> core::result::Result<LogRecord, CorruptionError> {
    let available = bytes.len();
    let declared = frame_len(bytes).ok_or_else(|| truncated(FRAME_OVERHEAD, available))?;
    if declared != available || available < MIN_FRAME_LEN {
        return Err(truncated(declared, available));
    }

    let prefix = (declared - FRAME_OVERHEAD) as u32;
    let mut suffix_bytes = [0u8; 4];
    suffix_bytes.copy_from_slice(&bytes[available - 4..]);
    let suffix = u32::from_le_bytes(suffix_bytes);
    if suffix != prefix {
        return Err(CorruptionError::SuffixMismatch { prefix, suffix });
    }

    let inner = &bytes[4..available - 4];
    let content = &inner[..inner.len() - 8];

    let version = content[0];
    if version != RECORD_FORMAT_VERSION {
        return Err(CorruptionError::UnsupportedVersion(version));
    }

    let mut checksum_bytes = [0u8; 8];
    checksum_bytes.copy_from_slice(&inner[inner.len() - 8..]);
    let expected = u64::from_le_bytes(checksum_bytes);
    let mut digest = Digest::new();
    digest.write(content);
    let found = digest.sum64();
    if expected != found {
        return Err(CorruptionError::ChecksumMismatch { expected, found });
    }

    let limit = content.len();
    let mut cursor = Cursor::new(content);
    let fixed = |_: std::io::Error| truncated(MIN_INNER_LEN, limit);

    let _version = cursor.read_u8().map_err(fixed)?;
    let kind = RecordKind::from_u8(cursor.read_u8().map_err(fixed)?)?;
    let flags = RecordFlags(cursor.read_u16::<LittleEndian>().map_err(fixed)?);
    let position = LogPosition(cursor.read_u64::<LittleEndian>().map_err(fixed)?);
    let event_number = EventNumber(cursor.read_u64::<LittleEndian>().map_err(fixed)?);
    let timestamp = cursor.read_i64::<LittleEndian>().map_err(fixed)?;

    let stream_len = cursor.read_u16::<LittleEndian>().map_err(fixed)? as usize;
    let stream = String::from_utf8(read_bytes(&mut cursor, stream_len, limit)?)
        .map_err(|_| CorruptionError::InvalidField("stream"))?;
    if stream.is_empty() {
        return Err(CorruptionError::InvalidField("stream"));
    }

    let type_len = cursor.read_u16::<LittleEndian>().map_err(fixed)? as usize;
    let event_type = String::from_utf8(read_bytes(&mut cursor, type_len, limit)?)
        .map_err(|_| CorruptionError::InvalidField("event_type"))?;

    let body_len = cursor.read_u32::<LittleEndian>().map_err(fixed)? as usize;
    let body = Bytes::from(read_bytes(&mut cursor, body_len, limit)?);

    let meta_len = cursor.read_u32::<LittleEndian>().map_err(fixed)? as usize;
    let metadata = Bytes::from(read_bytes(&mut cursor, meta_len, limit)?);

    if cursor.position() as usize != limit {
        return Err(CorruptionError::InvalidField("trailing bytes"));
    }

    Ok(LogRecord {
        position,
        stream: StreamId::from(stream),
        event_number,
        event_type,
        body: RecordBody::from_bytes(kind, body)?,
        metadata,
        timestamp,
        flags,
    })
}

// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Persisted stream index (`index.map`).
//!
//! ```text
//! [magic: 4][version: u32][covered: u64][body_len: u64][checksum: u64][body]
//! ```
//! The body is the bincode encoding of the in-memory `StreamIndex`; the
//! checksum covers it. `covered` repeats the index's own covered position so
//! recovery can decide whether the file is usable without decoding it.

use crate::checkpoint::write_atomic;
use crate::error::{PersistenceError, Result};
use byteorder::{ByteOrder, LittleEndian};
use crc64fast::Digest;
use std::fs;
use std::io;
use std::path::Path;
use tessera_kernel::{LogPosition, StreamIndex};

pub const INDEX_FILE_NAME: &str = "index.map";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFileHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub covered: LogPosition,
    pub body_len: u64,
    pub checksum: u64,
}

impl IndexFileHeader {
    pub const SIZE: usize = 4 + 4 + 8 + 8 + 8; // 32 bytes
    pub const MAGIC: [u8; 4] = *b"TSIX";
    pub const VERSION: u32 = 1;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        LittleEndian::write_u32(&mut buf[4..8], self.version);
        LittleEndian::write_u64(&mut buf[8..16], self.covered.0);
        LittleEndian::write_u64(&mut buf[16..24], self.body_len);
        LittleEndian::write_u64(&mut buf[24..32], self.checksum);
        buf
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(PersistenceError::InvalidFormat("index file shorter than its header".to_string()));
        }
        if buf[0..4] != Self::MAGIC {
            return Err(PersistenceError::InvalidMagic);
        }
        let version = LittleEndian::read_u32(&buf[4..8]);
        if version != Self::VERSION {
            return Err(PersistenceError::UnsupportedVersion(version));
        }
        Ok(Self {
            magic: Self::MAGIC,
            version,
            covered: LogPosition(LittleEndian::read_u64(&buf[8..16])),
            body_len: LittleEndian::read_u64(&buf[16..24]),
            checksum: LittleEndian::read_u64(&buf[24..32]),
        })
    }
}

fn checksum(body: &[u8]) -> u64 {
    let mut digest = Digest::new();
    digest.write(body);
    digest.sum64()
}

pub fn save(path: &Path, index: &StreamIndex) -> Result<()> {
    let body = bincode::serde::encode_to_vec(index, bincode::config::standard())
        .map_err(|e| PersistenceError::InvalidFormat(format!("index encode failed: {}", e)))?;
    let header = IndexFileHeader {
        magic: IndexFileHeader::MAGIC,
        version: IndexFileHeader::VERSION,
        covered: index.covered(),
        body_len: body.len() as u64,
        checksum: checksum(&body),
    };
    let mut bytes = Vec::with_capacity(IndexFileHeader::SIZE + body.len());
    bytes.extend_from_slice(&header.to_bytes());
    bytes.extend_from_slice(&body);
    write_atomic(path, &bytes)
}

/// `None` when no index was ever saved.
pub fn load(path: &Path) -> Result<Option<StreamIndex>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let header = IndexFileHeader::parse(&bytes)?;
    let body = &bytes[IndexFileHeader::SIZE..];
    if body.len() as u64 != header.body_len {
        return Err(PersistenceError::InvalidFormat(format!(
            "index body is {} bytes, header says {}",
            body.len(),
            header.body_len
        )));
    }
    let found = checksum(body);
    if found != header.checksum {
        return Err(PersistenceError::ChecksumMismatch {
            expected: header.checksum,
            found,
        });
    }
    let (index, _): (StreamIndex, usize) = bincode::serde::decode_from_slice(body, bincode::config::standard())
        .map_err(|e| PersistenceError::InvalidFormat(format!("index decode failed: {}", e)))?;
    if index.covered() != header.covered {
        return Err(PersistenceError::InvalidFormat("index covered position disagrees with header".to_string()));
    }
    Ok(Some(index))
}

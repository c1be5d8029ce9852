// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Checkpoint files.
//!
//! Each checkpoint is a tiny file holding one durable log position:
//! - `writer.chk`: everything before it is fsynced to the chunk files
//! - `chaser.chk`: everything before it is reflected in `index.map`
//!
//! Files are replaced atomically (temp file, fsync, rename), so a crash leaves
//! either the old or the new value, never a torn one.

use crate::error::{PersistenceError, Result};
use byteorder::{ByteOrder, LittleEndian};
use crc64fast::Digest;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tessera_kernel::LogPosition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Writer,
    Chaser,
}

impl Checkpoint {
    pub fn file_name(&self) -> &'static str {
        match self {
            Checkpoint::Writer => "writer.chk",
            Checkpoint::Chaser => "chaser.chk",
        }
    }
}

const MAGIC: [u8; 4] = *b"TSCP";
const VERSION: u32 = 1;
const SIZE: usize = 4 + 4 + 8 + 8;

fn encode(position: LogPosition) -> [u8; SIZE] {
    let mut buf = [0u8; SIZE];
    buf[0..4].copy_from_slice(&MAGIC);
    LittleEndian::write_u32(&mut buf[4..8], VERSION);
    LittleEndian::write_u64(&mut buf[8..16], position.0);
    let mut digest = Digest::new();
    digest.write(&buf[..16]);
    LittleEndian::write_u64(&mut buf[16..24], digest.sum64());
    buf
}

fn decode(buf: &[u8]) -> Result<LogPosition> {
    if buf.len() != SIZE {
        return Err(PersistenceError::InvalidFormat(format!(
            "checkpoint is {} bytes, expected {}",
            buf.len(),
            SIZE
        )));
    }
    if buf[0..4] != MAGIC {
        return Err(PersistenceError::InvalidMagic);
    }
    let expected = LittleEndian::read_u64(&buf[16..24]);
    let mut digest = Digest::new();
    digest.write(&buf[..16]);
    let found = digest.sum64();
    if expected != found {
        return Err(PersistenceError::ChecksumMismatch { expected, found });
    }
    let version = LittleEndian::read_u32(&buf[4..8]);
    if version != VERSION {
        return Err(PersistenceError::UnsupportedVersion(version));
    }
    Ok(LogPosition(LittleEndian::read_u64(&buf[8..16])))
}

/// Fsyncs a directory so renames inside it are durable.
pub fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    File::open(dir)?.sync_all()?;
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// Replaces `path` with `bytes`: temp file, fsync, rename, directory fsync.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    if let Some(dir) = path.parent() {
        sync_dir(dir)?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, checkpoint: Checkpoint) -> PathBuf {
        self.dir.join(checkpoint.file_name())
    }

    pub fn write(&self, checkpoint: Checkpoint, position: LogPosition) -> Result<()> {
        write_atomic(&self.path(checkpoint), &encode(position))
    }

    /// `None` when the checkpoint was never written.
    pub fn read(&self, checkpoint: Checkpoint) -> Result<Option<LogPosition>> {
        match fs::read(self.path(checkpoint)) {
            Ok(bytes) => decode(&bytes).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

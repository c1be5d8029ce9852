// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Chunk Store
//!
//! The transaction log as an ordered set of chunk files. Position
//! `p` lives in chunk `p / chunk_size` at local offset `p % chunk_size`.
//!
//! The chunk table holds `Arc<Chunk>`s: a reader clones the `Arc` and keeps a
//! valid view even if the scavenger swaps the chunk out from under it.

use crate::checkpoint::sync_dir;
use crate::chunk::{chunk_file_name, parse_chunk_file_name, Chunk, ChunkRewrite};
use crate::error::{PersistenceError, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tessera_kernel::codec::decode;
use tessera_kernel::{ChunkNumber, LogPosition, LogRecord};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ChunkStoreOptions {
    /// Capacity of each chunk's frame area.
    pub chunk_size: u64,
    /// Recompute every completed chunk's checksum at open.
    pub verify_on_open: bool,
}

impl Default for ChunkStoreOptions {
    fn default() -> Self {
        Self {
            chunk_size: 256 * 1024 * 1024,
            verify_on_open: false,
        }
    }
}

/// Sizes before and after a chunk replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceStats {
    pub old_size: u64,
    pub new_size: u64,
}

pub struct ChunkStore {
    dir: PathBuf,
    chunk_size: u64,
    chunks: RwLock<Vec<Arc<Chunk>>>,
}

impl ChunkStore {
    pub fn open(dir: impl AsRef<Path>, options: ChunkStoreOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut versions: BTreeMap<ChunkNumber, Vec<u32>> = BTreeMap::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(".tmp") {
                info!(file = name, "Removing leftover temp file");
                fs::remove_file(entry.path())?;
                continue;
            }
            if let Some((number, version)) = parse_chunk_file_name(name) {
                versions.entry(number).or_default().push(version);
            }
        }

        let mut chunks = Vec::with_capacity(versions.len());
        let last = versions.keys().next_back().copied();
        for (expected, (number, mut found)) in versions.into_iter().enumerate() {
            if number.0 as usize != expected {
                return Err(PersistenceError::InvalidFormat(format!(
                    "chunk {} is missing",
                    expected
                )));
            }
            found.sort_unstable();
            let Some(version) = found.pop() else { continue };
            // A crash between installing a scavenged chunk and unlinking the
            // one it replaced leaves both behind.
            for stale in found {
                let path = dir.join(chunk_file_name(number, stale));
                info!(chunk = %number, version = stale, "Removing superseded chunk version");
                fs::remove_file(path)?;
            }

            let path = dir.join(chunk_file_name(number, version));
            // Earlier chunks were opened as completed, so a headerless last
            // chunk is a rollover that crashed before its first append.
            if Some(number) == last && version == 0 && Chunk::has_unfinished_header(&path)? {
                warn!(chunk = %number, "Chunk header never completed, recreating it");
                chunks.push(Arc::new(Chunk::create(&dir, number, options.chunk_size)?));
                sync_dir(&dir)?;
                continue;
            }
            let chunk = Chunk::open(&path, version, Some(number) == last, options.verify_on_open).map_err(|e| {
                error!(chunk = %number, error = %e, "Chunk failed validation");
                e
            })?;
            if chunk.header().chunk_number != number || chunk.header().chunk_size != options.chunk_size {
                return Err(PersistenceError::InvalidFormat(format!(
                    "{} does not match its name or the configured chunk size {}",
                    path.display(),
                    options.chunk_size
                )));
            }
            chunks.push(Arc::new(chunk));
        }

        let next = match chunks.last() {
            None => Some(ChunkNumber(0)),
            Some(c) if c.is_completed() => Some(c.number().next()),
            Some(_) => None,
        };
        if let Some(number) = next {
            chunks.push(Arc::new(Chunk::create(&dir, number, options.chunk_size)?));
            sync_dir(&dir)?;
        }

        let store = Self {
            dir,
            chunk_size: options.chunk_size,
            chunks: RwLock::new(chunks),
        };
        info!(
            dir = %store.dir.display(),
            chunks = store.chunk_count(),
            write_position = %store.write_position(),
            "Chunk store opened"
        );
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.read().len()
    }

    fn active(&self) -> Arc<Chunk> {
        let chunks = self.chunks.read();
        // The table always ends with the active chunk.
        Arc::clone(&chunks[chunks.len() - 1])
    }

    pub fn chunk(&self, number: ChunkNumber) -> Option<Arc<Chunk>> {
        self.chunks.read().get(number.0 as usize).cloned()
    }

    /// Completed chunks, oldest first.
    pub fn completed_chunks(&self) -> Vec<Arc<Chunk>> {
        self.chunks
            .read()
            .iter()
            .filter(|c| c.is_completed())
            .cloned()
            .collect()
    }

    /// Position the next append lands at.
    pub fn write_position(&self) -> LogPosition {
        let active = self.active();
        active.start_position().advance(active.data_size())
    }

    /// Log position of the active chunk's first byte.
    pub fn active_start(&self) -> LogPosition {
        self.active().start_position()
    }

    pub fn remaining_in_active(&self) -> u64 {
        self.active().remaining()
    }

    /// Appends pre-encoded frames to the active chunk. Frames never straddle
    /// chunks: callers roll over first when `bytes` does not fit.
    pub fn append(&self, bytes: &[u8]) -> Result<LogPosition> {
        let active = self.active();
        let local = active.append(bytes)?;
        Ok(active.start_position().advance(local))
    }

    /// Seals the active chunk and starts the next one.
    pub fn rollover(&self) -> Result<ChunkNumber> {
        let active = self.active();
        let sealed = active.seal()?;
        let next = Chunk::create(&self.dir, active.number().next(), self.chunk_size)?;
        sync_dir(&self.dir)?;
        let number = next.number();
        {
            let mut chunks = self.chunks.write();
            let last = chunks.len() - 1;
            chunks[last] = Arc::new(sealed);
            chunks.push(Arc::new(next));
        }
        info!(completed = %active.number(), active = %number, "Chunk rollover");
        Ok(number)
    }

    /// Drops everything at or after `position`, which must lie in the
    /// active chunk.
    pub fn truncate_active(&self, position: LogPosition) -> Result<()> {
        let active = self.active();
        let start = active.start_position();
        if position < start || position > self.write_position() {
            return Err(PersistenceError::InvalidFormat(format!(
                "cannot truncate to {} outside the active chunk starting at {}",
                position, start
            )));
        }
        warn!(from = %self.write_position(), to = %position, "Truncating log");
        active.truncate(position.0 - start.0)
    }

    /// Fsyncs the active chunk and returns the durable end of the log.
    pub fn flush(&self) -> Result<LogPosition> {
        let active = self.active();
        let end = active.start_position().advance(active.data_size());
        active.sync()?;
        Ok(end)
    }

    fn locate(&self, position: LogPosition) -> Result<(Arc<Chunk>, u64)> {
        let number = ChunkNumber((position.0 / self.chunk_size) as u32);
        let chunk = self.chunk(number).ok_or(PersistenceError::NotFound(position))?;
        Ok((chunk, position.0 % self.chunk_size))
    }

    /// Raw frame of the record at `position`.
    pub fn read(&self, position: LogPosition) -> Result<Vec<u8>> {
        let (chunk, local) = self.locate(position)?;
        chunk.read(local).map_err(|e| {
            if chunk.is_completed() && e.is_corruption() {
                error!(position = %position, chunk = %chunk.number(), error = %e, "Integrity fault in completed chunk");
            }
            e
        })
    }

    /// Decoded record at `position`.
    pub fn read_record(&self, position: LogPosition) -> Result<LogRecord> {
        let frame = self.read(position)?;
        decode(&frame).map_err(|e| {
            error!(position = %position, error = %e, "Record failed to decode");
            PersistenceError::corruption(position, e)
        })
    }

    /// First record at or after `position`, crossing chunk boundaries.
    /// `None` at the end of the log.
    pub fn next_frame(&self, position: LogPosition) -> Result<Option<(LogPosition, Vec<u8>)>> {
        let mut number = ChunkNumber((position.0 / self.chunk_size) as u32);
        let mut local = position.0 % self.chunk_size;
        while let Some(chunk) = self.chunk(number) {
            if let Some((found, frame)) = chunk.next_frame(local)? {
                return Ok(Some((chunk.start_position().advance(found), frame)));
            }
            number = number.next();
            local = 0;
        }
        Ok(None)
    }

    /// Starts writing a replacement for a completed chunk.
    pub fn begin_rewrite(&self, chunk: &Chunk) -> Result<ChunkRewrite> {
        if !chunk.is_completed() {
            return Err(PersistenceError::InvalidFormat(format!(
                "chunk {} is still active",
                chunk.number()
            )));
        }
        ChunkRewrite::begin(&self.dir, chunk)
    }

    /// Installs a finished rewrite: rename into place, swap the table entry,
    /// unlink the old file. Readers holding the old `Arc` are unaffected.
    pub fn replace_chunk(&self, rewrite: ChunkRewrite) -> Result<ReplaceStats> {
        let number = rewrite.number();
        let version = rewrite.version();
        let old = self.chunk(number).ok_or_else(|| {
            PersistenceError::InvalidFormat(format!("no chunk {} to replace", number))
        })?;

        let path = rewrite.finish()?;
        sync_dir(&self.dir)?;
        let new = Arc::new(Chunk::open(&path, version, false, false)?);
        let stats = ReplaceStats {
            old_size: old.file_size(),
            new_size: new.file_size(),
        };

        {
            let mut chunks = self.chunks.write();
            chunks[number.0 as usize] = new;
        }

        if let Err(e) = fs::remove_file(old.path()) {
            // The next open removes superseded versions.
            warn!(chunk = %number, error = %e, "Could not remove replaced chunk file");
        }
        debug!(chunk = %number, version, old_size = stats.old_size, new_size = stats.new_size, "Chunk replaced");
        Ok(stats)
    }
}

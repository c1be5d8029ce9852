// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Chunk files.
//!
//! # File Format
//! ```text
//! [header: 64 bytes][frames][position map: 16 bytes per entry][footer: 48 bytes]
//! ```
//!
//! A chunk being written has only the header and frames. Sealing appends the
//! footer, after which the file never changes again. Scavenged chunks carry a
//! position map from logical offsets (what `LogPosition`s address) to
//! physical offsets inside the compacted frame area.

use crate::error::{PersistenceError, Result};
use byteorder::{ByteOrder, LittleEndian};
use crc64fast::Digest;
use memmap2::{Mmap, MmapOptions};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tessera_kernel::codec::{frame_len, FRAME_OVERHEAD};
use tessera_kernel::{ChunkNumber, CorruptionError, LogPosition};
use tracing::warn;

pub const CHUNK_FORMAT_VERSION: u32 = 1;

/// Set on chunks produced by the scavenger.
pub const FLAG_SCAVENGED: u32 = 0x0000_0001;

pub fn chunk_file_name(number: ChunkNumber, version: u32) -> String {
    format!("chunk-{:06}.{:06}", number.0, version)
}

/// Inverse of [`chunk_file_name`].
pub fn parse_chunk_file_name(name: &str) -> Option<(ChunkNumber, u32)> {
    let rest = name.strip_prefix("chunk-")?;
    let (number, version) = rest.split_once('.')?;
    if number.len() != 6 || version.len() != 6 {
        return None;
    }
    Some((ChunkNumber(number.parse().ok()?), version.parse().ok()?))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub chunk_number: ChunkNumber,
    /// Capacity of the frame area in bytes.
    pub chunk_size: u64,
    pub created_at: u64,
    pub flags: u32,
    pub reserved: [u8; 24],
}

impl ChunkHeader {
    pub const SIZE: usize = 4 + 4 + 4 + 8 + 8 + 4 + 24 + 8; // 64 bytes
    pub const MAGIC: [u8; 4] = *b"TSCK";

    pub fn new(chunk_number: ChunkNumber, chunk_size: u64, flags: u32) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            magic: Self::MAGIC,
            version: CHUNK_FORMAT_VERSION,
            chunk_number,
            chunk_size,
            created_at,
            flags,
            reserved: [0; 24],
        }
    }

    pub fn is_scavenged(&self) -> bool {
        self.flags & FLAG_SCAVENGED != 0
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        LittleEndian::write_u32(&mut buf[4..8], self.version);
        LittleEndian::write_u32(&mut buf[8..12], self.chunk_number.0);
        LittleEndian::write_u64(&mut buf[12..20], self.chunk_size);
        LittleEndian::write_u64(&mut buf[20..28], self.created_at);
        LittleEndian::write_u32(&mut buf[28..32], self.flags);
        buf[32..56].copy_from_slice(&self.reserved);
        let mut digest = Digest::new();
        digest.write(&buf[..56]);
        LittleEndian::write_u64(&mut buf[56..64], digest.sum64());
        buf
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(PersistenceError::InvalidFormat(format!(
                "chunk header needs {} bytes, found {}",
                Self::SIZE,
                buf.len()
            )));
        }
        if buf[0..4] != Self::MAGIC {
            return Err(PersistenceError::InvalidMagic);
        }
        let expected = LittleEndian::read_u64(&buf[56..64]);
        let mut digest = Digest::new();
        digest.write(&buf[..56]);
        let found = digest.sum64();
        if expected != found {
            return Err(PersistenceError::ChecksumMismatch { expected, found });
        }
        let version = LittleEndian::read_u32(&buf[4..8]);
        if version != CHUNK_FORMAT_VERSION {
            return Err(PersistenceError::UnsupportedVersion(version));
        }
        let mut reserved = [0u8; 24];
        reserved.copy_from_slice(&buf[32..56]);
        Ok(Self {
            magic: Self::MAGIC,
            version,
            chunk_number: ChunkNumber(LittleEndian::read_u32(&buf[8..12])),
            chunk_size: LittleEndian::read_u64(&buf[12..20]),
            created_at: LittleEndian::read_u64(&buf[20..28]),
            flags: LittleEndian::read_u32(&buf[28..32]),
            reserved,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFooter {
    pub magic: [u8; 4],
    pub flags: u32,
    pub record_count: u64,
    /// Bytes of frames physically present.
    pub data_size: u64,
    /// Logical end of the frame area before any scavenging.
    pub logical_size: u64,
    pub map_count: u64,
    /// CRC-64 over header, frames and position map.
    pub checksum: u64,
}

impl ChunkFooter {
    pub const SIZE: usize = 4 + 4 + 8 + 8 + 8 + 8 + 8; // 48 bytes
    pub const MAGIC: [u8; 4] = *b"TSCF";

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        LittleEndian::write_u32(&mut buf[4..8], self.flags);
        LittleEndian::write_u64(&mut buf[8..16], self.record_count);
        LittleEndian::write_u64(&mut buf[16..24], self.data_size);
        LittleEndian::write_u64(&mut buf[24..32], self.logical_size);
        LittleEndian::write_u64(&mut buf[32..40], self.map_count);
        LittleEndian::write_u64(&mut buf[40..48], self.checksum);
        buf
    }

    /// Parses the footer occupying the last bytes of a file of `file_len`
    /// bytes. `None` when the tail is not a footer consistent with that length.
    pub fn parse_tail(buf: &[u8], file_len: u64) -> Option<Self> {
        if buf.len() != Self::SIZE || buf[0..4] != Self::MAGIC {
            return None;
        }
        let footer = Self {
            magic: Self::MAGIC,
            flags: LittleEndian::read_u32(&buf[4..8]),
            record_count: LittleEndian::read_u64(&buf[8..16]),
            data_size: LittleEndian::read_u64(&buf[16..24]),
            logical_size: LittleEndian::read_u64(&buf[24..32]),
            map_count: LittleEndian::read_u64(&buf[32..40]),
            checksum: LittleEndian::read_u64(&buf[40..48]),
        };
        let expected_len = (ChunkHeader::SIZE as u64)
            .checked_add(footer.data_size)?
            .checked_add(footer.map_count.checked_mul(PosMapEntry::SIZE as u64)?)?
            .checked_add(Self::SIZE as u64)?;
        (expected_len == file_len && footer.data_size <= footer.logical_size).then_some(footer)
    }
}

/// One surviving record of a scavenged chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PosMapEntry {
    pub logical: u64,
    pub physical: u64,
}

impl PosMapEntry {
    pub const SIZE: usize = 16;

    fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u64(&mut buf[0..8], self.logical);
        LittleEndian::write_u64(&mut buf[8..16], self.physical);
        buf
    }

    fn parse(buf: &[u8]) -> Self {
        Self {
            logical: LittleEndian::read_u64(&buf[0..8]),
            physical: LittleEndian::read_u64(&buf[8..16]),
        }
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset)? {
            0 => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
            n => {
                let rest = buf;
                buf = &mut rest[n..];
                offset += n as u64;
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset)? {
            0 => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            n => {
                buf = &buf[n..];
                offset += n as u64;
            }
        }
    }
    Ok(())
}

struct ActiveChunk {
    file: File,
    /// Frame bytes written so far. Readers never look past it.
    written: AtomicU64,
}

struct CompletedChunk {
    mmap: Mmap,
    footer: ChunkFooter,
    posmap: Vec<PosMapEntry>,
}

enum ChunkState {
    Active(ActiveChunk),
    Completed(CompletedChunk),
}

/// One chunk file. Completed chunks are immutable and memory mapped; the
/// active chunk is appended to by the single writer and read with
/// positioned reads.
pub struct Chunk {
    header: ChunkHeader,
    version: u32,
    path: PathBuf,
    state: ChunkState,
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("number", &self.header.chunk_number)
            .field("version", &self.version)
            .field("completed", &self.is_completed())
            .field("data_size", &self.data_size())
            .finish()
    }
}

impl Chunk {
    /// Creates an empty chunk file ready for appends. A file left behind by
    /// a creation that never finished its header is reused.
    pub fn create(dir: &Path, number: ChunkNumber, chunk_size: u64) -> Result<Self> {
        let path = dir.join(chunk_file_name(number, 0));
        let header = ChunkHeader::new(number, chunk_size, 0);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let existing = file.metadata()?.len();
        if existing > ChunkHeader::SIZE as u64 {
            return Err(PersistenceError::InvalidFormat(format!(
                "{} already holds {} bytes",
                path.display(),
                existing
            )));
        }
        if existing > 0 {
            warn!(chunk = %number, bytes = existing, "Rewriting unfinished chunk header");
            file.set_len(0)?;
        }
        write_all_at(&file, &header.to_bytes(), 0)?;
        file.sync_all()?;
        Ok(Self {
            header,
            version: 0,
            path,
            state: ChunkState::Active(ActiveChunk {
                file,
                written: AtomicU64::new(0),
            }),
        })
    }

    /// Whether `path` is a chunk whose creation stopped before its header was
    /// durable. Such a file cannot hold records: appends start only after
    /// the header is synced.
    pub fn has_unfinished_header(path: &Path) -> Result<bool> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < ChunkHeader::SIZE as u64 {
            return Ok(true);
        }
        if file_len > ChunkHeader::SIZE as u64 {
            return Ok(false);
        }
        let mut header_buf = [0u8; ChunkHeader::SIZE];
        read_exact_at(&file, &mut header_buf, 0)?;
        Ok(ChunkHeader::parse(&header_buf).is_err())
    }

    /// Opens an existing chunk. A chunk without a valid footer is only
    /// accepted when `may_be_active` is set.
    pub fn open(path: &Path, version: u32, may_be_active: bool, verify: bool) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_len = file.metadata()?.len();

        let mut header_buf = [0u8; ChunkHeader::SIZE];
        read_exact_at(&file, &mut header_buf, 0).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => PersistenceError::InvalidFormat(format!(
                "{} is shorter than a chunk header",
                path.display()
            )),
            _ => PersistenceError::IoError(e),
        })?;
        let header = ChunkHeader::parse(&header_buf)?;

        let footer = if file_len >= (ChunkHeader::SIZE + ChunkFooter::SIZE) as u64 {
            let mut tail = [0u8; ChunkFooter::SIZE];
            read_exact_at(&file, &mut tail, file_len - ChunkFooter::SIZE as u64)?;
            ChunkFooter::parse_tail(&tail, file_len)
        } else {
            None
        };

        let state = match footer {
            Some(footer) => {
                // SAFETY: completed chunks are never written again; scavenging
                // replaces them with a new file instead.
                let mmap = unsafe { Mmap::map(&file)? };
                let map_start = ChunkHeader::SIZE + footer.data_size as usize;
                let posmap = mmap[map_start..map_start + footer.map_count as usize * PosMapEntry::SIZE]
                    .chunks_exact(PosMapEntry::SIZE)
                    .map(PosMapEntry::parse)
                    .collect();
                ChunkState::Completed(CompletedChunk { mmap, footer, posmap })
            }
            None if may_be_active => {
                let mut written = file_len - ChunkHeader::SIZE as u64;
                if written > header.chunk_size {
                    // Only an interrupted seal writes past the frame area.
                    warn!(
                        chunk = %header.chunk_number,
                        excess = written - header.chunk_size,
                        "Dropping torn footer past the end of the frame area"
                    );
                    file.set_len(ChunkHeader::SIZE as u64 + header.chunk_size)?;
                    file.sync_all()?;
                    written = header.chunk_size;
                }
                ChunkState::Active(ActiveChunk {
                    file,
                    written: AtomicU64::new(written),
                })
            }
            None => {
                return Err(PersistenceError::InvalidFormat(format!(
                    "{} is not the last chunk but has no footer",
                    path.display()
                )))
            }
        };

        let chunk = Self {
            header,
            version,
            path: path.to_path_buf(),
            state,
        };
        if verify {
            chunk.verify()?;
        }
        Ok(chunk)
    }

    pub fn number(&self) -> ChunkNumber {
        self.header.chunk_number
    }

    /// File generation, bumped each time the chunk is scavenged.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &ChunkHeader {
        &self.header
    }

    pub fn footer(&self) -> Option<&ChunkFooter> {
        match &self.state {
            ChunkState::Completed(c) => Some(&c.footer),
            ChunkState::Active(_) => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.state, ChunkState::Completed(_))
    }

    /// Log position of the chunk's first byte.
    pub fn start_position(&self) -> LogPosition {
        LogPosition(self.header.chunk_number.0 as u64 * self.header.chunk_size)
    }

    fn position_of(&self, local: u64) -> LogPosition {
        self.start_position().advance(local)
    }

    /// Bytes of frames physically stored.
    pub fn data_size(&self) -> u64 {
        match &self.state {
            ChunkState::Active(a) => a.written.load(Ordering::Acquire),
            ChunkState::Completed(c) => c.footer.data_size,
        }
    }

    /// End of the logical frame area; positions at or past it live in a
    /// later chunk.
    pub fn logical_size(&self) -> u64 {
        match &self.state {
            ChunkState::Active(a) => a.written.load(Ordering::Acquire),
            ChunkState::Completed(c) => c.footer.logical_size,
        }
    }

    /// Size of the whole file on disk.
    pub fn file_size(&self) -> u64 {
        match &self.state {
            ChunkState::Active(a) => ChunkHeader::SIZE as u64 + a.written.load(Ordering::Acquire),
            ChunkState::Completed(c) => c.mmap.len() as u64,
        }
    }

    pub fn remaining(&self) -> u64 {
        match &self.state {
            ChunkState::Active(a) => self.header.chunk_size.saturating_sub(a.written.load(Ordering::Acquire)),
            ChunkState::Completed(_) => 0,
        }
    }

    fn active(&self) -> Result<&ActiveChunk> {
        match &self.state {
            ChunkState::Active(a) => Ok(a),
            ChunkState::Completed(_) => Err(PersistenceError::InvalidFormat(format!(
                "chunk {} is completed",
                self.header.chunk_number
            ))),
        }
    }

    /// Appends `bytes` and returns the local offset they start at. Only the
    /// single writer calls this.
    pub fn append(&self, bytes: &[u8]) -> Result<u64> {
        let active = self.active()?;
        let offset = active.written.load(Ordering::Acquire);
        let remaining = self.header.chunk_size.saturating_sub(offset);
        if bytes.len() as u64 > remaining {
            return Err(PersistenceError::ChunkFull {
                needed: bytes.len() as u64,
                remaining,
            });
        }
        write_all_at(&active.file, bytes, ChunkHeader::SIZE as u64 + offset)?;
        active.written.store(offset + bytes.len() as u64, Ordering::Release);
        Ok(offset)
    }

    /// Drops everything from `local` onwards.
    pub fn truncate(&self, local: u64) -> Result<()> {
        let active = self.active()?;
        active.written.store(local, Ordering::Release);
        active.file.set_len(ChunkHeader::SIZE as u64 + local)?;
        active.file.sync_all()?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        if let ChunkState::Active(a) = &self.state {
            a.file.sync_data()?;
        }
        Ok(())
    }

    /// Writes the footer and returns the chunk reopened as completed.
    pub fn seal(&self) -> Result<Chunk> {
        let active = self.active()?;
        let data_size = active.written.load(Ordering::Acquire);
        let content_len = ChunkHeader::SIZE as u64 + data_size;

        let (checksum, record_count) = {
            // SAFETY: the writer is parked on this seal; nothing appends
            // to the mapped range while it is alive.
            let view = unsafe { MmapOptions::new().len(content_len as usize).map(&active.file)? };
            let mut digest = Digest::new();
            digest.write(&view);
            let record_count = count_frames(&view[ChunkHeader::SIZE..]);
            (digest.sum64(), record_count)
        };

        let footer = ChunkFooter {
            magic: ChunkFooter::MAGIC,
            flags: self.header.flags,
            record_count,
            data_size,
            logical_size: data_size,
            map_count: 0,
            checksum,
        };
        write_all_at(&active.file, &footer.to_bytes(), content_len)?;
        active.file.sync_all()?;

        Chunk::open(&self.path, self.version, false, false)
    }

    /// Recomputes the content checksum of a completed chunk.
    pub fn verify(&self) -> Result<()> {
        if let ChunkState::Completed(c) = &self.state {
            let end = c.mmap.len() - ChunkFooter::SIZE;
            let mut digest = Digest::new();
            digest.write(&c.mmap[..end]);
            let found = digest.sum64();
            if found != c.footer.checksum {
                return Err(PersistenceError::ChecksumMismatch {
                    expected: c.footer.checksum,
                    found,
                });
            }
        }
        Ok(())
    }

    fn physical_offset(&self, local: u64) -> Option<u64> {
        match &self.state {
            ChunkState::Active(a) => (local < a.written.load(Ordering::Acquire)).then_some(local),
            ChunkState::Completed(c) if !self.header.is_scavenged() => {
                (local < c.footer.data_size).then_some(local)
            }
            ChunkState::Completed(c) => c
                .posmap
                .binary_search_by_key(&local, |e| e.logical)
                .ok()
                .map(|i| c.posmap[i].physical),
        }
    }

    fn frame_at_physical(&self, physical: u64) -> std::result::Result<Vec<u8>, CorruptionError> {
        let limit = self.data_size();
        let available = limit.saturating_sub(physical) as usize;
        let truncated = |declared| CorruptionError::LengthMismatch { declared, available };
        if physical >= limit {
            return Err(truncated(FRAME_OVERHEAD));
        }
        let start = ChunkHeader::SIZE as u64 + physical;

        match &self.state {
            ChunkState::Completed(c) => {
                let from = start as usize;
                let data = &c.mmap[from..ChunkHeader::SIZE + limit as usize];
                let len = frame_len(data).ok_or_else(|| truncated(FRAME_OVERHEAD))?;
                data.get(..len).map(<[u8]>::to_vec).ok_or_else(|| truncated(len))
            }
            ChunkState::Active(a) => {
                let mut prefix = [0u8; 4];
                if available < prefix.len() {
                    return Err(truncated(FRAME_OVERHEAD));
                }
                read_exact_at(&a.file, &mut prefix, start).map_err(|_| truncated(FRAME_OVERHEAD))?;
                let len = frame_len(&prefix).ok_or_else(|| truncated(FRAME_OVERHEAD))?;
                if len > available {
                    return Err(truncated(len));
                }
                let mut frame = vec![0u8; len];
                read_exact_at(&a.file, &mut frame, start).map_err(|_| truncated(len))?;
                Ok(frame)
            }
        }
    }

    /// Raw frame of the record at `local`.
    pub fn read(&self, local: u64) -> Result<Vec<u8>> {
        let position = self.position_of(local);
        let physical = self
            .physical_offset(local)
            .ok_or(PersistenceError::NotFound(position))?;
        self.frame_at_physical(physical)
            .map_err(|e| PersistenceError::corruption(position, e))
    }

    /// First record at or after `local`, with its local offset. `None` past
    /// the last record of this chunk.
    pub fn next_frame(&self, local: u64) -> Result<Option<(u64, Vec<u8>)>> {
        let (logical, physical) = match &self.state {
            ChunkState::Completed(c) if self.header.is_scavenged() => {
                let i = c.posmap.partition_point(|e| e.logical < local);
                match c.posmap.get(i) {
                    Some(e) => (e.logical, e.physical),
                    None => return Ok(None),
                }
            }
            _ if local >= self.data_size() => return Ok(None),
            _ => (local, local),
        };
        let frame = self
            .frame_at_physical(physical)
            .map_err(|e| PersistenceError::corruption(self.position_of(logical), e))?;
        Ok(Some((logical, frame)))
    }
}

fn count_frames(mut data: &[u8]) -> u64 {
    let mut count = 0;
    while let Some(len) = frame_len(data) {
        if len > data.len() {
            break;
        }
        data = &data[len..];
        count += 1;
    }
    count
}

/// Streams the surviving records of a chunk into a replacement file.
pub struct ChunkRewrite {
    number: ChunkNumber,
    version: u32,
    logical_size: u64,
    tmp_path: PathBuf,
    final_path: PathBuf,
    writer: BufWriter<File>,
    digest: Digest,
    posmap: Vec<PosMapEntry>,
    data_size: u64,
}

impl ChunkRewrite {
    /// Starts a rewrite of `source` as the next file version.
    pub fn begin(dir: &Path, source: &Chunk) -> Result<Self> {
        let number = source.number();
        let version = source.version() + 1;
        let final_path = dir.join(chunk_file_name(number, version));
        let tmp_path = dir.join(format!("{}.tmp", chunk_file_name(number, version)));

        let header = ChunkHeader::new(number, source.header().chunk_size, source.header().flags | FLAG_SCAVENGED);
        let header_bytes = header.to_bytes();
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        writer.write_all(&header_bytes)?;
        let mut digest = Digest::new();
        digest.write(&header_bytes);

        Ok(Self {
            number,
            version,
            logical_size: source.logical_size(),
            tmp_path,
            final_path,
            writer,
            digest,
            posmap: Vec::new(),
            data_size: 0,
        })
    }

    pub fn number(&self) -> ChunkNumber {
        self.number
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn record_count(&self) -> u64 {
        self.posmap.len() as u64
    }

    /// Copies a kept frame, which keeps its logical offset `local`.
    pub fn push(&mut self, local: u64, frame: &[u8]) -> Result<()> {
        self.writer.write_all(frame)?;
        self.digest.write(frame);
        self.posmap.push(PosMapEntry {
            logical: local,
            physical: self.data_size,
        });
        self.data_size += frame.len() as u64;
        Ok(())
    }

    /// Writes position map and footer, fsyncs and renames into place.
    /// Returns the final path.
    pub fn finish(mut self) -> Result<PathBuf> {
        for entry in &self.posmap {
            let bytes = entry.to_bytes();
            self.writer.write_all(&bytes)?;
            self.digest.write(&bytes);
        }
        let footer = ChunkFooter {
            magic: ChunkFooter::MAGIC,
            flags: FLAG_SCAVENGED,
            record_count: self.posmap.len() as u64,
            data_size: self.data_size,
            logical_size: self.logical_size,
            map_count: self.posmap.len() as u64,
            checksum: self.digest.sum64(),
        };
        self.writer.write_all(&footer.to_bytes())?;
        let file = self
            .writer
            .into_inner()
            .map_err(|e| PersistenceError::IoError(e.into_error()))?;
        file.sync_all()?;
        drop(file);
        fs::rename(&self.tmp_path, &self.final_path)?;
        Ok(self.final_path)
    }

    /// Discards the partially written replacement.
    pub fn abort(self) {
        let ChunkRewrite { tmp_path, writer, .. } = self;
        drop(writer);
        let _ = fs::remove_file(tmp_path);
    }
}

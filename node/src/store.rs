// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Store facade.
//!
//! Owns the chunk store, the stream index and the single writer. Every
//! mutation funnels through `Mutex<Writer>`; reads go straight to the index
//! and the chunks.

use crate::background::BackgroundTasks;
use crate::config::StoreConfig;
use crate::errors::{EngineError, Result};
use crate::reader::{AllSlice, EventReadResult, Reader, StreamMetadataResult, StreamSlice};
use crate::recovery::{recover, RecoveryReport};
use crate::scavenger::{Scavenger, ScavengeReport};
use crate::writer::{DeleteResult, WriteResult, Writer};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tessera_kernel::codec::MIN_FRAME_LEN;
use tessera_kernel::{
    DeleteMode, EventData, EventNumber, ExpectedVersion, LogPosition, StreamId, StreamIndex, StreamMetadata,
    StreamPosition,
};
use tessera_persistence::idx::INDEX_FILE_NAME;
use tessera_persistence::{CheckpointManager, ChunkStore, ChunkStoreOptions};
use tokio_util::sync::CancellationToken;

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// State shared by the writer, readers, the scavenger and background tasks.
pub(crate) struct Shared {
    pub config: StoreConfig,
    pub chunks: ChunkStore,
    pub index: RwLock<StreamIndex>,
    pub checkpoints: CheckpointManager,
    pub index_path: PathBuf,
    closed: AtomicBool,
}

impl Shared {
    pub fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct Store {
    shared: Arc<Shared>,
    writer: Arc<Mutex<Writer>>,
    scavenging: Arc<Mutex<()>>,
    recovery: RecoveryReport,
}

impl Store {
    /// Opens (or creates) the store in `config.data_dir`, recovering from
    /// whatever state a previous run left behind.
    pub fn open(config: StoreConfig) -> Result<Self> {
        if config.chunk_size < MIN_FRAME_LEN as u64 || config.chunk_size > u32::MAX as u64 {
            return Err(EngineError::InvalidArgument(format!(
                "chunk size {} out of range",
                config.chunk_size
            )));
        }
        let chunks = ChunkStore::open(
            &config.data_dir,
            ChunkStoreOptions {
                chunk_size: config.chunk_size,
                verify_on_open: config.verify_chunks_on_open,
            },
        )?;
        let checkpoints = CheckpointManager::new(&config.data_dir);
        let index_path = config.data_dir.join(INDEX_FILE_NAME);

        let (index, recovery) = recover(&chunks, &checkpoints, &index_path)?;

        let shared = Arc::new(Shared {
            config,
            chunks,
            index: RwLock::new(index),
            checkpoints,
            index_path,
            closed: AtomicBool::new(false),
        });
        tracing::info!(
            "Store opened at {:?}: {} streams, write position {}",
            shared.config.data_dir,
            shared.index.read().stream_count(),
            shared.chunks.write_position()
        );

        Ok(Self {
            writer: Arc::new(Mutex::new(Writer::new(Arc::clone(&shared)))),
            shared,
            scavenging: Arc::new(Mutex::new(())),
            recovery,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    /// What recovery did when this store was opened.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// End of the log as seen by readers.
    pub fn write_position(&self) -> LogPosition {
        self.shared.index.read().covered()
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    fn reader(&self) -> Reader {
        Reader::new(Arc::clone(&self.shared))
    }

    pub fn append_to_stream(
        &self,
        stream: impl Into<StreamId>,
        expected: ExpectedVersion,
        events: Vec<EventData>,
    ) -> Result<WriteResult> {
        self.shared.ensure_open()?;
        self.writer.lock().append_to_stream(&stream.into(), expected, events)
    }

    pub fn delete_stream(&self, stream: impl Into<StreamId>, expected: ExpectedVersion, mode: DeleteMode) -> Result<DeleteResult> {
        self.shared.ensure_open()?;
        self.writer.lock().delete_stream(&stream.into(), expected, mode)
    }

    /// Writes a new metadata document for `stream`. `expected` guards the
    /// metastream's version.
    pub fn set_stream_metadata(
        &self,
        stream: impl Into<StreamId>,
        expected: ExpectedVersion,
        metadata: StreamMetadata,
    ) -> Result<WriteResult> {
        self.shared.ensure_open()?;
        self.writer.lock().set_stream_metadata(&stream.into(), expected, metadata)
    }

    pub fn get_stream_metadata(&self, stream: impl Into<StreamId>) -> Result<StreamMetadataResult> {
        self.shared.ensure_open()?;
        self.reader().get_stream_metadata(&stream.into())
    }

    pub fn read_stream_forward(
        &self,
        stream: impl Into<StreamId>,
        from: StreamPosition,
        max_count: i32,
        resolve_links: bool,
    ) -> Result<StreamSlice> {
        self.shared.ensure_open()?;
        self.reader().read_stream_forward(&stream.into(), from, max_count, resolve_links)
    }

    pub fn read_stream_backward(
        &self,
        stream: impl Into<StreamId>,
        from: StreamPosition,
        max_count: i32,
        resolve_links: bool,
    ) -> Result<StreamSlice> {
        self.shared.ensure_open()?;
        self.reader().read_stream_backward(&stream.into(), from, max_count, resolve_links)
    }

    pub fn read_event(&self, stream: impl Into<StreamId>, event_number: EventNumber, resolve_links: bool) -> Result<EventReadResult> {
        self.shared.ensure_open()?;
        self.reader().read_event(&stream.into(), event_number, resolve_links)
    }

    /// Reads every record of the log in position order, starting at `from`.
    pub fn read_all_forward(&self, from: LogPosition, max_count: i32) -> Result<AllSlice> {
        self.shared.ensure_open()?;
        self.reader().read_all_forward(from, max_count)
    }

    /// Fsyncs the log and advances the writer checkpoint. Returns the durable end.
    pub fn flush(&self) -> Result<LogPosition> {
        self.shared.ensure_open()?;
        self.writer.lock().flush()
    }

    /// Saves `index.map` and advances the chaser checkpoint.
    pub fn persist_index(&self) -> Result<()> {
        self.shared.ensure_open()?;
        self.writer.lock().persist_index()
    }

    /// Scavenges every completed chunk. Passes never overlap; a second caller
    /// waits for the running one.
    pub fn scavenge(&self, cancel: &CancellationToken) -> Result<ScavengeReport> {
        self.shared.ensure_open()?;
        let _guard = self.scavenging.lock();
        Ok(Scavenger::new(&self.shared).run(cancel))
    }

    /// Starts the checkpoint flusher and, when configured, the periodic
    /// scavenger. Must be called inside a tokio runtime.
    pub fn spawn_background(&self) -> BackgroundTasks {
        BackgroundTasks::spawn(self.clone())
    }

    /// Flushes everything and rejects further calls. Background tasks should
    /// be shut down first.
    pub fn close(&self) -> Result<()> {
        self.shared.ensure_open()?;
        let mut writer = self.writer.lock();
        writer.persist_index()?;
        self.shared.closed.store(true, Ordering::Release);
        tracing::info!("Store closed at {}", self.shared.chunks.write_position());
        Ok(())
    }
}

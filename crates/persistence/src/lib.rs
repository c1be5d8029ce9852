// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! tessera-persistence: on-disk formats of the event store. Chunk files,
//! checkpoints and the persisted stream index.

pub mod error;
pub mod chunk;
pub mod chunk_store;
pub mod checkpoint;
pub mod idx;
pub mod fixtures;

pub use checkpoint::{Checkpoint, CheckpointManager};
pub use chunk::{Chunk, ChunkRewrite};
pub use chunk_store::{ChunkStore, ChunkStoreOptions, ReplaceStats};
pub use error::{PersistenceError, Result};

// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! tessera-node: the event store engine. One writer, concurrent readers,
//! crash recovery at open and background checkpointing and scavenging.

pub mod config;
pub mod errors;
pub mod telemetry;
mod metadata;
pub mod store;
pub mod writer;
pub mod reader;
pub mod scavenger;
pub mod recovery;
pub mod background;

pub use background::BackgroundTasks;
pub use config::StoreConfig;
pub use errors::{EngineError, Result};
pub use reader::{AllSlice, EventReadResult, EventReadStatus, ResolvedEvent, StreamMetadataResult, StreamSlice};
pub use recovery::RecoveryReport;
pub use scavenger::ScavengeReport;
pub use store::Store;
pub use writer::{DeleteResult, WriteResult};

pub use tessera_kernel::{
    DeleteMode, EventData, EventNumber, ExpectedVersion, LogPosition, LogRecord, ReadDirection, RecordBody,
    SliceReadStatus, StreamId, StreamMetadata, StreamPosition,
};

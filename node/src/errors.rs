// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use tessera_kernel::error::KernelError;
use tessera_kernel::index::IndexError;
use tessera_kernel::{EventNumber, ExpectedVersion, LogPosition};
use tessera_persistence::PersistenceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Wrong expected version for {stream}: expected {expected:?}, current {current:?}")]
    WrongExpectedVersion {
        stream: String,
        expected: ExpectedVersion,
        current: Option<EventNumber>,
    },
    #[error("Stream {0} is deleted")]
    StreamDeleted(String),
    #[error("Corruption at log position {position}: {reason}")]
    Corruption { position: LogPosition, reason: String },
    #[error("Persistence error: {0}")]
    Persistence(PersistenceError),
    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),
    #[error("Index error: {0}")]
    Index(#[from] IndexError),
    #[error("Store is closed")]
    Closed,
}

impl From<PersistenceError> for EngineError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::Corruption { position, source } => EngineError::Corruption {
                position,
                reason: source.to_string(),
            },
            other => EngineError::Persistence(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

use thiserror::Error;

use crate::types::{Lsn, StoreId};

/// Faults reported by a persistent log engine.
///
/// None of these are recoverable by the log store; they surface unchanged.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupted segment {segment} at offset {offset}: {reason}")]
    Corrupted {
        segment: u64,
        offset: u64,
        reason: String,
    },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Append at id {id} behind engine end {end}")]
    InvalidId { id: StoreId, end: StoreId },

    #[error("Blocking task failed: {0}")]
    Task(String),
}

impl From<bincode::error::EncodeError> for EngineError {
    fn from(e: bincode::error::EncodeError) -> Self {
        Self::Codec(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for EngineError {
    fn from(e: bincode::error::DecodeError) -> Self {
        Self::Codec(e.to_string())
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

/// Errors surfaced by the log store to the consensus layer.
#[derive(Debug, Error)]
pub enum LogStoreError {
    #[error("Lsn {lsn} out of range [{start}, {next})")]
    OutOfRange { lsn: Lsn, start: Lsn, next: Lsn },

    #[error("Range [{from}, {to}) out of range [{start}, {next})")]
    InvalidRange {
        from: Lsn,
        to: Lsn,
        start: Lsn,
        next: Lsn,
    },

    #[error("Log entry at lsn {0} not found")]
    NotFound(Lsn),

    #[error("Corrupt packed blob: {0}")]
    CorruptBlob(String),

    #[error("Term 0 is reserved")]
    ReservedTerm,

    #[error("Engine failure: {0}")]
    Engine(#[from] EngineError),
}

impl LogStoreError {
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Self::OutOfRange { .. } | Self::InvalidRange { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

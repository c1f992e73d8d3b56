//! Raft log storage.
//!
//! `LogStore` exposes the lsn-addressed log a consensus layer expects
//! (append, rollback, ranged reads, compaction, bulk pack/unpack) on top of a
//! `LogEngine` that only stores opaque bytes under increasing ids.
//! `SegmentLogEngine` is the file-backed engine; `MemLogEngine` keeps
//! everything in memory and can simulate crashes.

pub mod codec;
pub mod error;
pub mod mock_storage;
pub mod storage;
pub mod store;
pub mod traits;
pub mod types;

pub use codec::{PackedBlob, PackedEntry, StoredEntry};
pub use error::{EngineError, LogStoreError};
pub use mock_storage::MemLogEngine;
pub use storage::{SegmentEngineOptions, SegmentLogEngine};
pub use store::{LogStore, LogStoreOptions};
pub use traits::{EngineResult, LogEngine, LogStoreResult, RaftLogStore};
pub use types::{IdRange, LogRecord, LogStoreState, Lsn, SlotState, StoreId, Term};

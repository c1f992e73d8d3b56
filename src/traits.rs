use async_trait::async_trait;

use crate::codec::PackedBlob;
use crate::error::{EngineError, LogStoreError};
use crate::types::{IdRange, LogRecord, Lsn, StoreId, Term};

// 结果类型别名
pub type EngineResult<T> = Result<T, EngineError>;
pub type LogStoreResult<T> = Result<T, LogStoreError>;

/// Durable, append-only store of opaque byte records addressed by a
/// monotonically increasing store-local id.
///
/// Implementations know nothing about lsns or terms. Mutations may be
/// buffered but must be visible to reads on the same instance immediately;
/// only `flush` makes them crash safe.
///
/// # Methods
///
/// - `append`: Store `bytes` at `id`. `id` must not be below the current end;
///   ids skipped over stay absent.
/// - `flush`: Durability barrier for every mutation issued before the call.
/// - `read`: Bytes stored at `id`, or `None` when nothing is stored there.
/// - `read_range`: Index aligned reads of `[from, to)`.
/// - `truncate_from`: Drop every id `>= id`.
/// - `compact_upto`: Drop every id `<= id`, advancing the end past `id` if needed.
/// - `recovered_range`: The `[start, end)` id range, as recovered on open and
///   maintained by the calls above.
#[async_trait]
pub trait LogEngine: Send + Sync {
    async fn append(&self, id: StoreId, bytes: Vec<u8>) -> EngineResult<StoreId>;

    async fn flush(&self) -> EngineResult<()>;

    async fn read(&self, id: StoreId) -> EngineResult<Option<Vec<u8>>>;

    async fn read_range(&self, from: StoreId, to: StoreId) -> EngineResult<Vec<Option<Vec<u8>>>>;

    async fn truncate_from(&self, id: StoreId) -> EngineResult<()>;

    async fn compact_upto(&self, id: StoreId) -> EngineResult<()>;

    fn recovered_range(&self) -> IdRange;
}

/// The log contract a consensus layer drives.
///
/// Mutating calls take `&mut self`: one writer per log, serialized by the
/// owning raft role. Reads may run concurrently and always observe the
/// latest completed mutation, flushed or not.
#[async_trait]
pub trait RaftLogStore: Send + Sync {
    /// Lowest lsn still readable.
    fn start_index(&self) -> Lsn;

    /// Lsn the next `append` will receive.
    fn next_slot(&self) -> Lsn;

    /// Highest lsn that would survive a crash right now.
    fn last_durable_index(&self) -> Lsn;

    async fn append(&mut self, term: Term, payload: Vec<u8>) -> LogStoreResult<Lsn>;

    /// Truncate everything at and after `lsn`, then store the record at `lsn`.
    async fn write_at(&mut self, lsn: Lsn, term: Term, payload: Vec<u8>) -> LogStoreResult<()>;

    async fn entry_at(&self, lsn: Lsn) -> LogStoreResult<LogRecord>;

    async fn term_at(&self, lsn: Lsn) -> LogStoreResult<Term>;

    /// Last record, or `LogRecord::sentinel()` when the log is empty.
    async fn last_entry(&self) -> LogStoreResult<LogRecord>;

    /// Records for `[from, to)`. Holes come back as placeholders so the
    /// result always holds `to - from` records.
    async fn log_entries(&self, from: Lsn, to: Lsn) -> LogStoreResult<Vec<LogRecord>>;

    /// Like `log_entries`, but stops before the payload total exceeds
    /// `max_bytes`. Never returns fewer than one record for a non-empty range.
    async fn log_entries_ext(
        &self,
        from: Lsn,
        to: Lsn,
        max_bytes: u64,
    ) -> LogStoreResult<Vec<LogRecord>>;

    async fn compact(&mut self, upto: Lsn) -> LogStoreResult<()>;

    async fn pack(&self, from: Lsn, cnt: u64) -> LogStoreResult<PackedBlob>;

    async fn apply_pack(&mut self, target: Lsn, blob: &PackedBlob) -> LogStoreResult<()>;

    async fn flush(&mut self) -> LogStoreResult<()>;

    /// Called once the consensus layer has appended `cnt` records starting at `start`.
    async fn end_of_append_batch(&mut self, start: Lsn, cnt: u64) -> LogStoreResult<()>;
}

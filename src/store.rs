//! Raft log store on top of a `LogEngine`.
//!
//! Lsns are 1-based and map onto engine ids as `id = lsn - 1`; nothing below
//! this module sees an lsn and nothing above it sees an id. The logical bounds
//! (`start_index`, `next_slot`) are never persisted separately: on open they
//! are taken from the engine's recovered id range.
//!
//! Holes come from two places. `apply_pack` at a target past `next_slot`
//! skips ids in the engine, and a packed hole is stored as an explicit hole
//! marker. Both read back as `NotFound`.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::codec::{PackedBlob, StoredEntry};
use crate::error::LogStoreError;
use crate::traits::{LogEngine, LogStoreResult, RaftLogStore};
use crate::types::{
    FIRST_LSN, LogRecord, LogStoreState, Lsn, RESERVED_TERM, SlotState, StoreId, Term,
};

/// Number of lsns fetched per engine read in `log_entries_ext`.
const EXT_READ_CHUNK: i64 = 128;

#[derive(Debug, Clone, Default)]
pub struct LogStoreOptions {
    /// Flush at the end of every append batch reported by the consensus layer.
    pub flush_on_batch_end: bool,
}

fn to_store_id(lsn: Lsn) -> StoreId {
    (lsn - FIRST_LSN) as StoreId
}

fn to_lsn(id: StoreId) -> Lsn {
    id as Lsn + FIRST_LSN
}

fn check_term(term: Term) -> LogStoreResult<()> {
    if term == RESERVED_TERM {
        return Err(LogStoreError::ReservedTerm);
    }
    Ok(())
}

fn encode_record(term: Term, payload: Vec<u8>) -> LogStoreResult<Vec<u8>> {
    Ok(StoredEntry::Record { term, payload }.serialize()?)
}

pub struct LogStore<E: LogEngine> {
    options: LogStoreOptions,
    engine: E,
    state: LogStoreState,
    /// `next_slot` as of the last flush, lowered by truncation.
    durable_slot: Lsn,
}

impl<E: LogEngine> LogStore<E> {
    /// Attach to `engine` and reconcile the bounds from its recovered range.
    ///
    /// A fresh engine yields an empty log starting at lsn 1.
    pub fn open(engine: E, options: LogStoreOptions) -> Self {
        let range = engine.recovered_range();
        let start_index = to_lsn(range.start);
        let next_slot = to_lsn(range.end).max(start_index);
        let state = LogStoreState {
            start_index,
            next_slot,
        };

        info!("Attached log store: engine range={}, lsn range={}", range, state);

        Self {
            options,
            engine,
            state,
            durable_slot: next_slot,
        }
    }

    pub fn state(&self) -> LogStoreState {
        self.state
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Give the engine back, e.g. to reopen it after a simulated restart.
    pub fn into_engine(self) -> E {
        self.engine
    }

    pub async fn slot_state(&self, lsn: Lsn) -> LogStoreResult<SlotState> {
        if lsn < self.state.start_index {
            return Ok(SlotState::Compacted);
        }
        if lsn >= self.state.next_slot {
            return Ok(SlotState::Unwritten);
        }
        match self.read_stored(lsn).await? {
            Some(StoredEntry::Record { .. }) => Ok(SlotState::Present),
            Some(StoredEntry::Hole) | None => Ok(SlotState::Hole),
        }
    }

    fn check_lsn(&self, lsn: Lsn) -> LogStoreResult<()> {
        if !self.state.contains(lsn) {
            return Err(self.out_of_range(lsn));
        }
        Ok(())
    }

    fn check_range(&self, from: Lsn, to: Lsn) -> LogStoreResult<()> {
        if from < self.state.start_index || to > self.state.next_slot || from > to {
            return Err(LogStoreError::InvalidRange {
                from,
                to,
                start: self.state.start_index,
                next: self.state.next_slot,
            });
        }
        Ok(())
    }

    fn out_of_range(&self, lsn: Lsn) -> LogStoreError {
        LogStoreError::OutOfRange {
            lsn,
            start: self.state.start_index,
            next: self.state.next_slot,
        }
    }

    /// `lsn + n`, or `OutOfRange` when that is past the last representable lsn.
    fn lsn_after(&self, lsn: Lsn, n: usize) -> LogStoreResult<Lsn> {
        Lsn::try_from(n)
            .ok()
            .and_then(|n| lsn.checked_add(n))
            .ok_or_else(|| self.out_of_range(lsn))
    }

    async fn read_stored(&self, lsn: Lsn) -> LogStoreResult<Option<StoredEntry>> {
        match self.engine.read(to_store_id(lsn)).await? {
            Some(bytes) => Ok(Some(StoredEntry::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn read_records(&self, from: Lsn, to: Lsn) -> LogStoreResult<Vec<LogRecord>> {
        let slots = self
            .engine
            .read_range(to_store_id(from), to_store_id(to))
            .await?;

        let mut records = Vec::with_capacity(slots.len());
        for (lsn, slot) in (from..to).zip(slots) {
            let stored = match slot {
                Some(bytes) => StoredEntry::deserialize(&bytes)?,
                None => StoredEntry::Hole,
            };
            records.push(match stored {
                StoredEntry::Record { term, payload } => LogRecord::new(lsn, term, payload),
                StoredEntry::Hole => LogRecord::placeholder(lsn),
            });
        }
        Ok(records)
    }

    /// Drop everything at and after `lsn`. The caller guarantees
    /// `start_index <= lsn < next_slot`.
    async fn truncate_suffix(&mut self, lsn: Lsn) -> LogStoreResult<()> {
        self.engine.truncate_from(to_store_id(lsn)).await?;
        self.state.next_slot = lsn;
        self.durable_slot = self.durable_slot.min(lsn);
        Ok(())
    }
}

#[async_trait]
impl<E: LogEngine> RaftLogStore for LogStore<E> {
    fn start_index(&self) -> Lsn {
        self.state.start_index
    }

    fn next_slot(&self) -> Lsn {
        self.state.next_slot
    }

    fn last_durable_index(&self) -> Lsn {
        self.durable_slot.min(self.state.next_slot) - 1
    }

    async fn append(&mut self, term: Term, payload: Vec<u8>) -> LogStoreResult<Lsn> {
        check_term(term)?;
        let lsn = self.state.next_slot;
        let next_slot = self.lsn_after(lsn, 1)?;
        let bytes = encode_record(term, payload)?;
        self.engine.append(to_store_id(lsn), bytes).await?;
        self.state.next_slot = next_slot;
        Ok(lsn)
    }

    async fn write_at(&mut self, lsn: Lsn, term: Term, payload: Vec<u8>) -> LogStoreResult<()> {
        check_term(term)?;
        if lsn < self.state.start_index || lsn > self.state.next_slot {
            return Err(self.out_of_range(lsn));
        }
        let next_slot = self.lsn_after(lsn, 1)?;
        let bytes = encode_record(term, payload)?;

        if lsn < self.state.next_slot {
            debug!(
                "Rolling back log from {} to {} with term {}",
                self.state.next_slot, lsn, term
            );
            self.truncate_suffix(lsn).await?;
        }
        self.engine.append(to_store_id(lsn), bytes).await?;
        self.state.next_slot = next_slot;
        Ok(())
    }

    async fn entry_at(&self, lsn: Lsn) -> LogStoreResult<LogRecord> {
        self.check_lsn(lsn)?;
        match self.read_stored(lsn).await? {
            Some(StoredEntry::Record { term, payload }) => Ok(LogRecord::new(lsn, term, payload)),
            Some(StoredEntry::Hole) | None => Err(LogStoreError::NotFound(lsn)),
        }
    }

    async fn term_at(&self, lsn: Lsn) -> LogStoreResult<Term> {
        Ok(self.entry_at(lsn).await?.term)
    }

    async fn last_entry(&self) -> LogStoreResult<LogRecord> {
        if self.state.is_empty() {
            return Ok(LogRecord::sentinel());
        }
        self.entry_at(self.state.next_slot - 1).await
    }

    async fn log_entries(&self, from: Lsn, to: Lsn) -> LogStoreResult<Vec<LogRecord>> {
        self.check_range(from, to)?;
        if from == to {
            return Ok(Vec::new());
        }
        self.read_records(from, to).await
    }

    async fn log_entries_ext(
        &self,
        from: Lsn,
        to: Lsn,
        max_bytes: u64,
    ) -> LogStoreResult<Vec<LogRecord>> {
        self.check_range(from, to)?;

        let mut records = Vec::new();
        let mut total = 0u64;
        let mut chunk_from = from;
        while chunk_from < to {
            let chunk_to = (chunk_from + EXT_READ_CHUNK).min(to);
            for record in self.read_records(chunk_from, chunk_to).await? {
                total += record.payload.len() as u64;
                if total > max_bytes && !records.is_empty() {
                    return Ok(records);
                }
                records.push(record);
            }
            chunk_from = chunk_to;
        }
        Ok(records)
    }

    async fn compact(&mut self, upto: Lsn) -> LogStoreResult<()> {
        if upto < self.state.start_index {
            return Ok(());
        }

        let new_start = self.lsn_after(upto, 1)?;

        self.engine.compact_upto(to_store_id(upto)).await?;
        self.state.start_index = new_start;
        if upto >= self.state.next_slot {
            debug!(
                "Compacting past the tail: next slot {} -> {}",
                self.state.next_slot, new_start
            );
            self.state.next_slot = new_start;
        } else {
            debug!("Compacted log up to {}", upto);
        }
        Ok(())
    }

    async fn pack(&self, from: Lsn, cnt: u64) -> LogStoreResult<PackedBlob> {
        let to = from.saturating_add(cnt as Lsn);
        self.check_range(from, to)?;
        let records = if cnt == 0 {
            Vec::new()
        } else {
            self.read_records(from, to).await?
        };
        debug!("Packed {} records from {}", records.len(), from);
        PackedBlob::encode(&records)
    }

    async fn apply_pack(&mut self, target: Lsn, blob: &PackedBlob) -> LogStoreResult<()> {
        let entries = blob.decode()?;
        if entries.is_empty() {
            return Ok(());
        }
        if target < self.state.start_index {
            return Err(self.out_of_range(target));
        }
        self.lsn_after(target, entries.len())?;

        let encoded = entries
            .into_iter()
            .map(|entry| Ok(entry.to_stored().serialize()?))
            .collect::<LogStoreResult<Vec<Vec<u8>>>>()?;

        if target < self.state.next_slot {
            self.truncate_suffix(target).await?;
        } else if target > self.state.next_slot {
            debug!(
                "Applying pack past the tail, lsns [{}, {}) become holes",
                self.state.next_slot, target
            );
        }

        let count = encoded.len();
        for (offset, bytes) in encoded.into_iter().enumerate() {
            let lsn = target + offset as Lsn;
            self.engine.append(to_store_id(lsn), bytes).await?;
            self.state.next_slot = lsn + 1;
        }
        debug!("Applied pack of {} records at {}", count, target);
        Ok(())
    }

    async fn flush(&mut self) -> LogStoreResult<()> {
        self.engine.flush().await?;
        self.durable_slot = self.state.next_slot;
        Ok(())
    }

    async fn end_of_append_batch(&mut self, start: Lsn, cnt: u64) -> LogStoreResult<()> {
        debug!("End of append batch: start={}, count={}", start, cnt);
        if self.options.flush_on_batch_end {
            self.flush().await?;
        }
        Ok(())
    }
}

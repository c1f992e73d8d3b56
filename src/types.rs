use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

// 类型定义
pub type Lsn = i64;
pub type Term = u64;
pub type StoreId = u64;

/// Term reserved for the empty sentinel and for hole placeholders.
/// Consensus terms start at 1, so no appended record ever carries it.
pub const RESERVED_TERM: Term = 0;

/// First lsn handed out by a freshly created store.
pub const FIRST_LSN: Lsn = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub term: Term,
    pub payload: Vec<u8>,
}

impl LogRecord {
    pub fn new(lsn: Lsn, term: Term, payload: Vec<u8>) -> Self {
        Self { lsn, term, payload }
    }

    /// Returned by `last_entry` on an empty log. Never persisted.
    pub fn sentinel() -> Self {
        Self {
            lsn: 0,
            term: RESERVED_TERM,
            payload: Vec::new(),
        }
    }

    /// Stands in for a hole inside a ranged read so results stay index aligned.
    pub fn placeholder(lsn: Lsn) -> Self {
        Self {
            lsn,
            term: RESERVED_TERM,
            payload: Vec::new(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.lsn == 0 && self.term == RESERVED_TERM
    }

    pub fn is_placeholder(&self) -> bool {
        self.term == RESERVED_TERM
    }
}

/// Logical bounds of a log store.
///
/// `start_index <= next_slot` always holds; the log is empty when they are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStoreState {
    pub start_index: Lsn,
    pub next_slot: Lsn,
}

impl LogStoreState {
    pub fn is_empty(&self) -> bool {
        self.start_index == self.next_slot
    }

    pub fn contains(&self, lsn: Lsn) -> bool {
        lsn >= self.start_index && lsn < self.next_slot
    }

    pub fn len(&self) -> u64 {
        (self.next_slot - self.start_index) as u64
    }
}

impl Display for LogStoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start_index, self.next_slot)
    }
}

/// What a reader finds at a given lsn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Below `start_index`.
    Compacted,
    /// Inside the live range but never written.
    Hole,
    /// Inside the live range with a readable record.
    Present,
    /// At or beyond `next_slot`.
    Unwritten,
}

/// Half-open range of engine-local ids, `[start, end)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Encode, Decode)]
pub struct IdRange {
    pub start: StoreId,
    pub end: StoreId,
}

impl IdRange {
    pub fn new(start: StoreId, end: StoreId) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, id: StoreId) -> bool {
        id >= self.start && id < self.end
    }
}

impl Display for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

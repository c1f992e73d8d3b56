use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::error::EngineError;
use crate::traits::{EngineResult, LogEngine};
use crate::types::{IdRange, StoreId};

#[derive(Debug, Clone, Default)]
struct MemState {
    range: IdRange,
    records: BTreeMap<StoreId, Vec<u8>>,
}

/// In-memory `LogEngine` (for tests and embedding).
///
/// Mutations land in a live view; `flush` copies the live view into a durable
/// view shared by every engine produced through `crash`. A crash therefore
/// drops exactly what was not flushed.
#[derive(Default)]
pub struct MemLogEngine {
    live: RwLock<MemState>,
    durable: Arc<RwLock<MemState>>,
    /// Number of mutations to allow before failing every later one.
    fail_after: Mutex<Option<usize>>,
    flushes: Mutex<usize>,
}

impl MemLogEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a process crash: a new engine recovered from flushed state only.
    pub fn crash(&self) -> Self {
        let durable = self.durable.read().clone();
        Self {
            live: RwLock::new(durable),
            durable: self.durable.clone(),
            fail_after: Mutex::new(None),
            flushes: Mutex::new(0),
        }
    }

    /// Let `n` more mutations succeed, then fail all of them with an IO error.
    pub fn fail_after(&self, n: usize) {
        *self.fail_after.lock() = Some(n);
    }

    pub fn heal(&self) {
        *self.fail_after.lock() = None;
    }

    pub fn flush_count(&self) -> usize {
        *self.flushes.lock()
    }

    /// Ids physically holding bytes, in order.
    pub fn stored_ids(&self) -> Vec<StoreId> {
        self.live.read().records.keys().copied().collect()
    }

    fn check_injected_failure(&self) -> EngineResult<()> {
        let mut fail_after = self.fail_after.lock();
        match fail_after.as_mut() {
            Some(0) => Err(EngineError::Io(std::io::Error::other("injected failure"))),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LogEngine for MemLogEngine {
    async fn append(&self, id: StoreId, bytes: Vec<u8>) -> EngineResult<StoreId> {
        self.check_injected_failure()?;
        let mut live = self.live.write();
        if id < live.range.end {
            return Err(EngineError::InvalidId {
                id,
                end: live.range.end,
            });
        }
        live.records.insert(id, bytes);
        live.range.end = id + 1;
        Ok(id)
    }

    async fn flush(&self) -> EngineResult<()> {
        self.check_injected_failure()?;
        *self.durable.write() = self.live.read().clone();
        *self.flushes.lock() += 1;
        Ok(())
    }

    async fn read(&self, id: StoreId) -> EngineResult<Option<Vec<u8>>> {
        let live = self.live.read();
        if !live.range.contains(id) {
            return Ok(None);
        }
        Ok(live.records.get(&id).cloned())
    }

    async fn read_range(&self, from: StoreId, to: StoreId) -> EngineResult<Vec<Option<Vec<u8>>>> {
        let live = self.live.read();
        Ok((from..to)
            .map(|id| {
                live.range
                    .contains(id)
                    .then(|| live.records.get(&id).cloned())
                    .flatten()
            })
            .collect())
    }

    async fn truncate_from(&self, id: StoreId) -> EngineResult<()> {
        self.check_injected_failure()?;
        let mut live = self.live.write();
        if id >= live.range.end {
            return Ok(());
        }
        let _ = live.records.split_off(&id);
        live.range.end = id.max(live.range.start);
        Ok(())
    }

    async fn compact_upto(&self, id: StoreId) -> EngineResult<()> {
        self.check_injected_failure()?;
        let mut live = self.live.write();
        let new_start = id + 1;
        if new_start <= live.range.start {
            return Ok(());
        }
        live.records = live.records.split_off(&new_start);
        live.range.start = new_start;
        live.range.end = live.range.end.max(new_start);
        Ok(())
    }

    fn recovered_range(&self) -> IdRange {
        self.live.read().range
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_crash_drops_unflushed_mutations() {
        let engine = MemLogEngine::new();
        engine.append(0, b"a".to_vec()).await.unwrap();
        engine.append(1, b"b".to_vec()).await.unwrap();
        engine.flush().await.unwrap();
        engine.append(2, b"c".to_vec()).await.unwrap();
        engine.truncate_from(1).await.unwrap();

        let recovered = engine.crash();
        assert_eq!(recovered.recovered_range(), IdRange::new(0, 2));
        assert_eq!(recovered.read(1).await.unwrap(), Some(b"b".to_vec()));
        assert_eq!(recovered.read(2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_append_rejects_ids_behind_end() {
        let engine = MemLogEngine::new();
        engine.append(5, b"x".to_vec()).await.unwrap();
        assert_eq!(engine.recovered_range(), IdRange::new(0, 6));
        assert!(matches!(
            engine.append(3, b"y".to_vec()).await,
            Err(EngineError::InvalidId { id: 3, end: 6 })
        ));
        assert_eq!(engine.read_range(4, 6).await.unwrap(), vec![None, Some(b"x".to_vec())]);
    }

    #[tokio::test]
    async fn test_compact_past_end_moves_end() {
        let engine = MemLogEngine::new();
        engine.append(0, b"a".to_vec()).await.unwrap();
        engine.compact_upto(9).await.unwrap();
        assert_eq!(engine.recovered_range(), IdRange::new(10, 10));
        assert!(engine.stored_ids().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let engine = MemLogEngine::new();
        engine.fail_after(1);
        engine.append(0, b"a".to_vec()).await.unwrap();
        assert!(matches!(
            engine.append(1, b"b".to_vec()).await,
            Err(EngineError::Io(_))
        ));
        engine.heal();
        engine.append(1, b"b".to_vec()).await.unwrap();
    }
}

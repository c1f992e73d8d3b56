//! A log store paired with an in-memory mirror of what it should contain.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use raft_logstore::{
    LogEngine, LogRecord, LogStore, Lsn, PackedBlob, RaftLogStore, SlotState, Term,
};

pub struct TestLog<E: LogEngine> {
    pub store: LogStore<E>,
    /// Every readable record, keyed by lsn. Lsns in range but missing here are holes.
    shadow: BTreeMap<Lsn, (Term, Vec<u8>)>,
    rng: StdRng,
}

impl<E: LogEngine> TestLog<E> {
    pub fn new(store: LogStore<E>, seed: u64) -> Self {
        Self {
            store,
            shadow: BTreeMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn random_payload(&mut self) -> Vec<u8> {
        let len = self.rng.random_range(2..=512);
        let mut payload = vec![0u8; len];
        self.rng.fill(&mut payload[..]);
        payload
    }

    pub fn start_index(&self) -> Lsn {
        self.store.start_index()
    }

    pub fn next_slot(&self) -> Lsn {
        self.store.next_slot()
    }

    pub async fn append(&mut self, count: usize, term: Term) {
        let batch_start = self.store.next_slot();
        for _ in 0..count {
            let payload = self.random_payload();
            let expected = self.store.next_slot();
            let lsn = self.store.append(term, payload.clone()).await.unwrap();
            assert_eq!(lsn, expected);
            self.shadow.insert(lsn, (term, payload));
        }
        self.store
            .end_of_append_batch(batch_start, count as u64)
            .await
            .unwrap();
    }

    pub async fn rollback(&mut self, lsn: Lsn, term: Term) {
        let payload = self.random_payload();
        self.store.write_at(lsn, term, payload.clone()).await.unwrap();
        let _ = self.shadow.split_off(&lsn);
        self.shadow.insert(lsn, (term, payload));
        assert_eq!(self.store.next_slot(), lsn + 1);
    }

    pub async fn compact(&mut self, upto: Lsn) {
        let prev_next = self.store.next_slot();
        self.store.compact(upto).await.unwrap();
        self.shadow = self.shadow.split_off(&(upto + 1));
        assert_eq!(self.store.start_index(), upto + 1);
        assert_eq!(self.store.next_slot(), prev_next.max(upto + 1));
    }

    pub async fn pack_all(&self) -> (Lsn, PackedBlob) {
        let from = self.store.start_index();
        let cnt = (self.store.next_slot() - from) as u64;
        (from, self.store.pack(from, cnt).await.unwrap())
    }

    pub async fn apply_pack(&mut self, target: Lsn, blob: &PackedBlob) {
        self.store.apply_pack(target, blob).await.unwrap();

        let entries = blob.decode().unwrap();
        if entries.is_empty() {
            return;
        }
        let count = entries.len() as Lsn;
        let _ = self.shadow.split_off(&target);
        for (lsn, entry) in (target..).zip(entries) {
            if !entry.is_hole() {
                self.shadow.insert(lsn, (entry.term, entry.payload));
            }
        }
        assert_eq!(self.store.next_slot(), target + count);
    }

    pub async fn flush(&mut self) {
        self.store.flush().await.unwrap();
    }

    /// Replace the store, e.g. after reopening its engine; the mirror is kept.
    pub fn replace_store(&mut self, store: LogStore<E>) -> LogStore<E> {
        std::mem::replace(&mut self.store, store)
    }

    /// Check every lsn in range against the mirror, both point-wise and ranged.
    pub async fn validate(&self) {
        let start = self.store.start_index();
        let next = self.store.next_slot();
        assert!(start <= next);
        if let Some((&first, _)) = self.shadow.first_key_value() {
            assert!(first >= start);
        }
        if let Some((&last, _)) = self.shadow.last_key_value() {
            assert!(last < next);
        }

        for lsn in start..next {
            match self.shadow.get(&lsn) {
                Some((term, payload)) => {
                    let record = self.store.entry_at(lsn).await.unwrap();
                    assert_eq!(record, LogRecord::new(lsn, *term, payload.clone()));
                }
                None => {
                    let err = self.store.entry_at(lsn).await.unwrap_err();
                    assert!(err.is_not_found(), "lsn {}: {}", lsn, err);
                    assert_eq!(self.store.slot_state(lsn).await.unwrap(), SlotState::Hole);
                }
            }
        }

        let records = self.store.log_entries(start, next).await.unwrap();
        assert_eq!(records.len() as Lsn, next - start);
        for (record, lsn) in records.iter().zip(start..) {
            assert_eq!(record.lsn, lsn);
            match self.shadow.get(&lsn) {
                Some((term, payload)) => {
                    assert_eq!(record.term, *term);
                    assert_eq!(&record.payload, payload);
                }
                None => assert!(record.is_placeholder()),
            }
        }

        let last = self.store.last_entry().await;
        if start == next {
            assert!(last.unwrap().is_sentinel());
        } else if let Some((term, payload)) = self.shadow.get(&(next - 1)) {
            assert_eq!(last.unwrap(), LogRecord::new(next - 1, *term, payload.clone()));
        } else {
            assert!(last.unwrap_err().is_not_found());
        }
    }
}

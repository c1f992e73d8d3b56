//! Leader/follower lifecycle over the segment engine.
//!
//! Each role owns its own store and directory. Every step is checked against
//! an in-memory mirror of the expected log, and the final steps restart both
//! stores from disk.

use raft_logstore::{LogStoreState, RaftLogStore, SegmentLogEngine};
use tempfile::TempDir;
use tracing::info;

mod common;
use common::test_log::TestLog;
use common::{init_tracing, open_segment_store, open_small_segment_store};

const NUM_RECORDS: usize = 1000;

fn total_records(log: &TestLog<SegmentLogEngine>) -> i64 {
    log.next_slot() - log.start_index()
}

#[tokio::test]
async fn test_lifecycle() {
    init_tracing();
    let leader_dir = TempDir::new().unwrap();
    let follower_dir = TempDir::new().unwrap();

    let mut leader = TestLog::new(open_small_segment_store(leader_dir.path()), 1);
    let mut follower = TestLog::new(open_small_segment_store(follower_dir.path()), 2);
    let mut term = 1;

    info!("Step 1: append {} records", NUM_RECORDS);
    leader.append(NUM_RECORDS, term).await;
    assert_eq!(leader.store.state(), LogStoreState { start_index: 1, next_slot: 1001 });
    leader.validate().await;

    info!("Step 2: roll back half of the records");
    term += 1;
    let rollback_at = total_records(&leader) / 2;
    leader.rollback(rollback_at, term).await;
    leader.validate().await;

    info!("Step 3: append {} records after rollback", NUM_RECORDS);
    leader.append(NUM_RECORDS, term).await;
    leader.validate().await;

    let shrink = total_records(&leader) / 10;
    info!("Step 4: compact the first {} records", shrink);
    leader.compact(leader.start_index() + shrink - 1).await;
    leader.validate().await;

    info!("Step 5: append {} records after compaction", NUM_RECORDS);
    leader.append(NUM_RECORDS, term).await;
    leader.validate().await;

    let shrink = total_records(&leader) + total_records(&leader) / 10;
    info!("Step 6: compact {} records, past the last appended one", shrink);
    let upto = leader.start_index() + shrink - 1;
    assert!(upto >= leader.next_slot());
    leader.compact(upto).await;
    assert_eq!(leader.start_index(), leader.next_slot());
    leader.validate().await;

    info!("Step 7: append {} records after forward compaction", NUM_RECORDS);
    let resume_at = leader.next_slot();
    leader.append(NUM_RECORDS, term).await;
    assert_eq!(leader.start_index(), resume_at);
    leader.validate().await;

    info!("Step 8: pack every record");
    let (from, blob) = leader.pack_all().await;
    assert_eq!(from, resume_at);
    assert_eq!(blob.record_count(), Some(NUM_RECORDS as u32));

    info!("Step 9: unpack on an empty follower");
    let target = follower.next_slot();
    follower.apply_pack(target, &blob).await;
    follower.validate().await;

    info!("Step 10: append {} records to the follower", NUM_RECORDS);
    follower.append(NUM_RECORDS, term).await;
    follower.validate().await;

    info!("Step 11: unpack the same records again at the follower's tail");
    let target = follower.next_slot();
    follower.apply_pack(target, &blob).await;
    assert_eq!(follower.next_slot(), 3001);
    follower.validate().await;

    info!("Step 12: restart both stores and validate recovery");
    leader.flush().await;
    follower.flush().await;
    let leader_state = leader.store.state();
    let follower_state = follower.store.state();

    drop(leader.replace_store(open_segment_store(leader_dir.path())));
    drop(follower.replace_store(open_segment_store(follower_dir.path())));
    assert_eq!(leader.store.state(), leader_state);
    assert_eq!(follower.store.state(), follower_state);
    leader.validate().await;
    follower.validate().await;

    info!("Step 13: append after recovery");
    leader.append(NUM_RECORDS, term).await;
    follower.append(NUM_RECORDS, term).await;
    leader.validate().await;
    follower.validate().await;
}

#[tokio::test]
async fn test_restart_drops_unflushed_records() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let mut log = TestLog::new(open_segment_store(dir.path()), 3);

    log.append(100, 1).await;
    log.rollback(60, 2).await;
    log.compact(10).await;
    log.flush().await;
    let flushed = log.store.state();
    assert_eq!(log.store.last_durable_index(), 60);

    // Bypass the mirror: none of this survives
    log.store.append(3, b"lost".to_vec()).await.unwrap();
    log.store.write_at(30, 3, b"lost".to_vec()).await.unwrap();
    log.store.compact(200).await.unwrap();
    assert_ne!(log.store.state(), flushed);

    log.replace_store(open_segment_store(dir.path()));
    assert_eq!(log.store.state(), flushed);
    log.validate().await;
}

#[tokio::test]
async fn test_forward_compaction_survives_restart() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let mut log = TestLog::new(open_segment_store(dir.path()), 4);

    log.append(20, 1).await;
    log.compact(500).await;
    log.flush().await;

    log.replace_store(open_segment_store(dir.path()));
    assert_eq!(log.store.state(), LogStoreState { start_index: 501, next_slot: 501 });
    assert!(log.store.entry_at(300).await.is_err());

    log.append(5, 2).await;
    assert_eq!(log.store.state(), LogStoreState { start_index: 501, next_slot: 506 });
    log.validate().await;
}

#[tokio::test]
async fn test_unpack_past_tail_survives_restart() {
    init_tracing();
    let leader_dir = TempDir::new().unwrap();
    let follower_dir = TempDir::new().unwrap();
    let mut leader = TestLog::new(open_segment_store(leader_dir.path()), 5);
    let mut follower = TestLog::new(open_segment_store(follower_dir.path()), 6);

    leader.append(300, 1).await;
    let blob = leader.store.pack(201, 100).await.unwrap();

    follower.append(50, 1).await;
    follower.apply_pack(201, &blob).await;
    follower.validate().await;
    follower.flush().await;

    follower.replace_store(open_segment_store(follower_dir.path()));
    assert_eq!(follower.store.state(), LogStoreState { start_index: 1, next_slot: 301 });
    follower.validate().await;

    // The holes can be overwritten by a later rollback
    follower.rollback(120, 2).await;
    follower.validate().await;
}

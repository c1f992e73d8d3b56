#![allow(dead_code)]

pub mod test_log;

use std::path::Path;

use raft_logstore::{LogStore, LogStoreOptions, SegmentEngineOptions, SegmentLogEngine};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn open_segment_store(dir: &Path) -> LogStore<SegmentLogEngine> {
    let engine = SegmentLogEngine::open(SegmentEngineOptions::with_dir(dir)).unwrap();
    LogStore::open(engine, LogStoreOptions::default())
}

/// Small segments and a flush per append batch, so rotation and segment
/// cleanup happen along the way.
pub fn open_small_segment_store(dir: &Path) -> LogStore<SegmentLogEngine> {
    let options = SegmentEngineOptions {
        max_segment_size: 16 * 1024,
        ..SegmentEngineOptions::with_dir(dir)
    };
    let engine = SegmentLogEngine::open(options).unwrap();
    let store_options = LogStoreOptions {
        flush_on_batch_end: true,
    };
    LogStore::open(engine, store_options)
}

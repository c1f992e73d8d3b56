//! Log storage module.
//!
//! This module provides the append-only, segmented `LogEngine` that backs a
//! raft log store. Every mutation (append, truncate, compact) is written to
//! the active segment as a framed record; nothing is rewritten in place, and
//! an in-memory index tracks which ids are live.
//!
//! # Module Structure
//!
//! - `entry`: Frame header, record bodies and the id index
//! - `segment`: Log segment file operations and replay
//! - `engine`: Multi-segment engine with buffering, rotation and cleanup

mod engine;
mod entry;
mod segment;


pub use entry::{
    AppendRecord, CheckpointRecord, ENTRY_HEADER_SIZE, ENTRY_MAGIC_NUM, EntryHeader, EntryIndex,
    EntryMeta, EntryType, TruncateRecord,
};

pub use engine::{DEFAULT_MAX_SEGMENT_SIZE, SegmentEngineOptions, SegmentLogEngine, SegmentMeta};

pub use segment::{LogSegment, SEGMENT_FILE_EXT, SEGMENT_FILE_PREFIX, segment_file_name};

//! Segmented log engine.
//!
//! This module provides the file-backed `LogEngine` with:
//! - Write buffering with an explicit durability barrier (`flush`)
//! - Automatic segment rotation when max size is reached
//! - Cross-segment read operations
//! - Obsolete segment cleanup after compaction
//! - Replay-based recovery of the id range on open

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::traits::{EngineResult, LogEngine};
use crate::types::{IdRange, StoreId};

use super::{
    entry::{
        AppendRecord, CheckpointRecord, ENTRY_HEADER_SIZE, EntryIndex, EntryMeta, EntryType,
        TruncateRecord, encode_frame,
    },
    segment::{LogSegment, decode_append_body, parse_segment_id},
};

/// Default maximum segment size (64MB)
pub const DEFAULT_MAX_SEGMENT_SIZE: u64 = 64 * 1024 * 1024;

/// Configuration options for the segment engine
#[derive(Clone, Debug)]
pub struct SegmentEngineOptions {
    /// Directory for storing segment files
    pub dir: PathBuf,
    /// Segment size in bytes after which a flush rotates to a new segment
    pub max_segment_size: u64,
    /// Maximum number of concurrent blocking reads
    pub max_io_threads: usize,
    /// Whether `flush` calls `sync_data` after writing
    pub sync_on_flush: bool,
}

impl Default for SegmentEngineOptions {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/logs"),
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            max_io_threads: 4,
            sync_on_flush: true,
        }
    }
}

impl SegmentEngineOptions {
    pub fn with_dir<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }
}

/// Metadata about a single segment
#[derive(Debug, Clone)]
pub struct SegmentMeta {
    pub segment_id: u64,
    pub file_path: PathBuf,
    /// Highest id ever appended to this segment
    pub max_id: Option<StoreId>,
    /// Durable file size in bytes
    pub file_size: u64,
}

impl SegmentMeta {
    /// Every record this segment holds sits below `start`.
    pub fn is_obsolete(&self, start: StoreId) -> bool {
        self.max_id.is_none_or(|max| max < start)
    }
}

struct EngineInner {
    index: EntryIndex,
    active: Arc<LogSegment>,
    active_meta: SegmentMeta,
    /// Read-only sealed segments (ordered by segment_id)
    sealed: Vec<(SegmentMeta, Arc<LogSegment>)>,
    /// Frames staged for the active segment, starting at `active_meta.file_size`
    pending: Vec<u8>,
    pending_compaction: bool,
    next_segment_id: u64,
}

impl EngineInner {
    fn stage(&mut self, entry_type: EntryType, body: &[u8]) -> u64 {
        let body_offset =
            self.active_meta.file_size + self.pending.len() as u64 + ENTRY_HEADER_SIZE as u64;
        self.pending.extend_from_slice(&encode_frame(entry_type, body));
        body_offset
    }

    fn segment(&self, segment_id: u64) -> Option<Arc<LogSegment>> {
        if segment_id == self.active.segment_id {
            return Some(self.active.clone());
        }
        self.sealed
            .binary_search_by_key(&segment_id, |(meta, _)| meta.segment_id)
            .ok()
            .map(|pos| self.sealed[pos].1.clone())
    }

    fn locate(&self, id: StoreId) -> EngineResult<Slot> {
        let Some(meta) = self.index.get(id) else {
            return Ok(Slot::Missing);
        };

        if meta.segment_id == self.active.segment_id && meta.offset >= self.active_meta.file_size {
            let start = (meta.offset - self.active_meta.file_size) as usize;
            let body = &self.pending[start..start + meta.size as usize];
            return Ok(Slot::Ready(decode_append_body(meta, body)?));
        }

        let segment = self.segment(meta.segment_id).ok_or_else(|| EngineError::Corrupted {
            segment: meta.segment_id,
            offset: meta.offset,
            reason: format!("segment for id {} is gone", id),
        })?;
        Ok(Slot::OnDisk(segment, meta.clone()))
    }
}

enum Slot {
    Missing,
    Ready(Vec<u8>),
    OnDisk(Arc<LogSegment>, EntryMeta),
}

/// File-backed, segmented implementation of `LogEngine`.
pub struct SegmentLogEngine {
    options: SegmentEngineOptions,
    io_semaphore: Arc<Semaphore>,
    inner: RwLock<EngineInner>,
}

impl SegmentLogEngine {
    /// Open the engine in `options.dir`, replaying any segments found there.
    pub fn open(options: SegmentEngineOptions) -> EngineResult<Self> {
        fs::create_dir_all(&options.dir)?;
        let io_semaphore = Arc::new(Semaphore::new(options.max_io_threads.max(1)));

        let mut segment_files: Vec<(u64, PathBuf)> = fs::read_dir(&options.dir)?
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                let id = parse_segment_id(path.file_name()?.to_str()?)?;
                Some((id, path))
            })
            .collect();
        segment_files.sort_by_key(|(id, _)| *id);

        let mut index = EntryIndex::default();
        let mut sealed = Vec::new();
        let mut tail = None;

        for (pos, (segment_id, path)) in segment_files.iter().enumerate() {
            let is_tail = pos + 1 == segment_files.len();
            let segment = LogSegment::open(path.clone(), *segment_id, io_semaphore.clone())?;
            let replay = segment.replay(&mut index, is_tail)?;
            let meta = SegmentMeta {
                segment_id: *segment_id,
                file_path: path.clone(),
                max_id: replay.max_id,
                file_size: replay.len,
            };
            debug!(
                "Replayed segment {}: frames={}, size={}",
                segment_id, replay.frames, replay.len
            );
            if is_tail {
                tail = Some((meta, Arc::new(segment)));
            } else {
                sealed.push((meta, Arc::new(segment)));
            }
        }

        let (active_meta, active) = match tail {
            Some(tail) => tail,
            None => Self::create_segment(&options.dir, 0, index.range, io_semaphore.clone())?,
        };

        info!(
            "Opened log engine: dir={:?}, segments={}, range={}",
            options.dir,
            sealed.len() + 1,
            index.range
        );

        let next_segment_id = active_meta.segment_id + 1;
        Ok(Self {
            options,
            io_semaphore,
            inner: RwLock::new(EngineInner {
                index,
                active,
                active_meta,
                sealed,
                pending: Vec::new(),
                pending_compaction: false,
                next_segment_id,
            }),
        })
    }

    /// Create a segment whose first frame records `range`.
    fn create_segment(
        dir: &Path,
        segment_id: u64,
        range: IdRange,
        io_semaphore: Arc<Semaphore>,
    ) -> EngineResult<(SegmentMeta, Arc<LogSegment>)> {
        let segment = LogSegment::create(dir, segment_id, io_semaphore)?;
        let frame = encode_frame(EntryType::Checkpoint, &CheckpointRecord { range }.serialize()?);
        segment.write_at(&frame, 0)?;
        segment.sync_data()?;

        let meta = SegmentMeta {
            segment_id,
            file_path: segment.file_path.clone(),
            max_id: None,
            file_size: frame.len() as u64,
        };
        Ok((meta, Arc::new(segment)))
    }

    pub fn options(&self) -> &SegmentEngineOptions {
        &self.options
    }

    /// Number of segment files currently backing the engine.
    pub fn segment_count(&self) -> usize {
        self.inner.read().sealed.len() + 1
    }

    /// Bytes staged since the last flush.
    pub fn pending_bytes(&self) -> usize {
        self.inner.read().pending.len()
    }

    fn rotate_segment(&self, inner: &mut EngineInner) -> EngineResult<()> {
        let segment_id = inner.next_segment_id;
        let (meta, segment) = Self::create_segment(
            &self.options.dir,
            segment_id,
            inner.index.range,
            self.io_semaphore.clone(),
        )?;
        inner.next_segment_id += 1;

        let old_meta = std::mem::replace(&mut inner.active_meta, meta);
        let old_segment = std::mem::replace(&mut inner.active, segment);
        inner.sealed.push((old_meta, old_segment));

        info!("Rotated to new segment: id={}", segment_id);
        Ok(())
    }

    fn remove_obsolete_segments(&self, inner: &mut EngineInner) -> EngineResult<()> {
        let start = inner.index.range.start;
        while let Some((meta, _)) = inner.sealed.first() {
            if !meta.is_obsolete(start) {
                break;
            }
            fs::remove_file(&meta.file_path)?;
            let (meta, _) = inner.sealed.remove(0);
            info!(
                "Removed obsolete segment: id={}, size={}",
                meta.segment_id, meta.file_size
            );
        }
        Ok(())
    }

    fn flush_pending(&self) -> EngineResult<()> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        if inner.pending.is_empty() {
            return Ok(());
        }

        inner.active.write_at(&inner.pending, inner.active_meta.file_size)?;
        if self.options.sync_on_flush {
            inner.active.sync_data()?;
        }
        inner.active_meta.file_size += inner.pending.len() as u64;
        inner.pending.clear();

        if std::mem::take(&mut inner.pending_compaction) {
            self.remove_obsolete_segments(inner)?;
        }
        if inner.active_meta.file_size >= self.options.max_segment_size {
            self.rotate_segment(inner)?;
        }
        Ok(())
    }
}

#[async_trait]
impl LogEngine for SegmentLogEngine {
    async fn append(&self, id: StoreId, bytes: Vec<u8>) -> EngineResult<StoreId> {
        let body = AppendRecord { id, data: bytes }.serialize()?;

        let mut inner = self.inner.write();
        if id < inner.index.range.end {
            return Err(EngineError::InvalidId {
                id,
                end: inner.index.range.end,
            });
        }

        let offset = inner.stage(EntryType::Append, &body);
        let segment_id = inner.active.segment_id;
        inner.active_meta.max_id = inner.active_meta.max_id.max(Some(id));
        inner.index.apply_append(EntryMeta {
            id,
            segment_id,
            offset,
            size: body.len() as u64,
        });
        Ok(id)
    }

    async fn flush(&self) -> EngineResult<()> {
        self.flush_pending()
    }

    async fn read(&self, id: StoreId) -> EngineResult<Option<Vec<u8>>> {
        let slot = self.inner.read().locate(id)?;
        match slot {
            Slot::Missing => Ok(None),
            Slot::Ready(bytes) => Ok(Some(bytes)),
            Slot::OnDisk(segment, meta) => {
                let mut bytes = segment.read_run(vec![meta]).await?;
                Ok(bytes.pop())
            }
        }
    }

    async fn read_range(&self, from: StoreId, to: StoreId) -> EngineResult<Vec<Option<Vec<u8>>>> {
        if from >= to {
            return Ok(Vec::new());
        }

        // Plan under the lock, read without it.
        let mut results: Vec<Option<Vec<u8>>> = Vec::with_capacity((to - from) as usize);
        let mut runs: Vec<(Arc<LogSegment>, Vec<EntryMeta>, Vec<usize>)> = Vec::new();
        {
            let inner = self.inner.read();
            for id in from..to {
                match inner.locate(id)? {
                    Slot::Missing => results.push(None),
                    Slot::Ready(bytes) => results.push(Some(bytes)),
                    Slot::OnDisk(segment, meta) => {
                        let pos = results.len();
                        results.push(None);
                        let contiguous = runs.last().is_some_and(|(run_segment, metas, _)| {
                            run_segment.segment_id == segment.segment_id
                                && metas.last().is_some_and(|prev| {
                                    prev.end_offset() + ENTRY_HEADER_SIZE as u64 == meta.offset
                                })
                        });
                        if let (true, Some((_, metas, positions))) = (contiguous, runs.last_mut()) {
                            metas.push(meta);
                            positions.push(pos);
                        } else {
                            runs.push((segment, vec![meta], vec![pos]));
                        }
                    }
                }
            }
        }

        let (reads, positions): (Vec<_>, Vec<_>) = runs
            .into_iter()
            .map(|(segment, metas, positions)| {
                (async move { segment.read_run(metas).await }, positions)
            })
            .unzip();

        let batches = futures::future::try_join_all(reads).await?;
        for (batch, positions) in batches.into_iter().zip(positions) {
            for (bytes, pos) in batch.into_iter().zip(positions) {
                results[pos] = Some(bytes);
            }
        }
        Ok(results)
    }

    async fn truncate_from(&self, id: StoreId) -> EngineResult<()> {
        let body = TruncateRecord { id }.serialize()?;
        let mut inner = self.inner.write();
        if id >= inner.index.range.end {
            return Ok(());
        }
        inner.stage(EntryType::TruncateSuffix, &body);
        inner.index.truncate_suffix(id);
        Ok(())
    }

    async fn compact_upto(&self, id: StoreId) -> EngineResult<()> {
        let body = TruncateRecord { id }.serialize()?;
        let mut inner = self.inner.write();
        if id < inner.index.range.start {
            return Ok(());
        }
        inner.stage(EntryType::CompactPrefix, &body);
        inner.index.truncate_prefix(id);
        inner.pending_compaction = true;
        Ok(())
    }

    fn recovered_range(&self) -> IdRange {
        self.inner.read().index.range
    }
}

impl Drop for SegmentLogEngine {
    fn drop(&mut self) {
        let pending = self.inner.get_mut().pending.len();
        if pending > 0 {
            warn!("Dropping log engine with {} unflushed bytes", pending);
        }
    }
}

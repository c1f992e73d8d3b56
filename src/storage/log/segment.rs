use std::{
    fs::{File, OpenOptions},
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::traits::EngineResult;
use crate::types::StoreId;

use super::entry::{
    AppendRecord, CheckpointRecord, ENTRY_HEADER_SIZE, EntryHeader, EntryIndex, EntryMeta,
    EntryType, TruncateRecord,
};

// LogSegment file format:
// | Checkpoint | EntryHeader [ append | truncateSuffix | compactPrefix ] ... |
// A segment never rewrites bytes below its durable length.

/// Segment file prefix
pub const SEGMENT_FILE_PREFIX: &str = "segment_";

/// Segment file extension
pub const SEGMENT_FILE_EXT: &str = ".log";

pub fn segment_file_name(segment_id: u64) -> String {
    format!("{}{:010}{}", SEGMENT_FILE_PREFIX, segment_id, SEGMENT_FILE_EXT)
}

pub fn parse_segment_id(name: &str) -> Option<u64> {
    name.strip_prefix(SEGMENT_FILE_PREFIX)?
        .strip_suffix(SEGMENT_FILE_EXT)?
        .parse()
        .ok()
}

/// What replaying one segment found.
#[derive(Debug, Default, Clone)]
pub struct SegmentReplay {
    /// Length of the valid prefix of the file.
    pub len: u64,
    pub max_id: Option<StoreId>,
    pub frames: usize,
}

enum FrameRead {
    Complete(EntryHeader, Vec<u8>),
    Torn(&'static str),
}

pub struct LogSegment {
    pub(crate) segment_id: u64,
    pub(crate) file_path: PathBuf,
    pub(crate) file: Arc<File>,
    pub(crate) io_semaphore: Arc<Semaphore>,
}

impl LogSegment {
    pub fn create(dir: &Path, segment_id: u64, io_semaphore: Arc<Semaphore>) -> EngineResult<Self> {
        let file_path = dir.join(segment_file_name(segment_id));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&file_path)?;

        info!("Created new segment: id={}, path={:?}", segment_id, file_path);

        Ok(Self {
            segment_id,
            file_path,
            file: Arc::new(file),
            io_semaphore,
        })
    }

    pub fn open(file_path: PathBuf, segment_id: u64, io_semaphore: Arc<Semaphore>) -> EngineResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&file_path)?;
        Ok(Self {
            segment_id,
            file_path,
            file: Arc::new(file),
            io_semaphore,
        })
    }

    pub fn size(&self) -> EngineResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn write_at(&self, buf: &[u8], offset: u64) -> EngineResult<()> {
        self.file.write_all_at(buf, offset).map_err(|e| {
            warn!("Failed to write to segment {}: {}", self.segment_id, e);
            e.into()
        })
    }

    pub fn sync_data(&self) -> EngineResult<()> {
        self.file.sync_data().map_err(|e| {
            warn!("Failed to sync log segment file data: {}", e);
            e.into()
        })
    }

    fn read_frame(&self, offset: u64, file_size: u64) -> EngineResult<FrameRead> {
        if offset + ENTRY_HEADER_SIZE as u64 > file_size {
            return Ok(FrameRead::Torn("incomplete header"));
        }

        let mut header_buf = [0u8; ENTRY_HEADER_SIZE as usize];
        self.file.read_exact_at(&mut header_buf, offset)?;
        let header = match EntryHeader::deserialize(&header_buf) {
            Ok(h) => h,
            Err(reason) => return Ok(FrameRead::Torn(reason)),
        };

        if offset + header.size as u64 > file_size {
            return Ok(FrameRead::Torn("incomplete body"));
        }

        let mut body = vec![0u8; header.body_size() as usize];
        self.file
            .read_exact_at(&mut body, offset + ENTRY_HEADER_SIZE as u64)?;

        if crc32fast::hash(&body) != header.crc {
            return Ok(FrameRead::Torn("crc mismatch"));
        }
        Ok(FrameRead::Complete(header, body))
    }

    /// Replay every frame into `index`.
    ///
    /// A torn or corrupt frame ends the replay. In the segment that was being
    /// written (`is_tail`) the garbage is cut off; anywhere else it is an error.
    pub fn replay(&self, index: &mut EntryIndex, is_tail: bool) -> EngineResult<SegmentReplay> {
        let file_size = self.size()?;
        let mut summary = SegmentReplay::default();
        let mut offset = 0u64;

        while offset < file_size {
            let (header, body) = match self.read_frame(offset, file_size)? {
                FrameRead::Complete(header, body) => (header, body),
                FrameRead::Torn(reason) => {
                    if !is_tail {
                        return Err(EngineError::Corrupted {
                            segment: self.segment_id,
                            offset,
                            reason: reason.to_string(),
                        });
                    }
                    warn!(
                        "Torn frame in segment {} at offset {} ({}), dropping {} bytes",
                        self.segment_id,
                        offset,
                        reason,
                        file_size - offset
                    );
                    self.file.set_len(offset)?;
                    break;
                }
            };

            let body_offset = offset + ENTRY_HEADER_SIZE as u64;
            let corrupted = move |e: EngineError| EngineError::Corrupted {
                segment: self.segment_id,
                offset,
                reason: e.to_string(),
            };

            match header.entry_type {
                EntryType::Append => {
                    let record = AppendRecord::deserialize(&body).map_err(corrupted)?;
                    summary.max_id = summary.max_id.max(Some(record.id));
                    index.apply_append(EntryMeta {
                        id: record.id,
                        segment_id: self.segment_id,
                        offset: body_offset,
                        size: body.len() as u64,
                    });
                }
                EntryType::TruncateSuffix => {
                    let record = TruncateRecord::deserialize(&body).map_err(corrupted)?;
                    index.truncate_suffix(record.id);
                }
                EntryType::CompactPrefix => {
                    let record = TruncateRecord::deserialize(&body).map_err(corrupted)?;
                    index.truncate_prefix(record.id);
                }
                EntryType::Checkpoint => {
                    let record = CheckpointRecord::deserialize(&body).map_err(corrupted)?;
                    index.reset_range(record.range);
                }
            }

            offset += header.size as u64;
            summary.frames += 1;
        }

        summary.len = offset;
        Ok(summary)
    }

    /// Read a run of frames that sit back to back in this segment and return
    /// their stored bytes in order.
    pub async fn read_run(&self, metas: Vec<EntryMeta>) -> EngineResult<Vec<Vec<u8>>> {
        let (Some(first), Some(last)) = (metas.first(), metas.last()) else {
            return Ok(Vec::new());
        };
        let base = first.offset;
        let size = (last.end_offset() - base) as usize;

        let file = self.file.clone();
        let permit = self
            .io_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| EngineError::Task(e.to_string()))?;

        tokio::task::spawn_blocking(move || -> EngineResult<Vec<Vec<u8>>> {
            let _permit = permit;
            let mut buf = vec![0u8; size];
            file.read_exact_at(&mut buf, base).map_err(|e| {
                warn!("Failed to read log entries from file: {}", e);
                e
            })?;

            metas
                .iter()
                .map(|meta| {
                    let start = (meta.offset - base) as usize;
                    decode_append_body(meta, &buf[start..start + meta.size as usize])
                })
                .collect()
        })
        .await?
    }
}

/// Extract the stored bytes from an `Append` frame body.
pub fn decode_append_body(meta: &EntryMeta, body: &[u8]) -> EngineResult<Vec<u8>> {
    let record = AppendRecord::deserialize(body)?;
    if record.id != meta.id {
        return Err(EngineError::Corrupted {
            segment: meta.segment_id,
            offset: meta.offset,
            reason: format!("expected id {}, found {}", meta.id, record.id),
        });
    }
    Ok(record.data)
}

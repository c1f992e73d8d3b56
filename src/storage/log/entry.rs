use std::collections::BTreeMap;

use bincode::{Decode, Encode};
use tracing::warn;

use crate::error::EngineError;
use crate::types::{IdRange, StoreId};

/// Location of one stored record body inside a segment file.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct EntryMeta {
    pub id: StoreId,
    pub segment_id: u64,
    /// Offset of the frame body (just past the header).
    pub offset: u64,
    pub size: u64,
}

impl EntryMeta {
    /// Offset of the first byte after this frame.
    pub fn end_offset(&self) -> u64 {
        self.offset + self.size
    }
}

/// Body of an `Append` frame.
#[derive(Debug, Clone, Decode, Encode)]
pub struct AppendRecord {
    pub id: StoreId,
    pub data: Vec<u8>,
}

/// Body of a `TruncateSuffix` or `CompactPrefix` frame.
#[derive(Debug, Clone, Decode, Encode)]
pub struct TruncateRecord {
    pub id: StoreId,
}

/// Body of a `Checkpoint` frame, written at the head of every segment.
#[derive(Debug, Clone, Decode, Encode)]
pub struct CheckpointRecord {
    pub range: IdRange,
}

macro_rules! impl_record_codec {
    ($($ty:ty => $what:literal),* $(,)?) => {
        $(
            impl $ty {
                pub fn serialize(&self) -> Result<Vec<u8>, EngineError> {
                    let config = bincode::config::standard();
                    Ok(bincode::encode_to_vec(self, config)?)
                }

                pub fn deserialize(data: &[u8]) -> Result<Self, EngineError> {
                    let config = bincode::config::standard();
                    let (record, _) = bincode::decode_from_slice(data, config).map_err(|e| {
                        warn!("Failed to deserialize {}: {}", $what, e);
                        e
                    })?;
                    Ok(record)
                }
            }
        )*
    };
}

impl_record_codec!(
    AppendRecord => "append record",
    TruncateRecord => "truncate record",
    CheckpointRecord => "checkpoint record",
);

/// In-memory view of which ids are live and where their bodies live.
#[derive(Debug, Clone, Default)]
pub struct EntryIndex {
    pub range: IdRange,
    pub entries: BTreeMap<StoreId, EntryMeta>,
}

impl EntryIndex {
    pub fn get(&self, id: StoreId) -> Option<&EntryMeta> {
        if !self.range.contains(id) {
            return None;
        }
        self.entries.get(&id)
    }

    pub fn apply_append(&mut self, meta: EntryMeta) {
        if meta.id < self.range.start {
            return;
        }
        self.range.end = self.range.end.max(meta.id + 1);
        self.entries.insert(meta.id, meta);
    }

    /// Drop every id `>= id`.
    pub fn truncate_suffix(&mut self, id: StoreId) {
        if id >= self.range.end {
            return;
        }
        let _ = self.entries.split_off(&id);
        self.range.end = id.max(self.range.start);
    }

    /// Drop every id `<= id`. Compacting past the end moves the end with it.
    pub fn truncate_prefix(&mut self, id: StoreId) {
        let new_start = id + 1;
        if new_start <= self.range.start {
            return;
        }
        self.entries = self.entries.split_off(&new_start);
        self.range.start = new_start;
        self.range.end = self.range.end.max(new_start);
    }

    /// Adopt the bounds recorded by a checkpoint.
    pub fn reset_range(&mut self, range: IdRange) {
        self.entries.retain(|id, _| range.contains(*id));
        self.range = range;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Append,
    TruncateSuffix,
    CompactPrefix,
    Checkpoint,
}

impl EntryType {
    pub fn code(self) -> u32 {
        match self {
            EntryType::Append => 1,
            EntryType::TruncateSuffix => 2,
            EntryType::CompactPrefix => 3,
            EntryType::Checkpoint => 4,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(EntryType::Append),
            2 => Some(EntryType::TruncateSuffix),
            3 => Some(EntryType::CompactPrefix),
            4 => Some(EntryType::Checkpoint),
            _ => None,
        }
    }
}

pub const ENTRY_MAGIC_NUM: u32 = 0x_1234_5678;
pub const ENTRY_HEADER_SIZE: u32 = 16; // 4 + 4 + 4 + 4 = 16 bytes

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    /// Frame size including this header.
    pub size: u32,
    pub entry_type: EntryType,
    pub magic_num: u32,
    pub crc: u32,
}

impl EntryHeader {
    pub fn new(size: u32, entry_type: EntryType, crc: u32) -> Self {
        Self {
            size,
            entry_type,
            magic_num: ENTRY_MAGIC_NUM,
            crc,
        }
    }

    pub fn serialize(&self) -> [u8; ENTRY_HEADER_SIZE as usize] {
        let mut buf = [0u8; ENTRY_HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&self.size.to_le_bytes());
        buf[4..8].copy_from_slice(&self.entry_type.code().to_le_bytes());
        buf[8..12].copy_from_slice(&self.magic_num.to_le_bytes());
        buf[12..16].copy_from_slice(&self.crc.to_le_bytes());
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, &'static str> {
        if data.len() < ENTRY_HEADER_SIZE as usize {
            return Err("short header");
        }

        let field = |at: usize| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&data[at..at + 4]);
            u32::from_le_bytes(bytes)
        };

        let magic_num = field(8);
        if magic_num != ENTRY_MAGIC_NUM {
            return Err("invalid magic number");
        }

        let size = field(0);
        if size < ENTRY_HEADER_SIZE {
            return Err("frame smaller than header");
        }

        let entry_type = EntryType::from_code(field(4)).ok_or("invalid entry type")?;

        Ok(Self {
            size,
            entry_type,
            magic_num,
            crc: field(12),
        })
    }

    pub fn body_size(&self) -> u64 {
        (self.size - ENTRY_HEADER_SIZE) as u64
    }
}

/// Header plus body, ready to be written to a segment.
pub fn encode_frame(entry_type: EntryType, body: &[u8]) -> Vec<u8> {
    let header = EntryHeader::new(
        body.len() as u32 + ENTRY_HEADER_SIZE,
        entry_type,
        crc32fast::hash(body),
    );
    let mut buf = Vec::with_capacity(ENTRY_HEADER_SIZE as usize + body.len());
    buf.extend_from_slice(&header.serialize());
    buf.extend_from_slice(body);
    buf
}

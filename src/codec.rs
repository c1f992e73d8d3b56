//! Entry codec.
//!
//! Two encodings live here:
//!
//! - the stored form of one log slot, handed to the engine as opaque bytes
//!   (bincode, standard config);
//! - the packed form of a contiguous run of records, used for bulk transfer.
//!
//! Packed layout (little endian):
//!
//! ```text
//! | magic u32 | count u32 | crc u32 | frame ... |
//! frame = | len u32 | term u64 | payload (len - 8 bytes) |
//! ```
//!
//! `crc` covers every frame. A frame with term 0 and no payload is a hole.

use bincode::{Decode, Encode};
use tracing::warn;

use crate::error::{EngineError, LogStoreError};
use crate::types::{LogRecord, RESERVED_TERM, Term};

pub const PACK_MAGIC_NUM: u32 = 0x_5041_434B;
pub const PACK_HEADER_SIZE: usize = 12;
const FRAME_LEN_SIZE: usize = 4;
const FRAME_TERM_SIZE: usize = 8;

/// One log slot as stored in the engine.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum StoredEntry {
    Record { term: Term, payload: Vec<u8> },
    Hole,
}

impl StoredEntry {
    pub fn serialize(&self) -> Result<Vec<u8>, EngineError> {
        let config = bincode::config::standard();
        Ok(bincode::encode_to_vec(self, config)?)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, EngineError> {
        let config = bincode::config::standard();
        let (entry, read) = bincode::decode_from_slice(data, config).map_err(|e| {
            warn!("Failed to deserialize stored entry: {}", e);
            e
        })?;
        if read != data.len() {
            return Err(EngineError::Codec(format!(
                "stored entry has {} trailing bytes",
                data.len() - read
            )));
        }
        Ok(entry)
    }
}

/// One record carried by a packed blob; positions are implied by order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedEntry {
    pub term: Term,
    pub payload: Vec<u8>,
}

impl PackedEntry {
    pub fn is_hole(&self) -> bool {
        self.term == RESERVED_TERM
    }

    pub fn to_stored(self) -> StoredEntry {
        if self.is_hole() {
            StoredEntry::Hole
        } else {
            StoredEntry::Record {
                term: self.term,
                payload: self.payload,
            }
        }
    }
}

/// Serialized, self-describing run of consecutive records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedBlob(Vec<u8>);

impl PackedBlob {
    /// Packs records in the given order. Placeholders become hole frames.
    ///
    /// Fails when the record count or a frame length does not fit its u32 field.
    pub fn encode(records: &[LogRecord]) -> Result<Self, LogStoreError> {
        let body_len: usize = records
            .iter()
            .map(|r| FRAME_LEN_SIZE + FRAME_TERM_SIZE + r.payload.len())
            .sum();
        let mut buf = Vec::with_capacity(PACK_HEADER_SIZE + body_len);
        buf.extend_from_slice(&PACK_MAGIC_NUM.to_le_bytes());
        buf.extend_from_slice(&u32_field(records.len(), "record count")?.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());

        for record in records {
            let len = u32_field(FRAME_TERM_SIZE + record.payload.len(), "frame length")?;
            buf.extend_from_slice(&len.to_le_bytes());
            buf.extend_from_slice(&record.term.to_le_bytes());
            buf.extend_from_slice(&record.payload);
        }

        let crc = crc32fast::hash(&buf[PACK_HEADER_SIZE..]);
        buf[8..12].copy_from_slice(&crc.to_le_bytes());
        Ok(Self(buf))
    }

    /// Decodes every frame, validating magic, checksum, framing and count.
    pub fn decode(&self) -> Result<Vec<PackedEntry>, LogStoreError> {
        let data = &self.0;
        if data.len() < PACK_HEADER_SIZE {
            return Err(corrupt(format!("blob of {} bytes has no header", data.len())));
        }

        let magic = read_u32(data, 0);
        if magic != PACK_MAGIC_NUM {
            return Err(corrupt(format!("bad magic {:#x}", magic)));
        }
        let count = read_u32(data, 4) as usize;
        let crc = read_u32(data, 8);

        let body = &data[PACK_HEADER_SIZE..];
        let actual_crc = crc32fast::hash(body);
        if actual_crc != crc {
            return Err(corrupt(format!(
                "crc mismatch: expected {}, got {}",
                crc, actual_crc
            )));
        }

        // Every frame takes at least a length and a term.
        let max_count = body.len() / (FRAME_LEN_SIZE + FRAME_TERM_SIZE);
        if count > max_count {
            return Err(corrupt(format!(
                "declared {} records, body holds at most {}",
                count, max_count
            )));
        }

        let mut entries = Vec::with_capacity(count);
        let mut offset = 0usize;
        while offset < body.len() {
            if body.len() - offset < FRAME_LEN_SIZE {
                return Err(corrupt(format!("truncated frame length at {}", offset)));
            }
            let len = read_u32(body, offset) as usize;
            offset += FRAME_LEN_SIZE;

            if len < FRAME_TERM_SIZE || body.len() - offset < len {
                return Err(corrupt(format!("bad frame length {} at {}", len, offset)));
            }
            let term = u64::from_le_bytes(
                body[offset..offset + FRAME_TERM_SIZE]
                    .try_into()
                    .map_err(|_| corrupt("short term".to_string()))?,
            );
            let payload = body[offset + FRAME_TERM_SIZE..offset + len].to_vec();
            offset += len;

            if term == RESERVED_TERM && !payload.is_empty() {
                return Err(corrupt(format!("hole frame {} carries a payload", entries.len())));
            }
            entries.push(PackedEntry { term, payload });
        }

        if entries.len() != count {
            return Err(corrupt(format!(
                "declared {} records, framed {}",
                count,
                entries.len()
            )));
        }
        Ok(entries)
    }

    /// Record count declared in the header, without decoding the frames.
    pub fn record_count(&self) -> Option<u32> {
        if self.0.len() < PACK_HEADER_SIZE || read_u32(&self.0, 0) != PACK_MAGIC_NUM {
            return None;
        }
        Some(read_u32(&self.0, 4))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for PackedBlob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn u32_field(value: usize, what: &str) -> Result<u32, LogStoreError> {
    u32::try_from(value).map_err(|_| corrupt(format!("{} {} exceeds u32", what, value)))
}

fn corrupt(reason: String) -> LogStoreError {
    warn!("Rejecting packed blob: {}", reason);
    LogStoreError::CorruptBlob(reason)
}

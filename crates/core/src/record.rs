//! Log record types and the on-disk frame codec.
//!
//! Every durable mutation is one frame in the append log. The layout is a
//! fixed little-endian sequence:
//!
//! `kind:1 | txn_id:8 | timestamp:8 | is_vector:1 | key_len:4 | key_bytes |
//! data_len:4 | data_bytes`
//!
//! For vector payloads `data_bytes` holds `data_len / 4` little-endian f32
//! values and `data_len` must be a multiple of 4.

use crate::config;
use crate::error::{Error, Result};
use std::io::{ErrorKind, Read};

/// A store key: a non-empty opaque byte string, compared by bytes.
pub type Key = Vec<u8>;

/// Record kinds, encoded as the first frame byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    Insert = 1,
    Delete = 2,
    Commit = 3,
    Checkpoint = 4,
}

impl RecordKind {
    fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(RecordKind::Insert),
            2 => Some(RecordKind::Delete),
            3 => Some(RecordKind::Commit),
            4 => Some(RecordKind::Checkpoint),
            _ => None,
        }
    }
}

/// A record payload: either an opaque byte string or a dense f32 vector.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Bytes(Vec<u8>),
    Vector(Vec<f32>),
}

impl Payload {
    /// Encoded length in bytes.
    pub fn byte_len(&self) -> usize {
        match self {
            Payload::Bytes(b) => b.len(),
            Payload::Vector(v) => v.len() * 4,
        }
    }

    /// Empty byte payload, used by COMMIT and CHECKPOINT frames.
    pub fn empty() -> Self {
        Payload::Bytes(Vec::new())
    }
}

/// One append-log record.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub kind: RecordKind,
    pub txn_id: u64,
    pub timestamp: u64,
    pub key: Key,
    pub payload: Payload,
}

/// Fixed bytes per frame before the variable key and data sections.
const FRAME_HEADER_LEN: usize = 1 + 8 + 8 + 1 + 4;

impl LogRecord {
    /// An INSERT record carrying the new value for `key`.
    pub fn insert(txn_id: u64, key: Key, payload: Payload, timestamp: u64) -> Self {
        Self {
            kind: RecordKind::Insert,
            txn_id,
            timestamp,
            key,
            payload,
        }
    }

    /// A DELETE record for `key`.
    pub fn delete(txn_id: u64, key: Key, timestamp: u64) -> Self {
        Self {
            kind: RecordKind::Delete,
            txn_id,
            timestamp,
            key,
            payload: Payload::empty(),
        }
    }

    /// A COMMIT record closing `txn_id`. Carries no key or payload.
    pub fn commit(txn_id: u64, timestamp: u64) -> Self {
        Self {
            kind: RecordKind::Commit,
            txn_id,
            timestamp,
            key: Vec::new(),
            payload: Payload::empty(),
        }
    }

    /// A CHECKPOINT marker: everything before it may be truncated out of band.
    pub fn checkpoint(timestamp: u64) -> Self {
        Self {
            kind: RecordKind::Checkpoint,
            txn_id: 0,
            timestamp,
            key: Vec::new(),
            payload: Payload::empty(),
        }
    }

    /// Total encoded frame length in bytes.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_LEN + self.key.len() + 4 + self.payload.byte_len()
    }

    /// Serialize into the on-disk frame format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(self.kind as u8);
        buf.extend_from_slice(&self.txn_id.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.push(matches!(self.payload, Payload::Vector(_)) as u8);
        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&(self.payload.byte_len() as u32).to_le_bytes());
        match &self.payload {
            Payload::Bytes(bytes) => buf.extend_from_slice(bytes),
            Payload::Vector(values) => {
                for v in values {
                    buf.extend_from_slice(&v.to_le_bytes());
                }
            }
        }
        buf
    }

    /// Decode one frame from `reader`.
    ///
    /// Returns `Ok(None)` on a clean end of stream (no bytes before the next
    /// frame would start). A frame cut short mid-way, an unknown kind byte,
    /// an oversized length field, or a vector length that is not a multiple
    /// of 4 all yield [`Error::Corrupt`].
    pub fn decode_from<R: Read>(reader: &mut R) -> Result<Option<LogRecord>> {
        let mut kind_byte = [0u8; 1];
        match reader.read_exact(&mut kind_byte) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let kind = RecordKind::from_u8(kind_byte[0])
            .ok_or_else(|| Error::Corrupt(format!("unknown record kind {}", kind_byte[0])))?;

        let txn_id = read_u64(reader)?;
        let timestamp = read_u64(reader)?;
        let is_vector = read_u8(reader)? != 0;

        let key_len = read_u32(reader)? as usize;
        if key_len > config::MAX_KEY_LEN {
            return Err(Error::Corrupt(format!("key length {} out of range", key_len)));
        }
        let mut key = vec![0u8; key_len];
        read_all(reader, &mut key)?;

        let data_len = read_u32(reader)? as usize;
        if data_len > config::MAX_DATA_LEN {
            return Err(Error::Corrupt(format!(
                "payload length {} out of range",
                data_len
            )));
        }
        let mut data = vec![0u8; data_len];
        read_all(reader, &mut data)?;

        let payload = if is_vector {
            if data_len % 4 != 0 {
                return Err(Error::Corrupt(format!(
                    "vector payload length {} is not a multiple of 4",
                    data_len
                )));
            }
            let values = data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            Payload::Vector(values)
        } else {
            Payload::Bytes(data)
        };

        Ok(Some(LogRecord {
            kind,
            txn_id,
            timestamp,
            key,
            payload,
        }))
    }
}

fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    read_all(reader, &mut buf)?;
    Ok(buf[0])
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_all(reader, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    read_all(reader, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// `read_exact` that reports mid-frame EOF as corruption instead of clean EOF.
fn read_all<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            Error::Corrupt("frame truncated".into())
        } else {
            Error::Io(e)
        }
    })
}

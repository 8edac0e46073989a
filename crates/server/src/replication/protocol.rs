//! Replication wire protocol: binary-framed messages over TCP.
//!
//! Every message is `[u32 msg_type BE][u32 payload_len BE][payload]`.
//! Handshakes are JSON payloads; record batches and Paxos messages ride as
//! raw and JSON payloads respectively.

use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

// ── Message type constants ───────────────────────────────────────────

pub const MSG_HANDSHAKE: u32 = 0x01;
pub const MSG_HANDSHAKE_ACK: u32 = 0x02;
pub const MSG_RECORDS: u32 = 0x20;
pub const MSG_PAXOS_REQUEST: u32 = 0x30;
pub const MSG_PAXOS_REPLY: u32 = 0x31;
pub const MSG_PING: u32 = 0xF0;

/// Protocol version. Bump on breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum single message payload (64 MB safety limit).
const MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

// ── Typed message payloads ───────────────────────────────────────────

/// Follower → leader greeting, carrying the follower's log size so the
/// leader can resume the stream at the right offset.
#[derive(Debug, Serialize, Deserialize)]
pub struct Handshake {
    pub version: u32,
    pub node_id: String,
    pub log_size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HandshakeAck {
    pub ok: bool,
    pub log_size: u64,
}

// ── Encode / decode ──────────────────────────────────────────────────

/// Write a framed message: `[msg_type u32 BE][payload_len u32 BE][payload]`.
pub fn write_message<W: Write>(writer: &mut W, msg_type: u32, payload: &[u8]) -> io::Result<()> {
    let mut header = [0u8; 8];
    header[..4].copy_from_slice(&msg_type.to_be_bytes());
    header[4..8].copy_from_slice(&(payload.len() as u32).to_be_bytes());
    writer.write_all(&header)?;
    if !payload.is_empty() {
        writer.write_all(payload)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a framed message, returning `(msg_type, payload)`.
pub fn read_message<R: Read>(reader: &mut R) -> io::Result<(u32, Vec<u8>)> {
    let mut header = [0u8; 8];
    reader.read_exact(&mut header)?;
    let msg_type = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let payload_len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("payload too large: {} bytes", payload_len),
        ));
    }
    let mut payload = vec![0u8; payload_len as usize];
    if payload_len > 0 {
        reader.read_exact(&mut payload)?;
    }
    Ok((msg_type, payload))
}

/// Serialize a serde-compatible value to JSON bytes.
pub fn encode_json<T: Serialize>(value: &T) -> io::Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| io::Error::other(e.to_string()))
}

/// Deserialize a serde-compatible value from JSON bytes.
pub fn decode_json<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> io::Result<T> {
    serde_json::from_slice(bytes).map_err(|e| io::Error::other(e.to_string()))
}

//! Follower-side replication: connect to the leader and apply shipped
//! records verbatim.
//!
//! The follower's log stays byte-identical to the leader's prefix, so a
//! restart resumes from its own log size. A lost connection is retried
//! after a short delay, forever.

use super::protocol::*;
use simpledb_core::config;
use simpledb_core::record::LogRecord;
use simpledb_core::storage::KvStore;
use std::io::{self, BufReader, Cursor};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Replicate from `leader` forever, reconnecting on failure.
pub fn run_follower(leader: String, store: Arc<KvStore>) {
    loop {
        match stream_from_leader(&leader, &store) {
            Ok(()) => tracing::info!("leader {} closed the replication stream", leader),
            Err(e) => tracing::warn!("replication from {} failed: {}", leader, e),
        }
        thread::sleep(Duration::from_millis(config::REPL_RECONNECT_DELAY_MS));
    }
}

fn stream_from_leader(leader: &str, store: &KvStore) -> io::Result<()> {
    let stream = TcpStream::connect(leader)?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;

    let handshake = Handshake {
        version: PROTOCOL_VERSION,
        node_id: format!("follower-{}", std::process::id()),
        log_size: store.log().size(),
    };
    write_message(&mut writer, MSG_HANDSHAKE, &encode_json(&handshake)?)?;

    let (msg_type, payload) = read_message(&mut reader)?;
    if msg_type != MSG_HANDSHAKE_ACK {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "expected handshake ack",
        ));
    }
    let ack: HandshakeAck = decode_json(&payload)?;
    if !ack.ok {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "leader refused the handshake",
        ));
    }
    tracing::info!(
        "replicating from {} (local {} / leader {} bytes)",
        leader,
        handshake.log_size,
        ack.log_size
    );

    loop {
        let (msg_type, payload) = read_message(&mut reader)?;
        match msg_type {
            MSG_RECORDS => apply_batch(store, &payload)?,
            MSG_PING => {}
            other => tracing::warn!("unexpected replication message type {:#x}", other),
        }
    }
}

/// Decode and apply every frame in a shipped batch.
fn apply_batch(store: &KvStore, batch: &[u8]) -> io::Result<()> {
    let mut cursor = Cursor::new(batch);
    loop {
        let record = LogRecord::decode_from(&mut cursor)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        match record {
            Some(record) => {
                store
                    .replicate(&record)
                    .map_err(|e| io::Error::other(e.to_string()))?;
            }
            None => return Ok(()),
        }
    }
}

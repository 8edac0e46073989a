//! Leader-side replication: a TCP listener that streams append-log
//! records to connected followers.
//!
//! Each follower announces its current log size in the handshake; the
//! leader resumes the stream from that offset and then polls the log for
//! new records, shipping them in bounded batches of whole frames.

use super::protocol::*;
use simpledb_core::config;
use simpledb_core::storage::{AppendLog, KvStore};
use std::io::{self, BufReader, BufWriter};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Accept followers forever, spawning a streaming thread per connection.
pub fn run_replication_listener(listener: TcpListener, store: Arc<KvStore>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let peer = stream
                    .peer_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| "unknown".into());
                tracing::info!("follower connected from {}", peer);
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    if let Err(e) = handle_follower(stream, store) {
                        tracing::warn!("follower {} disconnected: {}", peer, e);
                    }
                });
            }
            Err(e) => tracing::warn!("replication accept failed: {}", e),
        }
    }
}

fn handle_follower(stream: TcpStream, store: Arc<KvStore>) -> io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);

    // ── Handshake ────────────────────────────────────────────────
    let (msg_type, payload) = read_message(&mut reader)?;
    if msg_type != MSG_HANDSHAKE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "expected handshake",
        ));
    }
    let handshake: Handshake = decode_json(&payload)?;
    let leader_size = store.log().size();
    let ok = handshake.version == PROTOCOL_VERSION && handshake.log_size <= leader_size;
    let ack = HandshakeAck {
        ok,
        log_size: leader_size,
    };
    write_message(&mut writer, MSG_HANDSHAKE_ACK, &encode_json(&ack)?)?;
    if !ok {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!(
                "rejected follower '{}': version {}, log size {} (leader has {})",
                handshake.node_id, handshake.version, handshake.log_size, leader_size
            ),
        ));
    }
    tracing::info!(
        "streaming to '{}' from offset {}",
        handshake.node_id,
        handshake.log_size
    );

    // ── Continuous record streaming ──────────────────────────────
    let mut position = handshake.log_size;
    let mut idle_polls = 0u32;
    loop {
        let (batch, next) = collect_batch(store.log(), position)
            .map_err(|e| io::Error::other(e.to_string()))?;
        if batch.is_empty() {
            idle_polls += 1;
            if idle_polls >= config::REPL_PINGS_EVERY_POLLS {
                write_message(&mut writer, MSG_PING, b"")?;
                idle_polls = 0;
            }
        } else {
            write_message(&mut writer, MSG_RECORDS, &batch)?;
            position = next;
            idle_polls = 0;
        }
        thread::sleep(Duration::from_millis(config::REPL_POLL_INTERVAL_MS));
    }
}

/// Collect whole frames from `from` up to the batch size limit.
///
/// Returns the concatenated frame bytes and the offset just past the last
/// one.
fn collect_batch(log: &AppendLog, from: u64) -> simpledb_core::Result<(Vec<u8>, u64)> {
    let mut bytes = Vec::new();
    let mut position = from;
    for (offset, record) in log.iter_from(from)? {
        let encoded = record.encode();
        position = offset + encoded.len() as u64;
        bytes.extend_from_slice(&encoded);
        if bytes.len() >= config::REPL_MAX_BATCH_BYTES {
            break;
        }
    }
    Ok((bytes, position))
}

#[cfg(test)]
mod tests {
    use super::*;
    use simpledb_core::record::Payload;
    use simpledb_core::HnswConfig;
    use tempfile::TempDir;

    #[test]
    fn test_collect_batch_is_frame_aligned() {
        let dir = TempDir::new().unwrap();
        let store =
            KvStore::open(dir.path().join("l.log"), 2, HnswConfig::default()).unwrap();
        store.put(1, b"a", Payload::Bytes(b"1".to_vec())).unwrap();
        store.put(1, b"b", Payload::Bytes(b"2".to_vec())).unwrap();
        store.commit(1).unwrap();

        let (bytes, next) = collect_batch(store.log(), 0).unwrap();
        assert_eq!(next, store.log().size());

        // The batch decodes back into the exact record sequence.
        let mut cursor = std::io::Cursor::new(&bytes[..]);
        let mut decoded = Vec::new();
        while let Some(rec) = simpledb_core::LogRecord::decode_from(&mut cursor).unwrap() {
            decoded.push(rec);
        }
        let original: Vec<_> = store.log().iter_all().unwrap().map(|(_, r)| r).collect();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_collect_batch_resumes_mid_log() {
        let dir = TempDir::new().unwrap();
        let store =
            KvStore::open(dir.path().join("l.log"), 2, HnswConfig::default()).unwrap();
        store.put(1, b"a", Payload::Bytes(b"1".to_vec())).unwrap();
        let mid = store.log().size();
        store.put(1, b"b", Payload::Bytes(b"2".to_vec())).unwrap();

        let (bytes, next) = collect_batch(store.log(), mid).unwrap();
        assert_eq!(next, store.log().size());
        let rec = simpledb_core::LogRecord::decode_from(&mut std::io::Cursor::new(&bytes[..]))
            .unwrap()
            .unwrap();
        assert_eq!(rec.key, b"b".to_vec());
    }

    #[test]
    fn test_collect_batch_empty_at_tip() {
        let dir = TempDir::new().unwrap();
        let store =
            KvStore::open(dir.path().join("l.log"), 2, HnswConfig::default()).unwrap();
        store.put(1, b"a", Payload::Bytes(b"1".to_vec())).unwrap();
        let tip = store.log().size();
        let (bytes, next) = collect_batch(store.log(), tip).unwrap();
        assert!(bytes.is_empty());
        assert_eq!(next, tip);
    }
}

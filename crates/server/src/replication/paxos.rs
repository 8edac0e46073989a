//! CAS-Paxos over TCP: the peer service and the transport.
//!
//! Each round opens short-lived connections: one framed JSON request, one
//! framed JSON reply. Peers are contacted concurrently with connect and
//! I/O timeouts; an unreachable peer contributes no reply and simply
//! shrinks the set the engine counts toward its quorum.

use super::protocol::*;
use simpledb_core::config;
use simpledb_core::paxos::{Acceptor, PaxosMessage, PaxosTransport};
use std::io::{self, BufReader};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// TCP transport fanning a request out to every configured peer.
pub struct TcpTransport {
    peers: Vec<String>,
}

impl TcpTransport {
    /// `peers` are `host:port` addresses of the other nodes' Paxos services.
    pub fn new(peers: Vec<String>) -> Self {
        Self { peers }
    }
}

impl PaxosTransport for TcpTransport {
    fn broadcast(&self, msg: &PaxosMessage) -> Vec<PaxosMessage> {
        let payload = match encode_json(msg) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("paxos message encode failed: {}", e);
                return Vec::new();
            }
        };
        let payload: &[u8] = &payload;
        thread::scope(|scope| {
            let handles: Vec<_> = self
                .peers
                .iter()
                .map(|peer| {
                    let peer = peer.as_str();
                    scope.spawn(move || exchange_with_retry(peer, payload))
                })
                .collect();
            handles
                .into_iter()
                .filter_map(|handle| handle.join().ok().flatten())
                .collect()
        })
    }

    fn replica_count(&self) -> usize {
        self.peers.len()
    }
}

fn exchange_with_retry(peer: &str, payload: &[u8]) -> Option<PaxosMessage> {
    for attempt in 1..=config::PAXOS_SEND_ATTEMPTS {
        match exchange(peer, payload) {
            Ok(reply) => return Some(reply),
            Err(e) => {
                tracing::debug!("paxos exchange with {} failed (attempt {}): {}", peer, attempt, e);
            }
        }
    }
    None
}

/// One request/reply exchange with a single peer.
fn exchange(peer: &str, payload: &[u8]) -> io::Result<PaxosMessage> {
    let addr = peer
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "peer address unresolvable"))?;
    let stream = TcpStream::connect_timeout(
        &addr,
        Duration::from_millis(config::PAXOS_CONNECT_TIMEOUT_MS),
    )?;
    let io_timeout = Some(Duration::from_millis(config::PAXOS_IO_TIMEOUT_MS));
    stream.set_read_timeout(io_timeout)?;
    stream.set_write_timeout(io_timeout)?;

    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    write_message(&mut writer, MSG_PAXOS_REQUEST, payload)?;
    let (msg_type, reply) = read_message(&mut reader)?;
    if msg_type != MSG_PAXOS_REPLY {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected paxos reply type {:#x}", msg_type),
        ));
    }
    decode_json(&reply)
}

/// Serve PREPARE/COMMIT requests from peers through the local acceptor.
pub fn run_paxos_listener(listener: TcpListener, acceptor: Arc<Acceptor>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let acceptor = Arc::clone(&acceptor);
                thread::spawn(move || {
                    if let Err(e) = serve_peer(stream, acceptor) {
                        // Peers disconnect after each round; only unclean
                        // endings are interesting.
                        if e.kind() != io::ErrorKind::UnexpectedEof {
                            tracing::debug!("paxos peer connection ended: {}", e);
                        }
                    }
                });
            }
            Err(e) => tracing::warn!("paxos accept failed: {}", e),
        }
    }
}

fn serve_peer(stream: TcpStream, acceptor: Arc<Acceptor>) -> io::Result<()> {
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    loop {
        let (msg_type, payload) = read_message(&mut reader)?;
        if msg_type != MSG_PAXOS_REQUEST {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected paxos request type {:#x}", msg_type),
            ));
        }
        let request: PaxosMessage = decode_json(&payload)?;
        match acceptor.handle(&request) {
            Some(reply) => {
                write_message(&mut writer, MSG_PAXOS_REPLY, &encode_json(&reply)?)?;
            }
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "message is not an acceptor request",
                ));
            }
        }
    }
}

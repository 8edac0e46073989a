//! The peer-transport seam for the CAS-Paxos engine.
//!
//! The engine broadcasts a request and consumes whatever replies arrive;
//! delivery is best-effort and an unreachable peer simply contributes no
//! reply. The server crate provides the TCP implementation; the in-process
//! mesh here wires acceptors together directly for tests and embedding.

use crate::paxos::acceptor::Acceptor;
use crate::paxos::messages::PaxosMessage;
use std::sync::Arc;

/// Delivery of one request to every remote replica.
pub trait PaxosTransport: Send + Sync {
    /// Send `msg` to all remote replicas and collect the replies that
    /// arrived. Missing replies mean unreachable or timed-out peers.
    fn broadcast(&self, msg: &PaxosMessage) -> Vec<PaxosMessage>;

    /// Number of remote replicas configured (the local node not included).
    fn replica_count(&self) -> usize;
}

/// Transport of a standalone node: no peers, every round is local-only.
#[derive(Debug, Default)]
pub struct NoPeers;

impl PaxosTransport for NoPeers {
    fn broadcast(&self, _msg: &PaxosMessage) -> Vec<PaxosMessage> {
        Vec::new()
    }

    fn replica_count(&self) -> usize {
        0
    }
}

/// In-process mesh delivering requests straight to peer acceptors.
pub struct InProcTransport {
    peers: Vec<Arc<Acceptor>>,
}

impl InProcTransport {
    pub fn new(peers: Vec<Arc<Acceptor>>) -> Self {
        Self { peers }
    }
}

impl PaxosTransport for InProcTransport {
    fn broadcast(&self, msg: &PaxosMessage) -> Vec<PaxosMessage> {
        self.peers
            .iter()
            .filter_map(|acceptor| acceptor.handle(msg))
            .collect()
    }

    fn replica_count(&self) -> usize {
        self.peers.len()
    }
}

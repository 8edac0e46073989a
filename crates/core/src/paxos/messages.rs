//! CAS-Paxos wire messages and ballot numbers.
//!
//! Messages are one tagged enum; acceptors and proposers consume them by
//! pattern match. The serde derives are what the server's TCP transport
//! frames onto the wire.

use serde::{Deserialize, Serialize};

/// A unique, totally-ordered proposal number.
///
/// Ordering is lexicographic on `(epoch, node_id)`; the derived `Ord` on
/// the field order gives exactly that. A ballot is owned by the node whose
/// id appears in it.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Ballot {
    pub epoch: u64,
    pub node_id: u32,
}

impl Ballot {
    pub fn new(epoch: u64, node_id: u32) -> Self {
        Self { epoch, node_id }
    }
}

impl std::fmt::Display for Ballot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.epoch, self.node_id)
    }
}

/// An acceptor's per-key register slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedValue {
    /// Ballot under which the value was committed.
    pub ballot: Ballot,
    pub value: Vec<u8>,
    pub committed: bool,
}

/// The CAS-Paxos protocol messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PaxosMessage {
    /// Phase 1 request. `expected` carries the CAS precondition: `Some(v)`
    /// requires the current slot value to equal `v`; `None` is
    /// unconditional.
    Prepare {
        ballot: Ballot,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        proposed: Vec<u8>,
    },
    /// Phase 1 grant, carrying the acceptor's current slot (if any) and
    /// its highest promised ballot.
    Promise {
        ballot: Ballot,
        key: Vec<u8>,
        current: Option<VersionedValue>,
        highest: Ballot,
    },
    /// Phase 2 request: write `value` under `ballot`.
    Commit {
        ballot: Ballot,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// Phase 2 reply.
    Ack {
        ballot: Ballot,
        key: Vec<u8>,
        success: bool,
    },
    /// Phase 1 refusal, with the ballot that outranks the request.
    Reject {
        ballot: Ballot,
        key: Vec<u8>,
        highest: Ballot,
        reason: String,
    },
}

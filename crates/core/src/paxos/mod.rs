//! Per-key single-decree CAS-Paxos.
//!
//! Each key is an independent durable register. A round runs two phases:
//! PREPARE collects promises from a majority of acceptors (the local one
//! counts), with the compare-and-swap precondition checked during the
//! promise; COMMIT then writes the value under the same ballot. A higher
//! ballot observed anywhere preempts the round and bumps the proposer's
//! epoch.

/// Acceptor role: promised ballots and register slots.
pub mod acceptor;
/// Protocol messages and ballot numbers.
pub mod messages;
/// Proposer role: ballot generation.
pub mod proposer;
/// Peer-transport trait and in-process implementations.
pub mod transport;

pub use acceptor::Acceptor;
pub use messages::{Ballot, PaxosMessage, VersionedValue};
pub use proposer::Proposer;
pub use transport::{InProcTransport, NoPeers, PaxosTransport};

use crate::error::{Error, Result};
use std::sync::Arc;

/// The consensus engine co-locating a proposer and an acceptor.
pub struct CasPaxos {
    node_id: u32,
    proposer: Proposer,
    acceptor: Arc<Acceptor>,
    transport: Arc<dyn PaxosTransport>,
}

impl CasPaxos {
    pub fn new(node_id: u32, transport: Arc<dyn PaxosTransport>) -> Self {
        Self {
            node_id,
            proposer: Proposer::new(node_id),
            acceptor: Arc::new(Acceptor::new()),
            transport,
        }
    }

    /// This node's id, as it appears in issued ballots.
    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    /// The local acceptor; the server's peer service answers through it.
    pub fn acceptor(&self) -> Arc<Acceptor> {
        Arc::clone(&self.acceptor)
    }

    /// Majority size: `⌈(N + 1) / 2⌉` where N counts remote replicas and
    /// the local node counts as one.
    pub fn quorum(&self) -> usize {
        let total = self.transport.replica_count() + 1;
        (total + 1) / 2
    }

    /// Compare-and-swap: write `proposed` iff the register currently holds
    /// `expected` (or holds anything, when `expected` is `None`).
    pub fn cas(&self, key: &[u8], expected: Option<&[u8]>, proposed: &[u8]) -> Result<()> {
        let ballot = self.proposer.next_ballot();
        let quorum = self.quorum();
        let prepare = PaxosMessage::Prepare {
            ballot,
            key: key.to_vec(),
            expected: expected.map(|v| v.to_vec()),
            proposed: proposed.to_vec(),
        };

        // Phase 1: local acceptor first; its refusal ends the round.
        let mut promises = 1usize;
        match self.acceptor.handle_prepare(ballot, key, expected) {
            PaxosMessage::Promise { .. } => {}
            PaxosMessage::Reject {
                highest, reason, ..
            } => {
                if highest > ballot {
                    self.proposer.observe(highest);
                    return Err(Error::Preempted {
                        epoch: highest.epoch,
                        node: highest.node_id,
                    });
                }
                return Err(Error::CasFailed(reason));
            }
            _ => unreachable!("prepare yields promise or reject"),
        }

        for reply in self.transport.broadcast(&prepare) {
            match reply {
                PaxosMessage::Promise { highest, .. } => {
                    if highest > ballot {
                        self.proposer.observe(highest);
                        return Err(Error::Preempted {
                            epoch: highest.epoch,
                            node: highest.node_id,
                        });
                    }
                    promises += 1;
                }
                PaxosMessage::Reject { highest, .. } => {
                    if highest > ballot {
                        self.proposer.observe(highest);
                        return Err(Error::Preempted {
                            epoch: highest.epoch,
                            node: highest.node_id,
                        });
                    }
                }
                other => {
                    tracing::debug!("ignoring unexpected prepare reply: {:?}", other);
                }
            }
        }
        if promises < quorum {
            return Err(Error::NoQuorum {
                acks: promises,
                needed: quorum,
            });
        }

        // Phase 2: commit under the same ballot.
        let commit = PaxosMessage::Commit {
            ballot,
            key: key.to_vec(),
            value: proposed.to_vec(),
        };
        let mut acks = 0usize;
        if let PaxosMessage::Ack { success: true, .. } =
            self.acceptor.handle_commit(ballot, key, proposed)
        {
            acks += 1;
        } else {
            return Err(Error::CasFailed("commit rejected locally".into()));
        }
        for reply in self.transport.broadcast(&commit) {
            if let PaxosMessage::Ack { success: true, .. } = reply {
                acks += 1;
            }
        }
        if acks < quorum {
            return Err(Error::NoQuorum {
                acks,
                needed: quorum,
            });
        }

        tracing::debug!(
            "cas chose value for key ({} bytes) under ballot {}",
            proposed.len(),
            ballot
        );
        Ok(())
    }

    /// Unconditional write: `cas(key, None, value)`.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.cas(key, None, value)
    }

    /// Delete: a CAS to the empty string, which encodes logical absence.
    pub fn del(&self, key: &[u8], expected: Option<&[u8]>) -> Result<()> {
        self.cas(key, expected, b"")
    }

    /// Local committed read. Not linearizable by itself.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.acceptor.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_node() -> CasPaxos {
        CasPaxos::new(1, Arc::new(NoPeers))
    }

    /// Three-node cluster over the in-process mesh: the engine under test
    /// plus two remote acceptors.
    fn three_nodes() -> (CasPaxos, Vec<Arc<Acceptor>>) {
        let remotes = vec![Arc::new(Acceptor::new()), Arc::new(Acceptor::new())];
        let engine = CasPaxos::new(1, Arc::new(InProcTransport::new(remotes.clone())));
        (engine, remotes)
    }

    /// Transport reporting `n` remote replicas that never answer.
    struct SilentPeers(usize);

    impl PaxosTransport for SilentPeers {
        fn broadcast(&self, _msg: &PaxosMessage) -> Vec<PaxosMessage> {
            Vec::new()
        }
        fn replica_count(&self) -> usize {
            self.0
        }
    }

    #[test]
    fn test_single_node_quorum_is_one() {
        assert_eq!(single_node().quorum(), 1);
    }

    #[test]
    fn test_three_node_quorum_is_two() {
        let (engine, _) = three_nodes();
        assert_eq!(engine.quorum(), 2);
    }

    #[test]
    fn test_even_totals_use_ceiling_majority() {
        // quorum = ceil(total / 2): 2 nodes need 1, 4 nodes need 2.
        assert_eq!(CasPaxos::new(1, Arc::new(SilentPeers(1))).quorum(), 1);
        assert_eq!(CasPaxos::new(1, Arc::new(SilentPeers(3))).quorum(), 2);
        assert_eq!(CasPaxos::new(1, Arc::new(SilentPeers(4))).quorum(), 3);
    }

    #[test]
    fn test_two_node_round_commits_on_local_promise_alone() {
        // With one unreachable remote the local acceptor is a 1-of-2 quorum.
        let engine = CasPaxos::new(1, Arc::new(SilentPeers(1)));
        engine.set(b"k", b"v").unwrap();
        assert_eq!(engine.get(b"k"), Some(b"v".to_vec()));
    }

    #[test]
    fn test_four_node_round_needs_one_remote_promise() {
        // 1 local + 3 remote: quorum 2, so one live remote suffices and
        // zero live remotes fail.
        let live = Arc::new(Acceptor::new());
        struct OneOfThree {
            live: Arc<Acceptor>,
        }
        impl PaxosTransport for OneOfThree {
            fn broadcast(&self, msg: &PaxosMessage) -> Vec<PaxosMessage> {
                self.live.handle(msg).into_iter().collect()
            }
            fn replica_count(&self) -> usize {
                3
            }
        }
        let engine = CasPaxos::new(1, Arc::new(OneOfThree { live: live.clone() }));
        assert_eq!(engine.quorum(), 2);
        engine.set(b"k", b"v").unwrap();
        assert_eq!(live.get(b"k"), Some(b"v".to_vec()));

        let dark = CasPaxos::new(2, Arc::new(SilentPeers(3)));
        let err = dark.set(b"k", b"v").unwrap_err();
        assert!(matches!(err, Error::NoQuorum { acks: 1, needed: 2 }));
    }

    #[test]
    fn test_set_then_get() {
        let engine = single_node();
        engine.set(b"x", b"init").unwrap();
        assert_eq!(engine.get(b"x"), Some(b"init".to_vec()));
    }

    #[test]
    fn test_cas_happy_path_and_precondition_violation() {
        let engine = single_node();
        engine.set(b"x", b"init").unwrap();

        engine.cas(b"x", Some(b"init"), b"new").unwrap();
        assert_eq!(engine.get(b"x"), Some(b"new".to_vec()));

        // Stale expectation leaves the register unchanged.
        let err = engine.cas(b"x", Some(b"init"), b"other").unwrap_err();
        assert!(matches!(err, Error::CasFailed(_)));
        assert_eq!(engine.get(b"x"), Some(b"new".to_vec()));
    }

    #[test]
    fn test_cas_on_absent_key_with_expectation_fails() {
        let engine = single_node();
        let err = engine.cas(b"ghost", Some(b"x"), b"v").unwrap_err();
        assert!(matches!(err, Error::CasFailed(_)));
        assert_eq!(engine.get(b"ghost"), None);
    }

    #[test]
    fn test_del_writes_empty_value() {
        let engine = single_node();
        engine.set(b"x", b"v").unwrap();
        engine.del(b"x", Some(b"v")).unwrap();
        // Deletion is an empty-string write, the register's absence encoding.
        assert_eq!(engine.get(b"x"), Some(Vec::new()));
    }

    #[test]
    fn test_replicated_set_reaches_remote_acceptors() {
        let (engine, remotes) = three_nodes();
        engine.set(b"k", b"v").unwrap();
        assert_eq!(engine.get(b"k"), Some(b"v".to_vec()));
        for remote in &remotes {
            assert_eq!(remote.get(b"k"), Some(b"v".to_vec()));
        }
    }

    #[test]
    fn test_preemption_bumps_proposer_epoch() {
        let (engine, remotes) = three_nodes();
        // Another proposer promised a far higher ballot on one remote.
        let foreign = Ballot::new(50, 9);
        remotes[0].handle_prepare(foreign, b"k", None);

        let err = engine.set(b"k", b"v").unwrap_err();
        assert!(matches!(err, Error::Preempted { epoch: 50, node: 9 }));

        // The next round outranks the foreign ballot and succeeds.
        engine.set(b"k", b"v").unwrap();
        assert_eq!(engine.get(b"k"), Some(b"v".to_vec()));
    }

    #[test]
    fn test_quorum_survives_one_dead_peer_of_three() {
        // One reachable remote of two still forms a 2-of-3 majority.
        let live = Arc::new(Acceptor::new());
        struct OneDead {
            live: Arc<Acceptor>,
        }
        impl PaxosTransport for OneDead {
            fn broadcast(&self, msg: &PaxosMessage) -> Vec<PaxosMessage> {
                self.live.handle(msg).into_iter().collect()
            }
            fn replica_count(&self) -> usize {
                2
            }
        }
        let engine = CasPaxos::new(1, Arc::new(OneDead { live: live.clone() }));
        assert_eq!(engine.quorum(), 2);
        engine.set(b"k", b"v").unwrap();
        assert_eq!(live.get(b"k"), Some(b"v".to_vec()));
    }

    #[test]
    fn test_no_quorum_when_all_peers_dead() {
        let engine = CasPaxos::new(1, Arc::new(SilentPeers(2)));
        let err = engine.set(b"k", b"v").unwrap_err();
        assert!(matches!(err, Error::NoQuorum { acks: 1, needed: 2 }));
    }
}

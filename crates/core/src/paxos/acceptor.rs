//! The acceptor role: promised-ballot tracking and per-key register slots.

use crate::paxos::messages::{Ballot, PaxosMessage, VersionedValue};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct AcceptorState {
    /// Highest ballot ever promised to, across all keys.
    highest: Ballot,
    /// At most one slot per key, overwritten on each accepted COMMIT.
    slots: HashMap<Vec<u8>, VersionedValue>,
}

/// One acceptor, co-located with the proposer on every node.
#[derive(Debug, Default)]
pub struct Acceptor {
    state: Mutex<AcceptorState>,
}

impl Acceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch a request message; replies are `None` for message kinds an
    /// acceptor does not answer.
    pub fn handle(&self, msg: &PaxosMessage) -> Option<PaxosMessage> {
        match msg {
            PaxosMessage::Prepare {
                ballot,
                key,
                expected,
                ..
            } => Some(self.handle_prepare(*ballot, key, expected.as_deref())),
            PaxosMessage::Commit { ballot, key, value } => {
                Some(self.handle_commit(*ballot, key, value))
            }
            _ => None,
        }
    }

    /// Phase 1: promise `ballot` or reject it.
    ///
    /// A ballot below the highest promised one is rejected outright. The
    /// CAS precondition is checked against the current slot: when
    /// `expected` is given, the slot must exist and match.
    pub fn handle_prepare(
        &self,
        ballot: Ballot,
        key: &[u8],
        expected: Option<&[u8]>,
    ) -> PaxosMessage {
        let mut state = self.state.lock();
        if ballot < state.highest {
            return PaxosMessage::Reject {
                ballot,
                key: key.to_vec(),
                highest: state.highest,
                reason: "stale ballot".into(),
            };
        }
        state.highest = ballot;

        let current = state.slots.get(key).cloned();
        if let Some(expected) = expected {
            let matches = current
                .as_ref()
                .is_some_and(|slot| slot.value == expected);
            if !matches {
                return PaxosMessage::Reject {
                    ballot,
                    key: key.to_vec(),
                    highest: state.highest,
                    reason: "cas precondition failed".into(),
                };
            }
        }

        PaxosMessage::Promise {
            ballot,
            key: key.to_vec(),
            current,
            highest: state.highest,
        }
    }

    /// Phase 2: accept `value` under `ballot` unless a higher ballot has
    /// been promised since.
    pub fn handle_commit(&self, ballot: Ballot, key: &[u8], value: &[u8]) -> PaxosMessage {
        let mut state = self.state.lock();
        let success = ballot >= state.highest;
        if success {
            state.slots.insert(
                key.to_vec(),
                VersionedValue {
                    ballot,
                    value: value.to_vec(),
                    committed: true,
                },
            );
        }
        PaxosMessage::Ack {
            ballot,
            key: key.to_vec(),
            success,
        }
    }

    /// Local committed value for `key`, if any. Not linearizable by itself.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.state
            .lock()
            .slots
            .get(key)
            .filter(|slot| slot.committed)
            .map(|slot| slot.value.clone())
    }

    /// Highest ballot promised so far.
    pub fn highest_ballot(&self) -> Ballot {
        self.state.lock().highest
    }
}

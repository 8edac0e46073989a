//! The proposer role: a strictly-increasing ballot source per node.

use crate::paxos::messages::Ballot;
use parking_lot::Mutex;

/// Issues ballots `(epoch++, node_id)` and tracks observed higher ballots.
#[derive(Debug)]
pub struct Proposer {
    node_id: u32,
    epoch: Mutex<u64>,
}

impl Proposer {
    pub fn new(node_id: u32) -> Self {
        Self {
            node_id,
            epoch: Mutex::new(1),
        }
    }

    /// Next ballot. Successive calls return strictly increasing ballots.
    pub fn next_ballot(&self) -> Ballot {
        let mut epoch = self.epoch.lock();
        let ballot = Ballot::new(*epoch, self.node_id);
        *epoch += 1;
        ballot
    }

    /// Raise the epoch past an observed ballot, so the next issued ballot
    /// outranks it.
    pub fn observe(&self, ballot: Ballot) {
        let mut epoch = self.epoch.lock();
        if ballot.epoch >= *epoch {
            *epoch = ballot.epoch + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ballots_strictly_increase() {
        let p = Proposer::new(3);
        let mut last = Ballot::new(0, 0);
        for _ in 0..50 {
            let b = p.next_ballot();
            assert!(b > last);
            assert_eq!(b.node_id, 3);
            last = b;
        }
    }

    #[test]
    fn test_observe_raises_epoch() {
        let p = Proposer::new(1);
        p.observe(Ballot::new(100, 9));
        let b = p.next_ballot();
        assert!(b > Ballot::new(100, 9), "next ballot must outrank observed");
        assert_eq!(b.epoch, 101);
    }

    #[test]
    fn test_observe_lower_ballot_is_noop() {
        let p = Proposer::new(1);
        let b1 = p.next_ballot();
        p.observe(Ballot::new(0, 5));
        let b2 = p.next_ballot();
        assert_eq!(b2.epoch, b1.epoch + 1);
    }
}

//! Two-phase-locking lock manager.
//!
//! One queue per key, heap-pinned behind an `Arc` so its condvar identity
//! survives map growth. A request that cannot be granted joins the FIFO
//! queue and blocks on the queue's condvar. On every release the queue is
//! re-scanned front-to-back: the leading request is granted if compatible;
//! a leading SHARED pulls further SHAREDs in order; the scan stops at the
//! first EXCLUSIVE, which is granted only when nothing is held.
//!
//! Deadlocks are not detected; waiters block indefinitely.

use crate::record::Key;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Lock compatibility mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Read lock; co-holdable with other SHAREDs.
    Shared,
    /// Write lock; excludes every other holder.
    Exclusive,
}

#[derive(Debug)]
struct Request {
    txn_id: u64,
    mode: LockMode,
    granted: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    shared: HashSet<u64>,
    exclusive: Option<u64>,
    waiters: VecDeque<Request>,
}

impl QueueState {
    /// Immediate-grant check, honoring locks the transaction already holds.
    fn grantable(&self, txn_id: u64, mode: LockMode) -> bool {
        match mode {
            // A SHARED request is satisfied by the requester's own
            // EXCLUSIVE hold; otherwise it needs the key free of writers.
            LockMode::Shared => self.exclusive.is_none() || self.exclusive == Some(txn_id),
            LockMode::Exclusive => {
                self.exclusive == Some(txn_id)
                    || (self.exclusive.is_none() && self.shared.is_empty())
            }
        }
    }

    fn grant(&mut self, txn_id: u64, mode: LockMode) {
        match mode {
            LockMode::Shared => {
                if self.exclusive != Some(txn_id) {
                    self.shared.insert(txn_id);
                }
            }
            LockMode::Exclusive => {
                self.exclusive = Some(txn_id);
            }
        }
    }

    /// Front-to-back grant scan after a release.
    fn grant_waiters(&mut self) {
        let QueueState {
            shared,
            exclusive,
            waiters,
        } = self;
        for request in waiters.iter_mut() {
            if request.granted {
                continue;
            }
            match request.mode {
                LockMode::Exclusive => {
                    if exclusive.is_none() && shared.is_empty() {
                        *exclusive = Some(request.txn_id);
                        request.granted = true;
                    }
                    break;
                }
                LockMode::Shared => {
                    if exclusive.is_none() {
                        shared.insert(request.txn_id);
                        request.granted = true;
                    } else {
                        break;
                    }
                }
            }
        }
    }
}

struct KeyQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
}

#[derive(Default)]
struct Tables {
    queues: HashMap<Key, Arc<KeyQueue>>,
    /// Keys held, in any mode, per transaction.
    held: HashMap<u64, HashSet<Key>>,
}

/// Blocking shared/exclusive lock manager keyed by store key.
#[derive(Default)]
pub struct LockManager {
    tables: Mutex<Tables>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire `mode` on `key` for `txn_id`, blocking until granted.
    ///
    /// Re-acquiring a mode the transaction already holds (or SHARED under
    /// its own EXCLUSIVE) returns immediately. A SHARED-to-EXCLUSIVE
    /// upgrade is not supported and blocks behind the holder's own lock.
    pub fn acquire(&self, txn_id: u64, key: &[u8], mode: LockMode) {
        let queue = {
            let mut tables = self.tables.lock();
            Arc::clone(
                tables
                    .queues
                    .entry(key.to_vec())
                    .or_insert_with(|| {
                        Arc::new(KeyQueue {
                            state: Mutex::new(QueueState::default()),
                            cond: Condvar::new(),
                        })
                    }),
            )
        };

        {
            let mut state = queue.state.lock();
            if state.grantable(txn_id, mode) {
                state.grant(txn_id, mode);
            } else {
                state.waiters.push_back(Request {
                    txn_id,
                    mode,
                    granted: false,
                });
                while !state
                    .waiters
                    .iter()
                    .any(|r| r.txn_id == txn_id && r.granted)
                {
                    queue.cond.wait(&mut state);
                }
                state
                    .waiters
                    .retain(|r| !(r.txn_id == txn_id && r.granted));
            }
        }

        self.tables
            .lock()
            .held
            .entry(txn_id)
            .or_default()
            .insert(key.to_vec());
    }

    /// Release every lock held by `txn_id` and re-evaluate each queue.
    pub fn release_all(&self, txn_id: u64) {
        let released: Vec<(Key, Arc<KeyQueue>)> = {
            let mut tables = self.tables.lock();
            match tables.held.remove(&txn_id) {
                Some(keys) => keys
                    .into_iter()
                    .filter_map(|key| {
                        let queue = tables.queues.get(&key).map(Arc::clone)?;
                        Some((key, queue))
                    })
                    .collect(),
                None => return,
            }
        };

        for (_, queue) in released {
            let mut state = queue.state.lock();
            state.shared.remove(&txn_id);
            if state.exclusive == Some(txn_id) {
                state.exclusive = None;
            }
            state.grant_waiters();
            queue.cond.notify_all();
        }
    }

    /// `true` if `txn_id` holds `key` in any mode.
    pub fn holds(&self, txn_id: u64, key: &[u8]) -> bool {
        self.tables
            .lock()
            .held
            .get(&txn_id)
            .is_some_and(|keys| keys.contains(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_shared_locks_cohold() {
        let mgr = LockManager::new();
        mgr.acquire(1, b"k", LockMode::Shared);
        mgr.acquire(2, b"k", LockMode::Shared);
        assert!(mgr.holds(1, b"k"));
        assert!(mgr.holds(2, b"k"));
        mgr.release_all(1);
        mgr.release_all(2);
    }

    #[test]
    fn test_reacquire_is_idempotent() {
        let mgr = LockManager::new();
        mgr.acquire(1, b"k", LockMode::Exclusive);
        mgr.acquire(1, b"k", LockMode::Exclusive);
        // Reading a key the transaction already writes must not self-block.
        mgr.acquire(1, b"k", LockMode::Shared);
        mgr.release_all(1);
        // Fully released: another writer gets in immediately.
        mgr.acquire(2, b"k", LockMode::Exclusive);
        mgr.release_all(2);
    }

    #[test]
    fn test_exclusive_blocks_until_release() {
        let mgr = Arc::new(LockManager::new());
        mgr.acquire(1, b"k", LockMode::Exclusive);

        let acquired = Arc::new(AtomicUsize::new(0));
        let handle = {
            let mgr = Arc::clone(&mgr);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                mgr.acquire(2, b"k", LockMode::Exclusive);
                acquired.store(1, Ordering::SeqCst);
                mgr.release_all(2);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(acquired.load(Ordering::SeqCst), 0, "waiter ran too early");
        mgr.release_all(1);
        handle.join().unwrap();
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shared_blocks_behind_exclusive() {
        let mgr = Arc::new(LockManager::new());
        mgr.acquire(1, b"k", LockMode::Exclusive);

        let acquired = Arc::new(AtomicUsize::new(0));
        let handle = {
            let mgr = Arc::clone(&mgr);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                mgr.acquire(2, b"k", LockMode::Shared);
                acquired.store(1, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(acquired.load(Ordering::SeqCst), 0);
        mgr.release_all(1);
        handle.join().unwrap();
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_grants_consecutive_shareds() {
        let mgr = Arc::new(LockManager::new());
        mgr.acquire(1, b"k", LockMode::Exclusive);

        let granted = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for txn in 2..5u64 {
            let mgr = Arc::clone(&mgr);
            let granted = Arc::clone(&granted);
            handles.push(thread::spawn(move || {
                mgr.acquire(txn, b"k", LockMode::Shared);
                granted.fetch_add(1, Ordering::SeqCst);
            }));
            // Stagger so the queue order is deterministic.
            thread::sleep(Duration::from_millis(20));
        }

        assert_eq!(granted.load(Ordering::SeqCst), 0);
        mgr.release_all(1);
        for h in handles {
            h.join().unwrap();
        }
        // One release wakes all queued SHAREDs.
        assert_eq!(granted.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exclusive_waits_for_all_shareds() {
        let mgr = Arc::new(LockManager::new());
        mgr.acquire(1, b"k", LockMode::Shared);
        mgr.acquire(2, b"k", LockMode::Shared);

        let acquired = Arc::new(AtomicUsize::new(0));
        let handle = {
            let mgr = Arc::clone(&mgr);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                mgr.acquire(3, b"k", LockMode::Exclusive);
                acquired.store(1, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        mgr.release_all(1);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(
            acquired.load(Ordering::SeqCst),
            0,
            "exclusive granted while a shared holder remains"
        );
        mgr.release_all(2);
        handle.join().unwrap();
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_all_spans_keys() {
        let mgr = LockManager::new();
        mgr.acquire(1, b"a", LockMode::Exclusive);
        mgr.acquire(1, b"b", LockMode::Shared);
        assert!(mgr.holds(1, b"a"));
        assert!(mgr.holds(1, b"b"));
        mgr.release_all(1);
        assert!(!mgr.holds(1, b"a"));
        assert!(!mgr.holds(1, b"b"));
        mgr.acquire(2, b"a", LockMode::Exclusive);
        mgr.acquire(3, b"b", LockMode::Exclusive);
    }

    #[test]
    fn test_no_two_exclusive_holders() {
        // Hammer one key from many writers; at most one inside the
        // critical section at a time.
        let mgr = Arc::new(LockManager::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for txn in 0..8u64 {
            let mgr = Arc::clone(&mgr);
            let inside = Arc::clone(&inside);
            let peak = Arc::clone(&peak);
            handles.push(thread::spawn(move || {
                for _ in 0..20 {
                    mgr.acquire(txn, b"hot", LockMode::Exclusive);
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    inside.fetch_sub(1, Ordering::SeqCst);
                    mgr.release_all(txn);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}

//! ACID transaction manager: strict two-phase locking with deferred writes.
//!
//! Reads take SHARED locks and see the transaction's own buffered writes
//! first; writes and deletes take EXCLUSIVE locks and are buffered in the
//! write set until commit. Commit applies the write set in order through
//! the store, writes the COMMIT record, syncs, and only then releases the
//! locks, so no other transaction observes uncommitted state.
//!
//! Deletes are deferred like writes: a pending-delete entry in the write
//! set, applied at commit. Rolling back therefore undoes deletes too.

use crate::error::{Error, Result};
use crate::hnsw::SearchResult;
use crate::record::{Key, Payload};
use crate::storage::KvStore;
use crate::txn::locks::{LockManager, LockMode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A buffered mutation awaiting commit.
#[derive(Debug, Clone)]
enum WriteOp {
    Put(Payload),
    Delete,
}

/// Terminal states a transaction can reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    Committed,
    Aborted,
}

#[derive(Debug)]
struct Transaction {
    id: u64,
    state: TxnState,
    /// Ordered write set; at most one entry per key (last write wins).
    write_set: Vec<(Key, WriteOp)>,
}

/// Transaction manager over a shared [`KvStore`].
///
/// Worker threads share one long-lived manager by reference; all interior
/// state is behind its own lock.
pub struct TransactionManager {
    store: Arc<KvStore>,
    locks: LockManager,
    txns: Mutex<HashMap<u64, Transaction>>,
    next_id: AtomicU64,
}

impl TransactionManager {
    pub fn new(store: Arc<KvStore>) -> Self {
        Self {
            store,
            locks: LockManager::new(),
            txns: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The store this manager writes through.
    pub fn store(&self) -> &Arc<KvStore> {
        &self.store
    }

    /// Start a transaction and return its id. Ids increase from 1.
    pub fn begin(&self) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.txns.lock().insert(
            id,
            Transaction {
                id,
                state: TxnState::Active,
                write_set: Vec::new(),
            },
        );
        tracing::debug!("txn {} begun", id);
        id
    }

    /// Read `key` under a SHARED lock.
    ///
    /// The transaction's own write set wins over the store: a buffered put
    /// returns its value, a buffered delete reads as not-found.
    pub fn read(&self, txn_id: u64, key: &[u8]) -> Result<Payload> {
        self.ensure_active(txn_id)?;
        self.locks.acquire(txn_id, key, LockMode::Shared);

        {
            let txns = self.txns.lock();
            let txn = txns.get(&txn_id).ok_or(Error::NoSuchTransaction(txn_id))?;
            if let Some((_, op)) = txn.write_set.iter().rev().find(|(k, _)| k == key) {
                return match op {
                    WriteOp::Put(value) => Ok(value.clone()),
                    WriteOp::Delete => Err(Error::NotFound),
                };
            }
        }
        self.store.get(key)
    }

    /// Buffer `key = value` under an EXCLUSIVE lock.
    ///
    /// A later write to the same key by the same transaction replaces the
    /// earlier one.
    pub fn write(&self, txn_id: u64, key: &[u8], value: Payload) -> Result<()> {
        self.ensure_active(txn_id)?;
        if let Payload::Vector(v) = &value {
            let dim = self.store.dimension();
            if v.len() != dim {
                return Err(Error::DimensionMismatch {
                    expected: dim,
                    actual: v.len(),
                });
            }
        }
        self.locks.acquire(txn_id, key, LockMode::Exclusive);

        let mut txns = self.txns.lock();
        let txn = txns
            .get_mut(&txn_id)
            .ok_or(Error::NoSuchTransaction(txn_id))?;
        Self::buffer(txn, key, WriteOp::Put(value));
        Ok(())
    }

    /// Buffer a delete of `key` under an EXCLUSIVE lock.
    ///
    /// Not-found if the key neither exists in the store nor is pending in
    /// this transaction's write set.
    pub fn remove(&self, txn_id: u64, key: &[u8]) -> Result<()> {
        self.ensure_active(txn_id)?;
        self.locks.acquire(txn_id, key, LockMode::Exclusive);

        let mut txns = self.txns.lock();
        let txn = txns
            .get_mut(&txn_id)
            .ok_or(Error::NoSuchTransaction(txn_id))?;
        match txn.write_set.iter().rev().find(|(k, _)| k == key) {
            Some((_, WriteOp::Delete)) => return Err(Error::NotFound),
            Some((_, WriteOp::Put(_))) => {}
            None => {
                if !self.store.exists(key) {
                    return Err(Error::NotFound);
                }
            }
        }
        Self::buffer(txn, key, WriteOp::Delete);
        Ok(())
    }

    /// Apply the write set in order, append the COMMIT record, sync, then
    /// release all locks and erase the transaction.
    ///
    /// If applying the write set fails mid-way no COMMIT record exists, so
    /// recovery rolls the partial application back.
    pub fn commit(&self, txn_id: u64) -> Result<()> {
        let mut txn = self
            .txns
            .lock()
            .remove(&txn_id)
            .ok_or(Error::NoSuchTransaction(txn_id))?;

        let result = self.apply_write_set(&txn);
        match result {
            Ok(()) => {
                txn.state = TxnState::Committed;
                self.locks.release_all(txn_id);
                tracing::debug!("txn {} committed ({} writes)", txn.id, txn.write_set.len());
                Ok(())
            }
            Err(e) => {
                txn.state = TxnState::Aborted;
                self.locks.release_all(txn_id);
                tracing::warn!("txn {} commit failed: {}", txn.id, e);
                Err(e)
            }
        }
    }

    /// Discard the write set, release all locks, and erase the transaction.
    pub fn rollback(&self, txn_id: u64) -> Result<()> {
        let mut txn = self
            .txns
            .lock()
            .remove(&txn_id)
            .ok_or(Error::NoSuchTransaction(txn_id))?;
        txn.state = TxnState::Aborted;
        self.locks.release_all(txn_id);
        tracing::debug!("txn {} rolled back", txn.id);
        Ok(())
    }

    /// Nearest-neighbor search. Read-only; takes no locks.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchResult> {
        self.store.search(query, k)
    }

    fn apply_write_set(&self, txn: &Transaction) -> Result<()> {
        for (key, op) in &txn.write_set {
            match op {
                WriteOp::Put(value) => {
                    self.store.put(txn.id, key, value.clone())?;
                }
                WriteOp::Delete => match self.store.remove(txn.id, key) {
                    // The key was created and deleted inside this
                    // transaction and never reached the store.
                    Err(Error::NotFound) => {}
                    other => other?,
                },
            }
        }
        self.store.commit(txn.id)
    }

    fn ensure_active(&self, txn_id: u64) -> Result<()> {
        let txns = self.txns.lock();
        match txns.get(&txn_id) {
            Some(txn) if txn.state == TxnState::Active => Ok(()),
            _ => Err(Error::NoSuchTransaction(txn_id)),
        }
    }

    /// Last-write-wins upsert into the write set.
    fn buffer(txn: &mut Transaction, key: &[u8], op: WriteOp) {
        if let Some(entry) = txn.write_set.iter_mut().find(|(k, _)| k == key) {
            entry.1 = op;
        } else {
            txn.write_set.push((key.to_vec(), op));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::HnswConfig;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> TransactionManager {
        let store =
            Arc::new(KvStore::open(dir.path().join("txn.log"), 2, HnswConfig::default()).unwrap());
        TransactionManager::new(store)
    }

    fn bytes(s: &str) -> Payload {
        Payload::Bytes(s.as_bytes().to_vec())
    }

    #[test]
    fn test_ids_increase_from_one() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        assert_eq!(mgr.begin(), 1);
        assert_eq!(mgr.begin(), 2);
        assert_eq!(mgr.begin(), 3);
    }

    #[test]
    fn test_commit_makes_writes_visible() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let t1 = mgr.begin();
        mgr.write(t1, b"a", bytes("1")).unwrap();
        mgr.commit(t1).unwrap();

        let t2 = mgr.begin();
        assert_eq!(mgr.read(t2, b"a").unwrap(), bytes("1"));
        mgr.commit(t2).unwrap();
    }

    #[test]
    fn test_rollback_discards_writes() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let t1 = mgr.begin();
        mgr.write(t1, b"b", bytes("2")).unwrap();
        mgr.rollback(t1).unwrap();

        let t2 = mgr.begin();
        assert!(matches!(mgr.read(t2, b"b"), Err(Error::NotFound)));
        mgr.commit(t2).unwrap();
    }

    #[test]
    fn test_read_your_own_writes() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let t1 = mgr.begin();
        mgr.write(t1, b"k", bytes("first")).unwrap();
        assert_eq!(mgr.read(t1, b"k").unwrap(), bytes("first"));
        mgr.write(t1, b"k", bytes("second")).unwrap();
        assert_eq!(mgr.read(t1, b"k").unwrap(), bytes("second"));
        mgr.rollback(t1).unwrap();
    }

    #[test]
    fn test_deferred_delete_reads_as_missing() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let t1 = mgr.begin();
        mgr.write(t1, b"k", bytes("v")).unwrap();
        mgr.commit(t1).unwrap();

        let t2 = mgr.begin();
        mgr.remove(t2, b"k").unwrap();
        assert!(matches!(mgr.read(t2, b"k"), Err(Error::NotFound)));
        // The store still has it until commit.
        assert!(mgr.store().exists(b"k"));
        mgr.commit(t2).unwrap();
        assert!(!mgr.store().exists(b"k"));
    }

    #[test]
    fn test_rollback_undoes_delete() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let t1 = mgr.begin();
        mgr.write(t1, b"k", bytes("v")).unwrap();
        mgr.commit(t1).unwrap();

        let t2 = mgr.begin();
        mgr.remove(t2, b"k").unwrap();
        mgr.rollback(t2).unwrap();

        let t3 = mgr.begin();
        assert_eq!(mgr.read(t3, b"k").unwrap(), bytes("v"));
        mgr.commit(t3).unwrap();
    }

    #[test]
    fn test_remove_missing_key_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let t1 = mgr.begin();
        assert!(matches!(mgr.remove(t1, b"ghost"), Err(Error::NotFound)));
        // Double delete inside one transaction is also not-found.
        mgr.write(t1, b"k", bytes("v")).unwrap();
        mgr.remove(t1, b"k").unwrap();
        assert!(matches!(mgr.remove(t1, b"k"), Err(Error::NotFound)));
        mgr.rollback(t1).unwrap();
    }

    #[test]
    fn test_write_then_delete_never_created_key() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let t1 = mgr.begin();
        mgr.write(t1, b"temp", bytes("x")).unwrap();
        mgr.remove(t1, b"temp").unwrap();
        mgr.commit(t1).unwrap();
        assert!(!mgr.store().exists(b"temp"));
    }

    #[test]
    fn test_unknown_txn_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        assert!(matches!(
            mgr.read(99, b"k"),
            Err(Error::NoSuchTransaction(99))
        ));
        assert!(matches!(
            mgr.write(99, b"k", bytes("v")),
            Err(Error::NoSuchTransaction(99))
        ));
        assert!(matches!(mgr.commit(99), Err(Error::NoSuchTransaction(99))));
        assert!(matches!(mgr.rollback(99), Err(Error::NoSuchTransaction(99))));
    }

    #[test]
    fn test_committed_txn_cannot_be_reused() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let t1 = mgr.begin();
        mgr.write(t1, b"k", bytes("v")).unwrap();
        mgr.commit(t1).unwrap();
        assert!(matches!(
            mgr.write(t1, b"k", bytes("again")),
            Err(Error::NoSuchTransaction(_))
        ));
    }

    #[test]
    fn test_writer_blocks_reader_until_commit() {
        use std::sync::mpsc;
        use std::thread;
        use std::time::Duration;

        let dir = TempDir::new().unwrap();
        let mgr = Arc::new(manager(&dir));

        let t1 = mgr.begin();
        mgr.write(t1, b"c", bytes("1")).unwrap();

        let (tx, rx) = mpsc::channel();
        let reader = {
            let mgr = Arc::clone(&mgr);
            thread::spawn(move || {
                let t2 = mgr.begin();
                let value = mgr.read(t2, b"c").unwrap();
                tx.send(value).unwrap();
                mgr.commit(t2).unwrap();
            })
        };

        // The reader must be blocked while t1 holds EXCLUSIVE.
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        mgr.commit(t1).unwrap();
        let seen = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(seen, bytes("1"));
        reader.join().unwrap();
    }

    #[test]
    fn test_commit_writes_commit_record_last() {
        use crate::record::RecordKind;

        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let t1 = mgr.begin();
        mgr.write(t1, b"x", bytes("1")).unwrap();
        mgr.write(t1, b"y", bytes("2")).unwrap();
        mgr.commit(t1).unwrap();

        let records: Vec<_> = mgr.store().log().iter_all().unwrap().collect();
        let commit_pos = records
            .iter()
            .position(|(_, r)| r.kind == RecordKind::Commit && r.txn_id == t1)
            .expect("commit record present");
        for (i, (_, r)) in records.iter().enumerate() {
            if r.txn_id == t1 && r.kind == RecordKind::Insert {
                assert!(i < commit_pos, "insert after its commit record");
            }
        }
    }

    #[test]
    fn test_vector_write_dimension_checked() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let t1 = mgr.begin();
        assert!(matches!(
            mgr.write(t1, b"v", Payload::Vector(vec![1.0, 2.0, 3.0])),
            Err(Error::DimensionMismatch { .. })
        ));
        mgr.write(t1, b"v", Payload::Vector(vec![1.0, 2.0])).unwrap();
        mgr.commit(t1).unwrap();
    }
}

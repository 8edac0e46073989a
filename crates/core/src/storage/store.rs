//! Key-value store over the append log and HNSW index.
//!
//! The store keeps a `key → latest-offset` map pointing at the most recent
//! INSERT for each live key, the HNSW graph for vector values, and a
//! process-monotonic timestamp clock. All durable state is reconstructible
//! by replaying the log.

use crate::error::{Error, Result};
use crate::hnsw::{HnswConfig, HnswIndex, SearchResult};
use crate::record::{Key, LogRecord, Payload, RecordKind};
use crate::storage::log::AppendLog;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Durable key-value store for byte-string and vector values.
pub struct KvStore {
    log: AppendLog,
    /// Key → offset of its most recent INSERT not followed by a DELETE.
    index: Mutex<HashMap<Key, u64>>,
    hnsw: RwLock<HnswIndex>,
    /// Last issued timestamp; strictly increasing within the process.
    clock: AtomicU64,
}

impl KvStore {
    /// Open the store backed by the log at `path` and recover its state.
    pub fn open<P: AsRef<Path>>(path: P, dimension: usize, config: HnswConfig) -> Result<Self> {
        let store = Self {
            log: AppendLog::open(path)?,
            index: Mutex::new(HashMap::new()),
            hnsw: RwLock::new(HnswIndex::new(dimension, config)),
            clock: AtomicU64::new(0),
        };
        store.recover()?;
        Ok(store)
    }

    /// The underlying append log.
    pub fn log(&self) -> &AppendLog {
        &self.log
    }

    /// Vector dimension of this store.
    pub fn dimension(&self) -> usize {
        self.hnsw.read().dimension()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.index.lock().len()
    }

    /// `true` if no keys are live.
    pub fn is_empty(&self) -> bool {
        self.index.lock().is_empty()
    }

    /// `true` if `key` is live.
    pub fn exists(&self, key: &[u8]) -> bool {
        self.index.lock().contains_key(key)
    }

    /// Write `key = payload`: append an INSERT record, point the index at
    /// it, and update the HNSW graph for vector payloads.
    ///
    /// Returns the record's log offset.
    pub fn put(&self, txn_id: u64, key: &[u8], payload: Payload) -> Result<u64> {
        if key.is_empty() {
            return Err(Error::InvalidInput("empty key".into()));
        }
        if let Payload::Vector(v) = &payload {
            let dim = self.dimension();
            if v.len() != dim {
                return Err(Error::DimensionMismatch {
                    expected: dim,
                    actual: v.len(),
                });
            }
        }

        let mut index = self.index.lock();
        let record = LogRecord::insert(txn_id, key.to_vec(), payload, self.next_timestamp());
        let offset = self.log.append(&record)?;
        index.insert(key.to_vec(), offset);

        let mut hnsw = self.hnsw.write();
        if hnsw.contains(key) {
            // Overwrite: retire the old node so the key re-points cleanly,
            // whether the new payload is a vector or a byte string.
            hnsw.remove(key);
        }
        if let Payload::Vector(v) = &record.payload {
            hnsw.insert(key, v, offset);
        }
        Ok(offset)
    }

    /// Read the current value of `key`.
    ///
    /// Vector values come straight out of the HNSW graph; byte values are
    /// read back from the log record the index points at.
    pub fn get(&self, key: &[u8]) -> Result<Payload> {
        let offset = *self.index.lock().get(key).ok_or(Error::NotFound)?;
        if let Some((vector, _)) = self.hnsw.read().get(key) {
            return Ok(Payload::Vector(vector.to_vec()));
        }
        let record = self.log.read_at(offset)?;
        Ok(record.payload)
    }

    /// Delete `key`: append a DELETE record, drop the index entry, and
    /// tombstone the HNSW node. Absent keys return [`Error::NotFound`]
    /// without touching the log.
    pub fn remove(&self, txn_id: u64, key: &[u8]) -> Result<()> {
        let mut index = self.index.lock();
        if !index.contains_key(key) {
            return Err(Error::NotFound);
        }
        let record = LogRecord::delete(txn_id, key.to_vec(), self.next_timestamp());
        self.log.append(&record)?;
        index.remove(key);
        self.hnsw.write().remove(key);
        Ok(())
    }

    /// Append a COMMIT record for `txn_id` and flush the log.
    pub fn commit(&self, txn_id: u64) -> Result<()> {
        self.log
            .append(&LogRecord::commit(txn_id, self.next_timestamp()))?;
        self.log.sync()
    }

    /// Append a CHECKPOINT marker and flush.
    pub fn checkpoint(&self) -> Result<u64> {
        self.log.checkpoint(self.next_timestamp())
    }

    /// Flush the log's OS buffers.
    pub fn sync(&self) -> Result<()> {
        self.log.sync()
    }

    /// Approximate nearest-neighbor search over vector values.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchResult> {
        self.hnsw.read().search(query, k)
    }

    /// Rebuild in-memory state from the log.
    ///
    /// A first pass collects the transaction ids that reached their COMMIT
    /// record; the second pass replays INSERT and DELETE records of those
    /// transactions only, using the iterator-reported byte offsets. Records
    /// of a transaction cut off before its COMMIT are skipped, so a crash
    /// mid-commit rolls the transaction back.
    pub fn recover(&self) -> Result<()> {
        let committed: HashSet<u64> = self
            .log
            .iter_all()?
            .filter(|(_, r)| r.kind == RecordKind::Commit)
            .map(|(_, r)| r.txn_id)
            .collect();

        {
            let mut index = self.index.lock();
            let mut hnsw = self.hnsw.write();
            let config = hnsw.config().clone();
            let dimension = hnsw.dimension();
            index.clear();
            *hnsw = HnswIndex::new(dimension, config);
        }

        let mut replayed = 0usize;
        let mut skipped = 0usize;
        for (offset, record) in self.log.iter_all()? {
            match record.kind {
                RecordKind::Insert | RecordKind::Delete => {
                    if committed.contains(&record.txn_id) {
                        self.apply(offset, &record);
                        replayed += 1;
                    } else {
                        skipped += 1;
                    }
                }
                RecordKind::Commit | RecordKind::Checkpoint => {}
            }
        }
        if skipped > 0 {
            tracing::warn!("recovery skipped {} records of uncommitted transactions", skipped);
        }
        tracing::info!(
            "recovered {} live keys from {} replayed records",
            self.index.lock().len(),
            replayed
        );
        Ok(())
    }

    /// Append a record received from the replication stream verbatim and
    /// apply its in-memory effects. The record keeps its original
    /// transaction id and timestamp, so the follower's log stays
    /// byte-identical to the leader's.
    pub fn replicate(&self, record: &LogRecord) -> Result<u64> {
        let offset = self.log.append(record)?;
        self.apply(offset, record);
        if record.kind == RecordKind::Commit {
            self.log.sync()?;
        }
        Ok(offset)
    }

    /// In-memory effect of one log record at `offset`.
    fn apply(&self, offset: u64, record: &LogRecord) {
        match record.kind {
            RecordKind::Insert => {
                self.index.lock().insert(record.key.clone(), offset);
                let mut hnsw = self.hnsw.write();
                if hnsw.contains(&record.key) {
                    hnsw.remove(&record.key);
                }
                if let Payload::Vector(v) = &record.payload {
                    hnsw.insert(&record.key, v, offset);
                }
            }
            RecordKind::Delete => {
                self.index.lock().remove(&record.key);
                self.hnsw.write().remove(&record.key);
            }
            RecordKind::Commit | RecordKind::Checkpoint => {}
        }
    }

    /// Next timestamp: wall-clock microseconds, bumped past the previous
    /// issue so values are strictly increasing within the process.
    fn next_timestamp(&self) -> u64 {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        let mut prev = self.clock.load(Ordering::Relaxed);
        loop {
            let next = wall.max(prev + 1);
            match self
                .clock
                .compare_exchange_weak(prev, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(observed) => prev = observed,
            }
        }
    }
}

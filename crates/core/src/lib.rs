//! # simpledb-core
//!
//! Embeddable, durable key-value store whose values are opaque byte
//! strings or dense f32 vectors. Durability comes from an append-only
//! record log, vector search from an HNSW graph, isolation from strict
//! two-phase locking with deferred write sets, and optional per-key
//! replication from a single-decree CAS-Paxos register.
//!
//! This is the engine crate with zero network dependencies — the TCP
//! protocol, the Paxos peer transport, and log shipping live in the
//! server crate and plug in at the seams exported here.

/// Global configuration constants: limits, defaults, and tuning parameters.
pub mod config;
/// Crate-wide error type and `Result` alias.
pub mod error;
/// HNSW approximate nearest neighbor index.
pub mod hnsw;
/// Per-key single-decree CAS-Paxos consensus.
pub mod paxos;
/// Log record types and the on-disk frame codec.
pub mod record;
/// Append log and the key-value store built on it.
pub mod storage;
/// Two-phase locking and the ACID transaction manager.
pub mod txn;

pub use error::{Error, Result};
pub use hnsw::{DistanceMetric, HnswConfig, SearchResult};
pub use record::{Key, LogRecord, Payload, RecordKind};
pub use storage::{AppendLog, KvStore};
pub use txn::TransactionManager;

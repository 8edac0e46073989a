//! Storage layer: the append log and the key-value store built on it.
//!
//! Durability comes from [`AppendLog`]; recency and lookup come from the
//! in-memory offset index and the HNSW graph that [`KvStore`] couples on
//! top of it.

/// Durable append-only framed record log.
pub mod log;
/// Key-value store coupling the log, the HNSW index, and the offset map.
pub mod store;

pub use log::{AppendLog, LogIter};
pub use store::KvStore;

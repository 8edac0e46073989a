//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor index.
//!
//! A multi-layer proximity graph over the store's vectors. Nodes are
//! addressed by store key externally and by dense `u32` internal ids
//! internally; removal tombstones a node without repairing graph edges.
//! Every node also remembers the append-log offset of the record that
//! created it, tying the index back to the durable log.
//!
//! All mutation and search goes through the single lock the owning store
//! wraps the index in; the index itself is plain data.

/// Distance metrics: euclidean and cosine.
pub mod distance;
/// Graph structure, configuration, and node storage.
pub mod graph;
/// Insertion with bidirectional edges and neighbor pruning.
pub mod insert;
/// Single-layer beam search and multi-layer k-NN.
pub mod search;
/// Generation-based visited set for graph traversal.
pub mod visited;

pub use distance::DistanceMetric;
pub use graph::{HnswConfig, HnswIndex};
pub use search::SearchResult;

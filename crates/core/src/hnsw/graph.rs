//! HNSW graph structure and configuration.
//!
//! [`HnswConfig`] carries the tuning parameters (M, ef_construction,
//! ef_search, metric). [`HnswIndex`] stores the graph with a contiguous
//! f32 vector arena and parallel per-node arrays: append-log offset, top
//! layer, tombstone flag, and per-layer neighbor lists.

use crate::config;
use crate::hnsw::distance::DistanceMetric;
use crate::record::Key;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tuning parameters for an HNSW index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Bidirectional links per node on upper layers.
    pub m: usize,
    /// Maximum links per node at layer 0 (typically `2 * m`).
    pub m_max0: usize,
    /// Candidate list size during construction.
    pub ef_construction: usize,
    /// Candidate list size during search (raised to `k` when smaller).
    pub ef_search: usize,
    /// Maximum number of layers in the graph.
    pub max_layers: usize,
    /// Distance function for similarity computation.
    pub metric: DistanceMetric,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: config::HNSW_DEFAULT_M,
            m_max0: config::HNSW_DEFAULT_M * 2,
            ef_construction: config::HNSW_DEFAULT_EF_CONSTRUCTION,
            ef_search: config::HNSW_DEFAULT_EF_SEARCH,
            max_layers: config::HNSW_MAX_LAYERS,
            metric: DistanceMetric::Euclidean,
        }
    }
}

/// Multi-layer navigable-small-world graph over the store's vectors.
///
/// Keys map to dense `u32` internal ids. A removed node is tombstoned in
/// place; its key slot is reused by a later insert of the same key, which
/// allocates a fresh node and re-points the key.
#[derive(Debug)]
pub struct HnswIndex {
    pub(crate) config: HnswConfig,
    dimension: usize,
    /// Internal id → key.
    pub(crate) keys: Vec<Key>,
    /// Key → most recent internal id (live or tombstoned).
    ids: HashMap<Key, u32>,
    /// Contiguous vector arena: `node_count * dimension` values.
    vectors: Vec<f32>,
    /// Originating append-log offset per node.
    offsets: Vec<u64>,
    /// `neighbors[id][layer]`: neighbor ids at that layer.
    pub(crate) neighbors: Vec<Vec<Vec<u32>>>,
    /// Top layer per node.
    pub(crate) layers: Vec<u8>,
    /// Tombstone flags.
    pub(crate) deleted: Vec<bool>,
    pub(crate) entry_point: Option<u32>,
    pub(crate) max_layer: usize,
}

impl HnswIndex {
    /// Create an empty index for vectors of length `dimension`.
    pub fn new(dimension: usize, config: HnswConfig) -> Self {
        Self {
            config,
            dimension,
            keys: Vec::new(),
            ids: HashMap::new(),
            vectors: Vec::new(),
            offsets: Vec::new(),
            neighbors: Vec::new(),
            layers: Vec::new(),
            deleted: Vec::new(),
            entry_point: None,
            max_layer: 0,
        }
    }

    /// Vector dimension this index was created with.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Index configuration.
    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    /// Total nodes ever created, including tombstoned ones.
    pub fn node_count(&self) -> usize {
        self.keys.len()
    }

    /// Number of live (non-tombstoned) nodes.
    pub fn len(&self) -> usize {
        self.deleted.iter().filter(|&&d| !d).count()
    }

    /// `true` if the index holds no live nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Internal id of the live node for `key`, if any.
    pub(crate) fn live_id(&self, key: &[u8]) -> Option<u32> {
        self.ids
            .get(key)
            .copied()
            .filter(|&id| !self.deleted[id as usize])
    }

    /// `true` if `key` has a live node.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.live_id(key).is_some()
    }

    /// Vector slice for an internal id.
    #[inline]
    pub(crate) fn vector(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    /// `true` if the node has been tombstoned.
    #[inline]
    pub(crate) fn is_deleted(&self, id: u32) -> bool {
        self.deleted[id as usize]
    }

    /// Vector and originating log offset for a live key.
    pub fn get(&self, key: &[u8]) -> Option<(&[f32], u64)> {
        let id = self.live_id(key)?;
        Some((self.vector(id), self.offsets[id as usize]))
    }

    /// Tombstone the node for `key`. Graph edges are not repaired.
    ///
    /// Returns `false` if there is no live node for `key`.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        match self.live_id(key) {
            Some(id) => {
                self.deleted[id as usize] = true;
                true
            }
            None => false,
        }
    }

    /// Draw a top layer for a new node: `floor(-ln(r) * mL)` for uniform
    /// `r` in (0, 1], capped at `max_layers - 1`.
    pub(crate) fn random_level(&self) -> usize {
        let r = 1.0 - rand::random::<f64>();
        let level = (-r.ln() * config::HNSW_LEVEL_FACTOR).floor() as usize;
        level.min(self.config.max_layers - 1)
    }

    /// Allocate a node with empty neighbor lists for layers `0..=level`,
    /// re-pointing `key` if it previously referred to a tombstoned node.
    pub(crate) fn push_node(&mut self, key: &[u8], vector: &[f32], offset: u64, level: usize) -> u32 {
        let id = self.keys.len() as u32;
        self.keys.push(key.to_vec());
        self.ids.insert(key.to_vec(), id);
        self.vectors.extend_from_slice(vector);
        self.offsets.push(offset);
        self.neighbors.push(vec![Vec::new(); level + 1]);
        self.layers.push(level as u8);
        self.deleted.push(false);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_index(dim: usize) -> HnswIndex {
        HnswIndex::new(dim, HnswConfig::default())
    }

    #[test]
    fn test_new_index_is_empty() {
        let idx = make_index(4);
        assert!(idx.is_empty());
        assert_eq!(idx.len(), 0);
        assert_eq!(idx.node_count(), 0);
        assert!(idx.entry_point.is_none());
        assert_eq!(idx.dimension(), 4);
    }

    #[test]
    fn test_push_node_and_get() {
        let mut idx = make_index(2);
        let id = idx.push_node(b"a", &[1.0, 2.0], 77, 0);
        assert_eq!(id, 0);
        assert!(idx.contains(b"a"));
        let (vec, offset) = idx.get(b"a").unwrap();
        assert_eq!(vec, &[1.0, 2.0]);
        assert_eq!(offset, 77);
    }

    #[test]
    fn test_remove_tombstones() {
        let mut idx = make_index(2);
        idx.push_node(b"a", &[1.0, 2.0], 0, 0);
        assert!(idx.remove(b"a"));
        assert!(!idx.contains(b"a"));
        assert!(idx.get(b"a").is_none());
        assert_eq!(idx.len(), 0);
        assert_eq!(idx.node_count(), 1);
        // Second remove finds nothing.
        assert!(!idx.remove(b"a"));
        assert!(!idx.remove(b"missing"));
    }

    #[test]
    fn test_reinsert_after_remove_repoints_key() {
        let mut idx = make_index(2);
        idx.push_node(b"a", &[1.0, 0.0], 0, 0);
        idx.remove(b"a");
        idx.push_node(b"a", &[0.0, 1.0], 50, 0);
        let (vec, offset) = idx.get(b"a").unwrap();
        assert_eq!(vec, &[0.0, 1.0]);
        assert_eq!(offset, 50);
        assert_eq!(idx.node_count(), 2);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn test_random_level_respects_cap() {
        let idx = make_index(2);
        for _ in 0..1000 {
            assert!(idx.random_level() < idx.config.max_layers);
        }
    }

    #[test]
    fn test_random_level_mostly_zero() {
        // With mL = 1/ln 2, half of all draws land on layer 0.
        let idx = make_index(2);
        let zeros = (0..1000).filter(|_| idx.random_level() == 0).count();
        assert!(zeros > 300, "layer 0 should dominate, got {zeros}/1000");
    }
}

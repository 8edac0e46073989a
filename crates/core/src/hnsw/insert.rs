//! HNSW insertion: greedy descent, beam search per layer, bidirectional
//! edge wiring, and nearest-M neighbor selection with pruning.

use crate::hnsw::graph::HnswIndex;
use crate::hnsw::search::search_layer;
use crate::hnsw::visited::VisitedSet;

impl HnswIndex {
    /// Insert `key` with its vector and originating log offset.
    ///
    /// A duplicate live key or a vector of the wrong dimension is a silent
    /// no-op. Inserting a key whose previous node was tombstoned allocates
    /// a fresh node and re-points the key.
    pub fn insert(&mut self, key: &[u8], vector: &[f32], offset: u64) {
        if vector.len() != self.dimension() {
            tracing::debug!(
                "hnsw insert skipped: dimension {} != {}",
                vector.len(),
                self.dimension()
            );
            return;
        }
        if self.contains(key) {
            return;
        }

        let level = self.random_level();

        // First node becomes the entry point outright.
        let entry = match self.entry_point {
            Some(ep) => ep,
            None => {
                let id = self.push_node(key, vector, offset, level);
                self.entry_point = Some(id);
                self.max_layer = level;
                return;
            }
        };

        let mut visited = VisitedSet::with_capacity(self.node_count());

        // Phase 1: greedy descent from the top layer to just above the new
        // node's level, keeping the single nearest as the next entry.
        let mut current = entry;
        for layer in (level + 1..=self.max_layer).rev() {
            let found = search_layer(self, vector, current, 1, layer, &mut visited);
            if let Some(&(_, nearest)) = found.first() {
                current = nearest;
            }
        }

        // Phase 2: beam-search each layer the node joins and pick neighbors.
        let top = level.min(self.max_layer);
        let mut planned: Vec<Vec<u32>> = vec![Vec::new(); level + 1];
        for layer in (0..=top).rev() {
            let candidates = search_layer(
                self,
                vector,
                current,
                self.config.ef_construction,
                layer,
                &mut visited,
            );
            let m_max = self.layer_capacity(layer);
            planned[layer] = self.select_nearest(&candidates, m_max);
            if let Some(&(_, nearest)) = candidates.first() {
                current = nearest;
            }
        }

        // Phase 3: materialize the node and wire edges both ways, pruning
        // any neighbor that overflows its layer capacity.
        let id = self.push_node(key, vector, offset, level);
        for (layer, selected) in planned.into_iter().enumerate() {
            let m_max = self.layer_capacity(layer);
            self.neighbors[id as usize][layer] = selected.clone();
            for neighbor in selected {
                let n = neighbor as usize;
                // Candidates surfaced at `layer` always reach that layer.
                if layer >= self.neighbors[n].len() {
                    continue;
                }
                self.neighbors[n][layer].push(id);
                if self.neighbors[n][layer].len() > m_max {
                    self.prune_neighbors(neighbor, layer, m_max);
                }
            }
        }

        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(id);
        }
    }

    fn layer_capacity(&self, layer: usize) -> usize {
        if layer == 0 {
            self.config.m_max0
        } else {
            self.config.m
        }
    }

    /// Nearest-M selection: the `m` candidates closest to the focal vector,
    /// skipping tombstoned entries. Candidates arrive as `(distance, id)`.
    fn select_nearest(&self, candidates: &[(f32, u32)], m: usize) -> Vec<u32> {
        let mut live: Vec<(f32, u32)> = candidates
            .iter()
            .filter(|&&(_, id)| !self.is_deleted(id))
            .copied()
            .collect();
        live.sort_unstable_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        live.truncate(m);
        live.into_iter().map(|(_, id)| id).collect()
    }

    /// Re-run neighbor selection over a node's current edge set at `layer`.
    fn prune_neighbors(&mut self, node: u32, layer: usize, m_max: usize) {
        let metric = self.config.metric;
        let candidates: Vec<(f32, u32)> = self.neighbors[node as usize][layer]
            .iter()
            .map(|&other| (metric.distance(self.vector(node), self.vector(other)), other))
            .collect();
        let pruned = self.select_nearest(&candidates, m_max);
        self.neighbors[node as usize][layer] = pruned;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::graph::HnswConfig;

    fn small_config() -> HnswConfig {
        HnswConfig {
            m: 4,
            m_max0: 8,
            ef_construction: 32,
            ..HnswConfig::default()
        }
    }

    fn grid_index(n: usize) -> HnswIndex {
        let mut idx = HnswIndex::new(2, small_config());
        for i in 0..n {
            let v = [(i % 10) as f32, (i / 10) as f32];
            idx.insert(format!("p{i}").as_bytes(), &v, i as u64);
        }
        idx
    }

    #[test]
    fn test_first_insert_becomes_entry_point() {
        let mut idx = HnswIndex::new(2, small_config());
        idx.insert(b"a", &[1.0, 1.0], 0);
        assert_eq!(idx.entry_point, Some(0));
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn test_duplicate_insert_is_noop() {
        let mut idx = HnswIndex::new(2, small_config());
        idx.insert(b"a", &[1.0, 1.0], 0);
        idx.insert(b"a", &[9.0, 9.0], 100);
        assert_eq!(idx.node_count(), 1);
        let (vec, offset) = idx.get(b"a").unwrap();
        assert_eq!(vec, &[1.0, 1.0]);
        assert_eq!(offset, 0);
    }

    #[test]
    fn test_wrong_dimension_insert_is_noop() {
        let mut idx = HnswIndex::new(2, small_config());
        idx.insert(b"a", &[1.0, 1.0, 1.0], 0);
        idx.insert(b"b", &[], 0);
        assert!(idx.is_empty());
    }

    #[test]
    fn test_edges_are_bidirectional_after_insert() {
        let idx = grid_index(30);
        for node in 0..idx.node_count() as u32 {
            for (layer, neighbors) in idx.neighbors[node as usize].iter().enumerate() {
                for &other in neighbors {
                    // Partner lists may have been pruned, so only require
                    // that the partner exists at this layer.
                    assert!(
                        layer < idx.neighbors[other as usize].len(),
                        "edge ({node}, {other}) at layer {layer} points above the \
                         partner's top layer"
                    );
                }
            }
        }
    }

    #[test]
    fn test_neighbor_level_invariant() {
        // Every edge (n, m) at layer l implies layer(m) >= l.
        let idx = grid_index(60);
        for node in 0..idx.node_count() {
            for (layer, neighbors) in idx.neighbors[node].iter().enumerate() {
                for &other in neighbors {
                    assert!(
                        idx.layers[other as usize] as usize >= layer,
                        "node {node} links to {other} at layer {layer}, but its \
                         top layer is {}",
                        idx.layers[other as usize]
                    );
                }
            }
        }
    }

    #[test]
    fn test_degree_stays_within_capacity() {
        let idx = grid_index(80);
        for node in 0..idx.node_count() {
            for (layer, neighbors) in idx.neighbors[node].iter().enumerate() {
                let cap = if layer == 0 {
                    idx.config.m_max0
                } else {
                    idx.config.m
                };
                assert!(
                    neighbors.len() <= cap,
                    "node {node} has degree {} at layer {layer} (cap {cap})",
                    neighbors.len()
                );
            }
        }
    }

    #[test]
    fn test_entry_point_has_max_layer() {
        let idx = grid_index(100);
        let ep = idx.entry_point.unwrap();
        assert_eq!(idx.layers[ep as usize] as usize, idx.max_layer);
        for node in 0..idx.node_count() {
            assert!(idx.layers[node] as usize <= idx.max_layer);
        }
    }

    #[test]
    fn test_all_live_nodes_reachable() {
        let idx = grid_index(40);
        for i in 0..40 {
            let v = [(i % 10) as f32, (i / 10) as f32];
            let results = idx.search(&v, 1);
            assert_eq!(
                results.first().map(|r| r.key.clone()),
                Some(format!("p{i}").into_bytes()),
                "exact-match probe for p{i} failed"
            );
        }
    }
}

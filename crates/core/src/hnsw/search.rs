//! HNSW search: single-layer beam search and multi-layer k-NN.
//!
//! `search_layer` is the shared best-first primitive: a min-heap of
//! unvisited candidates and a bounded max-heap of the `ef` nearest seen.
//! Tombstoned nodes still participate in navigation but never enter the
//! result set.

use crate::hnsw::graph::HnswIndex;
use crate::hnsw::visited::VisitedSet;
use crate::record::Key;
use ordered_float::OrderedFloat;
use std::collections::BinaryHeap;

/// One k-NN hit: the store key and its distance to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub key: Key,
    pub distance: f32,
}

/// Heap entry ordered so the *closest* candidate pops first.
#[derive(Debug, PartialEq, Eq)]
struct Candidate {
    neg_distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.neg_distance.cmp(&other.neg_distance)
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Result-set entry ordered so the *worst* kept node pops first.
#[derive(Debug, PartialEq, Eq)]
struct Nearest {
    distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for Nearest {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance.cmp(&other.distance)
    }
}

impl PartialOrd for Nearest {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Best-first search of one layer from `entry`.
///
/// Returns up to `ef` live nodes as `(distance, id)` in ascending distance
/// order. `visited` is cleared at the start of the call.
pub(crate) fn search_layer(
    index: &HnswIndex,
    query: &[f32],
    entry: u32,
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
) -> Vec<(f32, u32)> {
    visited.clear();
    visited.grow(index.node_count());

    let metric = index.config.metric;
    let mut candidates: BinaryHeap<Candidate> = BinaryHeap::new();
    let mut nearest: BinaryHeap<Nearest> = BinaryHeap::with_capacity(ef + 1);
    let mut worst = f32::MAX;

    visited.insert(entry);
    let entry_dist = metric.distance(query, index.vector(entry));
    candidates.push(Candidate {
        neg_distance: OrderedFloat(-entry_dist),
        id: entry,
    });
    if !index.is_deleted(entry) {
        nearest.push(Nearest {
            distance: OrderedFloat(entry_dist),
            id: entry,
        });
        if nearest.len() >= ef {
            worst = entry_dist;
        }
    }

    while let Some(candidate) = candidates.pop() {
        let dist = -candidate.neg_distance.0;
        if nearest.len() >= ef && dist > worst {
            break;
        }

        let node = candidate.id as usize;
        if layer >= index.neighbors[node].len() {
            continue;
        }
        for &neighbor in &index.neighbors[node][layer] {
            if !visited.insert(neighbor) {
                continue;
            }
            let d = metric.distance(query, index.vector(neighbor));
            if nearest.len() < ef || d < worst {
                candidates.push(Candidate {
                    neg_distance: OrderedFloat(-d),
                    id: neighbor,
                });
                if !index.is_deleted(neighbor) {
                    nearest.push(Nearest {
                        distance: OrderedFloat(d),
                        id: neighbor,
                    });
                    if nearest.len() > ef {
                        nearest.pop();
                    }
                    worst = nearest.peek().map_or(f32::MAX, |n| n.distance.0);
                }
            }
        }
    }

    nearest
        .into_sorted_vec()
        .into_iter()
        .map(|n| (n.distance.0, n.id))
        .collect()
}

impl HnswIndex {
    /// k-nearest-neighbor search.
    ///
    /// Greedy single-entry descent from the entry point down to layer 1,
    /// then a layer-0 beam of `max(ef_search, k)`. Tombstoned nodes are
    /// filtered from the results. An empty graph, an empty query, or a
    /// query of the wrong dimension returns no results.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchResult> {
        let entry = match self.entry_point {
            Some(ep) => ep,
            None => return Vec::new(),
        };
        if k == 0 || query.len() != self.dimension() {
            return Vec::new();
        }

        let mut visited = VisitedSet::with_capacity(self.node_count());
        let mut current = entry;
        for layer in (1..=self.max_layer).rev() {
            let found = search_layer(self, query, current, 1, layer, &mut visited);
            if let Some(&(_, nearest)) = found.first() {
                current = nearest;
            }
        }

        let ef = self.config.ef_search.max(k);
        search_layer(self, query, current, ef, 0, &mut visited)
            .into_iter()
            .take(k)
            .map(|(distance, id)| SearchResult {
                key: self.keys[id as usize].clone(),
                distance,
            })
            .collect()
    }
}

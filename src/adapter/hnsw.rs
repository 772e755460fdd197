//! HNSW (Hierarchical Navigable Small World) graph over L2 distance.
//!
//! Backs the approximate in-process backend. Nodes are addressed by dense
//! internal indices; the caller's [`VectorId`]s are mapped on insert. Layer
//! assignment uses a seeded RNG, so the same insertion order always builds
//! the same graph.
//!
//! Defaults follow pgvector's HNSW defaults (`m = 16`,
//! `ef_construction = 64`, `ef_search = 40`).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use crate::types::{VectorId, squared_l2};

/// Hard cap on graph height.
const MAX_LEVEL: usize = 16;

/// Configuration for an HNSW graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HnswConfig {
    /// Maximum connections per node on upper layers; layer 0 allows `2 * m`
    pub m: usize,
    /// Size of the dynamic candidate list during construction
    pub ef_construction: usize,
    /// Size of the dynamic candidate list during search
    pub ef_search: usize,
    /// Level normalisation factor, `1 / ln(m)`
    pub m_l: f64,
    /// Seed for level assignment
    pub seed: u64,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self::with_m(16)
    }
}

impl HnswConfig {
    /// Create a config with custom M.
    pub fn with_m(m: usize) -> Self {
        let m = m.max(2);
        Self {
            m,
            ef_construction: 64,
            ef_search: 40,
            m_l: 1.0 / (m as f64).ln(),
            seed: 42,
        }
    }

    /// Set ef_construction.
    pub fn ef_construction(mut self, ef: usize) -> Self {
        self.ef_construction = ef.max(1);
        self
    }

    /// Set ef_search.
    pub fn ef_search(mut self, ef: usize) -> Self {
        self.ef_search = ef.max(1);
        self
    }

    fn max_connections(&self, layer: usize) -> usize {
        if layer == 0 { self.m * 2 } else { self.m }
    }
}

#[derive(Debug, Clone)]
struct Node {
    id: VectorId,
    data: Box<[f32]>,
    /// neighbors[layer] -> adjacent node indices
    neighbors: Vec<Vec<usize>>,
}

impl Node {
    fn level(&self) -> usize {
        self.neighbors.len() - 1
    }
}

/// Search candidate ordered by distance, then index.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    distance: f64,
    index: usize,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.index.cmp(&other.index))
    }
}

/// Single-writer HNSW graph.
pub struct HnswGraph {
    config: HnswConfig,
    nodes: Vec<Node>,
    by_id: HashMap<VectorId, usize>,
    entry_point: Option<usize>,
    rng: StdRng,
}

impl std::fmt::Debug for HnswGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswGraph")
            .field("config", &self.config)
            .field("num_nodes", &self.nodes.len())
            .field("max_level", &self.max_level())
            .field("entry_point", &self.entry_point)
            .finish()
    }
}

impl HnswGraph {
    /// Create an empty graph.
    pub fn new(config: HnswConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            nodes: Vec::new(),
            by_id: HashMap::new(),
            entry_point: None,
        }
    }

    /// Number of vectors in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn max_level(&self) -> usize {
        self.entry_point
            .map(|ep| self.nodes[ep].level())
            .unwrap_or(0)
    }

    fn random_level(&mut self) -> usize {
        // U in (0, 1]
        let u = 1.0 - self.rng.r#gen::<f64>();
        ((-u.ln() * self.config.m_l).floor() as usize).min(MAX_LEVEL)
    }

    fn distance_to(&self, index: usize, query: &[f32]) -> f64 {
        squared_l2(&self.nodes[index].data, query)
    }

    /// Insert a vector. Re-inserting an id replaces its data in place and
    /// keeps its existing links.
    pub fn insert(&mut self, id: VectorId, data: &[f32]) {
        if let Some(&existing) = self.by_id.get(&id) {
            self.nodes[existing].data = data.into();
            return;
        }

        let level = self.random_level();
        let index = self.nodes.len();
        self.nodes.push(Node {
            id,
            data: data.into(),
            neighbors: vec![Vec::new(); level + 1],
        });
        self.by_id.insert(id, index);

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(index);
            return;
        };

        let top = self.max_level();
        let mut current = entry;

        // Greedy descent through layers above the new node's level
        for layer in ((level + 1)..=top).rev() {
            current = self.greedy_closest(current, data, layer);
        }

        for layer in (0..=level.min(top)).rev() {
            let found = self.search_layer(current, data, self.config.ef_construction, layer);
            let selected: Vec<usize> = found
                .iter()
                .filter(|c| c.index != index)
                .take(self.config.m)
                .map(|c| c.index)
                .collect();

            for &neighbor in &selected {
                self.nodes[neighbor].neighbors[layer].push(index);
                self.prune_connections(neighbor, layer);
            }
            self.nodes[index].neighbors[layer] = selected;

            if let Some(best) = found.first() {
                current = best.index;
            }
        }

        if level > top {
            self.entry_point = Some(index);
        }
    }

    /// Keep only the closest `max_connections(layer)` links of `node`.
    fn prune_connections(&mut self, node: usize, layer: usize) {
        let max_connections = self.config.max_connections(layer);
        if self.nodes[node].neighbors[layer].len() <= max_connections {
            return;
        }

        let mut scored: Vec<Candidate> = self.nodes[node].neighbors[layer]
            .iter()
            .map(|&n| Candidate {
                distance: squared_l2(&self.nodes[node].data, &self.nodes[n].data),
                index: n,
            })
            .collect();
        scored.sort();
        scored.truncate(max_connections);
        self.nodes[node].neighbors[layer] = scored.into_iter().map(|c| c.index).collect();
    }

    fn greedy_closest(&self, start: usize, query: &[f32], layer: usize) -> usize {
        let mut current = start;
        let mut current_dist = self.distance_to(current, query);
        loop {
            let mut improved = false;
            for &neighbor in &self.nodes[current].neighbors[layer] {
                let dist = self.distance_to(neighbor, query);
                if dist < current_dist {
                    current = neighbor;
                    current_dist = dist;
                    improved = true;
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Beam search on one layer. Returns up to `ef` candidates, nearest first.
    fn search_layer(&self, entry: usize, query: &[f32], ef: usize, layer: usize) -> Vec<Candidate> {
        let mut visited = vec![false; self.nodes.len()];
        let start = Candidate {
            distance: self.distance_to(entry, query),
            index: entry,
        };
        visited[entry] = true;

        let mut candidates = BinaryHeap::new();
        let mut best = BinaryHeap::new();
        candidates.push(Reverse(start));
        best.push(start);

        while let Some(Reverse(current)) = candidates.pop() {
            let worst = best.peek().map(|c: &Candidate| c.distance).unwrap_or(f64::MAX);
            if current.distance > worst && best.len() >= ef {
                break;
            }

            for &neighbor in &self.nodes[current.index].neighbors[layer] {
                if visited[neighbor] {
                    continue;
                }
                visited[neighbor] = true;

                let distance = self.distance_to(neighbor, query);
                let worst = best.peek().map(|c| c.distance).unwrap_or(f64::MAX);
                if best.len() < ef || distance < worst {
                    let candidate = Candidate {
                        distance,
                        index: neighbor,
                    };
                    candidates.push(Reverse(candidate));
                    best.push(candidate);
                    if best.len() > ef {
                        best.pop();
                    }
                }
            }
        }

        best.into_sorted_vec()
    }

    /// Approximate `k` nearest ids, nearest first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<VectorId> {
        let Some(entry) = self.entry_point else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }

        let mut current = entry;
        for layer in (1..=self.max_level()).rev() {
            current = self.greedy_closest(current, query, layer);
        }

        self.search_layer(current, query, self.config.ef_search.max(k), 0)
            .into_iter()
            .take(k)
            .map(|c| self.nodes[c.index].id)
            .collect()
    }
}

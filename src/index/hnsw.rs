//! Hierarchical navigable small-world graph.
//!
//! Nodes live in a slot vector; removed slots are recycled through a free list so
//! neighbor lists can refer to nodes by `u32` slot. Ties in distance are ordered by
//! slot inside the graph and by id in returned results, so the same data and the same
//! insert order always produce the same answers.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::config::IndexConfig;
use crate::error::{Result, VectorError};
use crate::simd::Kernel;

/// Upper bound on sampled levels.
pub const MAX_LEVEL: usize = 16;

#[derive(Debug, Clone)]
struct Node {
    id: String,
    vector: Vec<f32>,
    /// `links[layer]`; the node's level is `links.len() - 1`.
    links: Vec<Vec<u32>>,
}

impl Node {
    fn level(&self) -> usize {
        self.links.len().saturating_sub(1)
    }
}

#[derive(Debug, Clone, Copy)]
struct Scored {
    distance: f32,
    slot: u32,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.slot.cmp(&other.slot))
    }
}

/// One live node in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub slot: u32,
    pub id: String,
    pub vector: Vec<f32>,
    pub links: Vec<Vec<u32>>,
}

/// Complete graph state, independent of any storage format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HnswSnapshot {
    pub config: IndexConfig,
    pub entry_point: Option<u32>,
    pub max_level: usize,
    pub nodes: Vec<SnapshotNode>,
}

#[derive(Debug)]
pub struct HnswIndex {
    config: IndexConfig,
    kernel: Kernel,
    nodes: Vec<Option<Node>>,
    free: Vec<u32>,
    slots: HashMap<String, u32>,
    entry_point: Option<u32>,
    max_level: usize,
    rng: StdRng,
}

impl HnswIndex {
    pub fn new(config: IndexConfig, kernel: Kernel) -> Result<Self> {
        config.validate()?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            kernel,
            nodes: Vec::new(),
            free: Vec::new(),
            slots: HashMap::new(),
            entry_point: None,
            max_level: 0,
            rng,
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&[f32]> {
        let slot = *self.slots.get(id)?;
        self.node(slot).map(|n| n.vector.as_slice())
    }

    /// Live `(id, vector)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.nodes
            .iter()
            .flatten()
            .map(|n| (n.id.as_str(), n.vector.as_slice()))
    }

    /// Approximate heap footprint in bytes.
    pub fn memory_usage(&self) -> usize {
        self.nodes
            .iter()
            .flatten()
            .map(|n| {
                n.vector.len() * 4
                    + n.id.len()
                    + n.links.iter().map(|l| l.len() * 4 + 24).sum::<usize>()
                    + std::mem::size_of::<Node>()
            })
            .sum::<usize>()
            + self.slots.len() * (std::mem::size_of::<String>() + 4)
    }

    // ── Mutation ─────────────────────────────────────────────────────────

    /// Insert or overwrite `id`.
    pub fn insert(&mut self, id: &str, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.config.dimension {
            return Err(VectorError::dimension(
                self.config.dimension,
                vector.len(),
                Some(id),
            ));
        }
        if self.contains(id) {
            self.remove(id);
        } else if self.len() >= self.config.max_elements {
            return Err(VectorError::CapacityExhausted {
                capacity: self.config.max_elements,
            });
        }

        let level = self.sample_level();
        let slot = self.allocate(Node {
            id: id.to_string(),
            vector,
            links: vec![Vec::new(); level + 1],
        });
        self.slots.insert(id.to_string(), slot);

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(slot);
            self.max_level = level;
            return Ok(());
        };

        let query = self.vector_of(slot).to_vec();
        let mut nearest = vec![self.score(&query, entry)];
        for layer in (level + 1..=self.max_level).rev() {
            nearest = self.search_layer(&query, &nearest, 1, layer);
        }

        for layer in (0..=level.min(self.max_level)).rev() {
            let candidates = self.search_layer(&query, &nearest, self.config.ef_construction, layer);
            let chosen: Vec<u32> = candidates
                .iter()
                .filter(|c| c.slot != slot)
                .take(self.config.m)
                .map(|c| c.slot)
                .collect();
            for &neighbor in &chosen {
                self.link(neighbor, slot, layer);
            }
            if let Some(node) = self.nodes[slot as usize].as_mut() {
                node.links[layer] = chosen;
            }
            nearest = candidates;
        }

        if level > self.max_level {
            self.entry_point = Some(slot);
            self.max_level = level;
        }
        Ok(())
    }

    /// Remove `id` and repair the edges it leaves behind. Returns `false` when the
    /// id was not present.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(slot) = self.slots.remove(id) else {
            return false;
        };
        let Some(removed) = self.nodes[slot as usize].take() else {
            return false;
        };
        self.free.push(slot);

        // Links are not symmetric after pruning, so scan every node.
        let mut orphaned: Vec<(u32, usize)> = Vec::new();
        for (other, node) in self.nodes.iter_mut().enumerate() {
            let Some(node) = node else { continue };
            for (layer, links) in node.links.iter_mut().enumerate() {
                let before = links.len();
                links.retain(|&s| s != slot);
                if links.len() < before {
                    orphaned.push((other as u32, layer));
                }
            }
        }

        if self.entry_point == Some(slot) {
            self.promote_entry_point();
        }

        for (node, layer) in orphaned {
            self.repair(node, layer, &removed.links);
        }
        true
    }

    // ── Search ───────────────────────────────────────────────────────────

    /// Up to `k` `(id, distance)` pairs, nearest first, ties by smaller id.
    pub fn search(&self, query: &[f32], k: usize, ef: Option<usize>) -> Result<Vec<(String, f32)>> {
        if query.len() != self.config.dimension {
            return Err(VectorError::dimension(self.config.dimension, query.len(), None));
        }
        let Some(entry) = self.entry_point else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut nearest = vec![self.score(query, entry)];
        for layer in (1..=self.max_level).rev() {
            nearest = self.search_layer(query, &nearest, 1, layer);
        }
        let ef = ef.unwrap_or(self.config.ef_search).max(k);
        let found = self.search_layer(query, &nearest, ef, 0);

        let mut results: Vec<(String, f32)> = found
            .into_iter()
            .filter_map(|c| self.node(c.slot).map(|n| (n.id.clone(), c.distance)))
            .collect();
        results.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        results.truncate(k);
        Ok(results)
    }

    /// Exact distance from `query` to the stored vector for `id`.
    pub fn distance_to(&self, query: &[f32], id: &str) -> Option<f32> {
        self.get(id)
            .map(|v| self.kernel.distance(self.config.metric, query, v))
    }

    // ── Snapshot ─────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> HnswSnapshot {
        let nodes = self
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(slot, n)| {
                n.as_ref().map(|n| SnapshotNode {
                    slot: slot as u32,
                    id: n.id.clone(),
                    vector: n.vector.clone(),
                    links: n.links.clone(),
                })
            })
            .collect();
        HnswSnapshot {
            config: self.config.clone(),
            entry_point: self.entry_point,
            max_level: self.max_level,
            nodes,
        }
    }

    pub fn restore(snapshot: HnswSnapshot, kernel: Kernel) -> Result<Self> {
        let mut index = Self::new(snapshot.config, kernel)?;
        let size = snapshot
            .nodes
            .iter()
            .map(|n| n.slot as usize + 1)
            .max()
            .unwrap_or(0);
        index.nodes = vec![None; size];

        for node in snapshot.nodes {
            if node.vector.len() != index.config.dimension {
                return Err(VectorError::dimension(
                    index.config.dimension,
                    node.vector.len(),
                    Some(&node.id),
                ));
            }
            if node.links.iter().flatten().any(|&s| s as usize >= size) {
                return Err(VectorError::InvalidInput(format!(
                    "snapshot node {} links past the end of the graph",
                    node.id
                )));
            }
            index.slots.insert(node.id.clone(), node.slot);
            index.nodes[node.slot as usize] = Some(Node {
                id: node.id,
                vector: node.vector,
                links: node.links,
            });
        }
        index.free = (0..size as u32)
            .rev()
            .filter(|&s| index.nodes[s as usize].is_none())
            .collect();
        index.entry_point = snapshot.entry_point.filter(|&s| index.node(s).is_some());
        index.max_level = snapshot.max_level;
        if index.entry_point.is_none() && !index.is_empty() {
            index.promote_entry_point();
        }
        index.rng = StdRng::seed_from_u64(index.config.seed);
        Ok(index)
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn node(&self, slot: u32) -> Option<&Node> {
        self.nodes.get(slot as usize).and_then(Option::as_ref)
    }

    fn vector_of(&self, slot: u32) -> &[f32] {
        self.node(slot).map(|n| n.vector.as_slice()).unwrap_or(&[])
    }

    fn neighbors(&self, slot: u32, layer: usize) -> &[u32] {
        self.node(slot)
            .and_then(|n| n.links.get(layer))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn score(&self, query: &[f32], slot: u32) -> Scored {
        let distance = match self.node(slot) {
            Some(n) => self.kernel.distance(self.config.metric, query, &n.vector),
            None => f32::INFINITY,
        };
        Scored { distance, slot }
    }

    fn capacity(&self, layer: usize) -> usize {
        if layer == 0 {
            self.config.m * 2
        } else {
            self.config.m
        }
    }

    /// `floor(-ln(U) / ln(m))`, capped at [`MAX_LEVEL`].
    fn sample_level(&mut self) -> usize {
        let u: f64 = self.rng.gen_range(f64::MIN_POSITIVE..1.0);
        let level = (-u.ln() / (self.config.m as f64).ln()).floor();
        (level as usize).min(MAX_LEVEL)
    }

    fn allocate(&mut self, node: Node) -> u32 {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot as usize] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                (self.nodes.len() - 1) as u32
            }
        }
    }

    /// Beam search within one layer; returns at most `ef` candidates, nearest first.
    fn search_layer(&self, query: &[f32], entries: &[Scored], ef: usize, layer: usize) -> Vec<Scored> {
        let mut visited: HashSet<u32> = entries.iter().map(|c| c.slot).collect();
        let mut frontier: BinaryHeap<Reverse<Scored>> = entries.iter().copied().map(Reverse).collect();
        let mut best: BinaryHeap<Scored> = entries.iter().copied().collect();
        while best.len() > ef {
            best.pop();
        }

        while let Some(Reverse(current)) = frontier.pop() {
            if let Some(worst) = best.peek() {
                if best.len() >= ef && current.distance > worst.distance {
                    break;
                }
            }
            for &next in self.neighbors(current.slot, layer) {
                if !visited.insert(next) {
                    continue;
                }
                let candidate = self.score(query, next);
                let admit = best.len() < ef || best.peek().is_some_and(|w| candidate < *w);
                if admit {
                    frontier.push(Reverse(candidate));
                    best.push(candidate);
                    if best.len() > ef {
                        best.pop();
                    }
                }
            }
        }
        best.into_sorted_vec()
    }

    /// Add `to` to `from`'s links at `layer`, pruning to the closest `capacity`.
    fn link(&mut self, from: u32, to: u32, layer: usize) {
        let mut links = self.neighbors(from, layer).to_vec();
        if links.contains(&to) || from == to {
            return;
        }
        links.push(to);
        let cap = self.capacity(layer);
        if links.len() > cap {
            let base = self.vector_of(from);
            let mut scored: Vec<Scored> = links.iter().map(|&s| self.score(base, s)).collect();
            scored.sort();
            links = scored.into_iter().take(cap).map(|c| c.slot).collect();
        }
        if let Some(node) = self.nodes[from as usize].as_mut() {
            if let Some(slot_links) = node.links.get_mut(layer) {
                *slot_links = links;
            }
        }
    }

    /// Refill the link `node` lost at `layer` by searching around its surviving
    /// neighbors and the removed node's former neighbors.
    fn repair(&mut self, node: u32, layer: usize, removed_links: &[Vec<u32>]) {
        let Some(current) = self.node(node) else { return };
        let existing: HashSet<u32> = current.links.get(layer).into_iter().flatten().copied().collect();

        let mut seeds: Vec<u32> = existing.iter().copied().collect();
        seeds.extend(
            removed_links
                .get(layer)
                .into_iter()
                .flatten()
                .copied()
                .filter(|&s| s != node && self.node(s).is_some()),
        );
        if seeds.is_empty() {
            match self.entry_point {
                Some(entry) if entry != node => seeds.push(entry),
                _ => return,
            }
        }
        seeds.sort_unstable();
        seeds.dedup();

        let query = self.vector_of(node).to_vec();
        let entries: Vec<Scored> = seeds.iter().map(|&s| self.score(&query, s)).collect();
        let found = self.search_layer(&query, &entries, self.config.ef_construction, layer);
        let replacement = found
            .into_iter()
            .find(|c| c.slot != node && !existing.contains(&c.slot) && self.has_layer(c.slot, layer));
        if let Some(c) = replacement {
            self.link(node, c.slot, layer);
            self.link(c.slot, node, layer);
        }
    }

    fn has_layer(&self, slot: u32, layer: usize) -> bool {
        self.node(slot).is_some_and(|n| n.level() >= layer)
    }

    /// Entry point moves to the highest-level survivor, lowest slot on ties.
    fn promote_entry_point(&mut self) {
        let top = self
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(slot, n)| n.as_ref().map(|n| (slot as u32, n.level())))
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)));
        match top {
            Some((slot, level)) => {
                self.entry_point = Some(slot);
                self.max_level = level;
            }
            None => {
                self.entry_point = None;
                self.max_level = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Metric;

    fn unit(seed: u64, dim: usize) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
        crate::simd::normalized(&v)
    }

    fn index(dim: usize) -> HnswIndex {
        HnswIndex::new(
            IndexConfig {
                dimension: dim,
                ef_construction: 64,
                ef_search: 64,
                m: 8,
                ..IndexConfig::default()
            },
            Kernel::scalar(),
        )
        .unwrap()
    }

    #[test]
    fn finds_exact_vector_first() {
        let mut idx = index(16);
        for i in 0..200u64 {
            idx.insert(&format!("v{i}"), unit(i, 16)).unwrap();
        }
        let hits = idx.search(&unit(77, 16), 3, None).unwrap();
        assert_eq!(hits[0].0, "v77");
        assert!(hits[0].1.abs() < 1e-5);
        assert!(hits.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn overwrite_keeps_count() {
        let mut idx = index(4);
        idx.insert("a", vec![1.0, 0.0, 0.0, 0.0]).unwrap();
        idx.insert("a", vec![0.0, 1.0, 0.0, 0.0]).unwrap();
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.get("a").unwrap(), &[0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn ties_break_on_smaller_id() {
        let mut idx = index(2);
        idx.insert("b", vec![1.0, 0.0]).unwrap();
        idx.insert("a", vec![1.0, 0.0]).unwrap();
        idx.insert("c", vec![0.0, 1.0]).unwrap();
        let hits = idx.search(&[1.0, 0.0], 2, None).unwrap();
        assert_eq!(hits[0].0, "a");
        assert_eq!(hits[1].0, "b");
    }

    #[test]
    fn capacity_is_enforced_for_new_ids_only() {
        let mut idx = HnswIndex::new(
            IndexConfig {
                dimension: 2,
                max_elements: 2,
                ..IndexConfig::default()
            },
            Kernel::scalar(),
        )
        .unwrap();
        idx.insert("a", vec![1.0, 0.0]).unwrap();
        idx.insert("b", vec![0.0, 1.0]).unwrap();
        assert!(matches!(
            idx.insert("c", vec![1.0, 1.0]),
            Err(VectorError::CapacityExhausted { capacity: 2 })
        ));
        idx.insert("a", vec![0.5, 0.5]).unwrap();
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn delete_repairs_graph_and_keeps_recall() {
        let mut idx = index(16);
        for i in 0..300u64 {
            idx.insert(&format!("v{i}"), unit(i, 16)).unwrap();
        }
        for i in (0..300u64).step_by(3) {
            assert!(idx.remove(&format!("v{i}")));
        }
        assert!(!idx.remove("v0"));
        assert_eq!(idx.len(), 200);

        // No dangling links to freed slots.
        for node in idx.nodes.iter().flatten() {
            for &s in node.links.iter().flatten() {
                assert!(idx.node(s).is_some());
            }
        }
        for i in (1..300u64).filter(|i| i % 3 != 0).take(50) {
            let hits = idx.search(&unit(i, 16), 1, None).unwrap();
            assert_eq!(hits[0].0, format!("v{i}"));
        }
    }

    #[test]
    fn removing_everything_empties_the_graph() {
        let mut idx = index(4);
        for i in 0..10u64 {
            idx.insert(&i.to_string(), unit(i, 4)).unwrap();
        }
        for i in 0..10u64 {
            idx.remove(&i.to_string());
        }
        assert!(idx.is_empty());
        assert!(idx.entry_point.is_none());
        assert!(idx.search(&unit(1, 4), 5, None).unwrap().is_empty());

        idx.insert("again", unit(99, 4)).unwrap();
        assert_eq!(idx.search(&unit(99, 4), 1, None).unwrap()[0].0, "again");
    }

    #[test]
    fn same_seed_builds_same_graph() {
        let build = || {
            let mut idx = index(8);
            for i in 0..100u64 {
                idx.insert(&format!("v{i}"), unit(i, 8)).unwrap();
            }
            idx
        };
        let (a, b) = (build(), build());
        assert_eq!(a.snapshot(), b.snapshot());
        let q = unit(1234, 8);
        assert_eq!(a.search(&q, 10, None).unwrap(), b.search(&q, 10, None).unwrap());
    }

    #[test]
    fn snapshot_restores_identical_results() {
        let mut idx = index(8);
        for i in 0..50u64 {
            idx.insert(&format!("v{i}"), unit(i, 8)).unwrap();
        }
        idx.remove("v10");
        let restored = HnswIndex::restore(idx.snapshot(), Kernel::scalar()).unwrap();
        assert_eq!(restored.len(), 49);
        let q = unit(5, 8);
        assert_eq!(idx.search(&q, 5, None).unwrap(), restored.search(&q, 5, None).unwrap());
    }

    #[test]
    fn restore_restarts_level_sampling_from_configured_seed() {
        let mut idx = index(8);
        for i in 0..20u64 {
            idx.insert(&format!("v{i}"), unit(i, 8)).unwrap();
        }
        let mut restored = HnswIndex::restore(idx.snapshot(), Kernel::scalar()).unwrap();
        let mut fresh = StdRng::seed_from_u64(restored.config().seed);
        let draws: Vec<u64> = (0..4).map(|_| restored.rng.gen()).collect();
        let expected: Vec<u64> = (0..4).map(|_| fresh.gen()).collect();
        assert_eq!(draws, expected);
    }

    #[test]
    fn euclidean_metric_distances() {
        let mut idx = HnswIndex::new(
            IndexConfig {
                dimension: 2,
                metric: Metric::Euclidean,
                ..IndexConfig::default()
            },
            Kernel::scalar(),
        )
        .unwrap();
        idx.insert("far", vec![3.0, 4.0]).unwrap();
        let hits = idx.search(&[0.0, 0.0], 1, None).unwrap();
        assert!((hits[0].1 - 5.0).abs() < 1e-6);
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let mut idx = index(4);
        let err = idx.insert("x", vec![1.0; 3]).unwrap_err();
        assert!(matches!(
            err,
            VectorError::DimensionMismatch { expected: 4, actual: 3, .. }
        ));
        assert!(idx.search(&[1.0; 5], 1, None).is_err());
    }
}

//! Exact-match query result cache.
//!
//! Keys cover everything that changes a result set: the query bytes, `k`, metric,
//! threshold, metadata filter, search strategy and whether attention ran. Entries
//! are evicted oldest-first once `capacity` is reached, and the whole cache is
//! dropped on every admitted mutation and on quantizer retrain.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::types::{Metric, SearchOptions, SearchResult, SearchStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    pub fn new(
        query: &[f32],
        k: usize,
        metric: Metric,
        options: &SearchOptions,
        attention: bool,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(query.len() as u64).to_le_bytes());
        for x in query {
            hasher.update(&x.to_le_bytes());
        }
        hasher.update(&(k as u64).to_le_bytes());
        hasher.update(metric.as_str().as_bytes());
        match options.threshold {
            Some(t) => {
                hasher.update(&[1]);
                hasher.update(&t.to_le_bytes());
            }
            None => {
                hasher.update(&[0]);
            }
        }
        match options.filter.as_ref().filter(|f| !f.is_empty()) {
            Some(filter) => {
                let sorted: BTreeMap<_, _> = filter.iter().collect();
                let json = serde_json::to_string(&sorted).unwrap_or_default();
                hasher.update(&[1]);
                hasher.update(&(json.len() as u64).to_le_bytes());
                hasher.update(json.as_bytes());
            }
            None => {
                hasher.update(&[0]);
            }
        }
        match options.strategy {
            SearchStrategy::Graph => hasher.update(b"graph"),
            SearchStrategy::QuantizedScan { rerank } => {
                hasher.update(b"scan");
                hasher.update(&(rerank as u64).to_le_bytes())
            }
        };
        hasher.update(&(options.ef_search.unwrap_or(0) as u64).to_le_bytes());
        hasher.update(&[attention as u8]);
        Self(*hasher.finalize().as_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
pub struct QueryCache {
    entries: HashMap<CacheKey, Vec<SearchResult>>,
    order: VecDeque<CacheKey>,
    capacity: usize,
    stats: CacheStats,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
            stats: CacheStats {
                capacity,
                ..CacheStats::default()
            },
        }
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<Vec<SearchResult>> {
        match self.entries.get(key) {
            Some(results) => {
                self.stats.hits += 1;
                Some(results.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: CacheKey, results: Vec<SearchResult>) {
        if self.entries.insert(key, results).is_some() {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                self.stats.evictions += 1;
            }
        }
    }

    pub fn invalidate_all(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.order.clear();
        }
        self.stats.invalidations += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            ..self.stats
        }
    }
}

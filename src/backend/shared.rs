//! State and query pipeline common to both backends.

use crate::config::IndexConfig;
use crate::error::{Result, VectorError};
use crate::index::HnswIndex;
use crate::simd::Kernel;
use crate::types::{SearchOptions, SearchResult, VectorRecord};

use super::metadata::MetadataStore;
use super::{BackendKind, BackendStats};

/// Graph plus metadata for one initialized backend.
#[derive(Debug)]
pub(crate) struct IndexCore {
    pub(crate) index: HnswIndex,
    pub(crate) metadata: MetadataStore,
}

impl IndexCore {
    pub(crate) fn new(config: &IndexConfig, kernel: Kernel) -> Result<Self> {
        Ok(Self {
            index: HnswIndex::new(config.clone(), kernel)?,
            metadata: MetadataStore::new(),
        })
    }

    pub(crate) fn dimension(&self) -> usize {
        self.index.config().dimension
    }

    pub(crate) fn check_dimension(&self, embedding: &[f32], id: Option<&str>) -> Result<()> {
        let expected = self.dimension();
        if embedding.len() != expected {
            return Err(VectorError::dimension(expected, embedding.len(), id));
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, record: VectorRecord) -> Result<()> {
        self.check_dimension(&record.embedding, Some(&record.id))?;
        self.index.insert(&record.id, record.embedding)?;
        self.metadata.set(&record.id, record.metadata);
        Ok(())
    }

    /// Validate dimensions and the capacity budget for the whole batch before the
    /// first write.
    pub(crate) fn check_batch(&self, records: &[VectorRecord]) -> Result<()> {
        for r in records {
            self.check_dimension(&r.embedding, Some(&r.id))?;
        }
        let mut fresh: Vec<&str> = records
            .iter()
            .map(|r| r.id.as_str())
            .filter(|id| !self.index.contains(id))
            .collect();
        fresh.sort_unstable();
        fresh.dedup();
        let capacity = self.index.config().max_elements;
        if self.index.len() + fresh.len() > capacity {
            return Err(VectorError::CapacityExhausted { capacity });
        }
        Ok(())
    }

    pub(crate) fn remove(&mut self, id: &str) -> bool {
        self.metadata.remove(id);
        self.index.remove(id)
    }

    pub(crate) fn get_vector(&self, id: &str) -> Option<VectorRecord> {
        self.index.get(id).map(|v| VectorRecord {
            id: id.to_string(),
            embedding: v.to_vec(),
            metadata: self.metadata.get(id).cloned(),
        })
    }

    /// Candidates to pull from the graph so filtering does not starve `k`.
    pub(crate) fn fetch_size(&self, k: usize, options: &SearchOptions) -> usize {
        if options.narrows_results() {
            let ef = options.ef_search.unwrap_or(self.index.config().ef_search);
            k.saturating_mul(8).max(ef)
        } else {
            k
        }
    }

    /// Graph traversal → threshold → metadata filter.
    pub(crate) fn search(
        &self,
        query: &[f32],
        k: usize,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        self.check_dimension(query, None)?;
        let hits = self
            .index
            .search(query, self.fetch_size(k, options), options.ef_search)?;
        Ok(self.finish(hits, k, options))
    }

    /// Turn `(id, distance)` pairs, nearest first, into at most `k` results.
    pub(crate) fn finish(
        &self,
        hits: Vec<(String, f32)>,
        k: usize,
        options: &SearchOptions,
    ) -> Vec<SearchResult> {
        let metric = self.index.config().metric;
        hits.into_iter()
            .map(|(id, distance)| SearchResult::new(id, distance, metric))
            .filter(|r| options.threshold.map_or(true, |t| r.similarity >= t))
            .filter(|r| {
                options
                    .filter
                    .as_ref()
                    .map_or(true, |f| self.metadata.matches(&r.id, f))
            })
            .take(k)
            .map(|mut r| {
                r.metadata = self.metadata.get(&r.id).cloned();
                r
            })
            .collect()
    }

    pub(crate) fn stats(&self, backend: BackendKind) -> BackendStats {
        let config = self.index.config();
        BackendStats {
            backend,
            count: self.index.len(),
            dimension: config.dimension,
            metric: config.metric,
            memory_usage: self.index.memory_usage() + self.metadata.len() * 64,
        }
    }

    /// A loaded index must have the shape this instance was configured with.
    pub(crate) fn check_loaded_shape(&self, expected: Option<&IndexConfig>) -> Result<()> {
        let Some(expected) = expected else {
            return Ok(());
        };
        let loaded = self.index.config();
        if loaded.dimension != expected.dimension {
            return Err(VectorError::dimension(expected.dimension, loaded.dimension, None));
        }
        if loaded.metric != expected.metric {
            return Err(VectorError::InvalidInput(format!(
                "stored index uses {} but {} is configured",
                loaded.metric, expected.metric
            )));
        }
        Ok(())
    }
}

//! SIMD backend with optional quantized candidate scan.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::metadata::MetadataStore;
use super::shared::IndexCore;
use super::{BackendKind, BackendStats, TrainOutcome, VectorBackend};
use crate::config::{sidecar_path, IndexConfig, QuantizationConfig};
use crate::error::{Result, VectorError};
use crate::index::{HnswIndex, HnswSnapshot};
use crate::quantization::{create_quantizer, QuantizedCode, Quantizer, QuantizerStats, TrainContext};
use crate::simd::Kernel;
use crate::types::{SearchOptions, SearchResult, SearchStrategy, VectorRecord};

/// Bumped whenever [`NativeSnapshot`] changes shape.
const SNAPSHOT_FORMAT: u32 = 1;

/// Training uses at most this many vectors.
pub const MAX_TRAINING_SAMPLE: usize = 50_000;

#[derive(Serialize, Deserialize)]
struct NativeSnapshot {
    format: u32,
    graph: HnswSnapshot,
}

#[derive(Debug)]
pub struct NativeBackend {
    kernel: Kernel,
    core: Option<IndexCore>,
    /// Swapped whole on retrain; readers see either the old or the new codebook.
    quantizer: Option<Arc<dyn Quantizer>>,
    codes: HashMap<String, QuantizedCode>,
}

impl NativeBackend {
    pub fn new(kernel: Kernel) -> Self {
        Self {
            kernel,
            core: None,
            quantizer: None,
            codes: HashMap::new(),
        }
    }

    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    fn core(&self) -> Result<&IndexCore> {
        self.core.as_ref().ok_or(VectorError::NotInitialized)
    }

    fn core_mut(&mut self) -> Result<&mut IndexCore> {
        self.core.as_mut().ok_or(VectorError::NotInitialized)
    }

    fn encode(&self, embedding: &[f32]) -> Result<Option<QuantizedCode>> {
        match &self.quantizer {
            Some(q) => Ok(Some(q.encode(embedding)?)),
            None => Ok(None),
        }
    }

    /// Scan every code, keep the best `k * rerank`, then re-rank exactly.
    fn quantized_scan(
        &self,
        core: &IndexCore,
        quantizer: &dyn Quantizer,
        query: &[f32],
        k: usize,
        rerank: usize,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let ids: Vec<&String> = self.codes.keys().collect();
        let codes: Vec<&QuantizedCode> = ids.iter().map(|id| &self.codes[*id]).collect();
        let approx = quantizer.scan(query, &codes)?;

        let mut ranked: Vec<(&String, f32)> = ids.into_iter().zip(approx).collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(core.fetch_size(k, options).saturating_mul(rerank.max(1)));

        let mut exact: Vec<(String, f32)> = ranked
            .into_iter()
            .filter_map(|(id, _)| core.index.distance_to(query, id).map(|d| (id.clone(), d)))
            .collect();
        exact.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(core.finish(exact, k, options))
    }
}

impl VectorBackend for NativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn initialize(&mut self, config: &IndexConfig) -> Result<()> {
        self.core = Some(IndexCore::new(config, self.kernel)?);
        self.quantizer = None;
        self.codes.clear();
        info!(
            dimension = config.dimension,
            metric = %config.metric,
            kernel = self.kernel.name(),
            "native backend initialized"
        );
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.core.is_some()
    }

    fn insert(&mut self, record: VectorRecord) -> Result<()> {
        self.core()?.check_dimension(&record.embedding, Some(&record.id))?;
        let code = self.encode(&record.embedding)?;
        let id = record.id.clone();
        self.core_mut()?.insert(record)?;
        if let Some(code) = code {
            self.codes.insert(id, code);
        }
        Ok(())
    }

    fn insert_batch(&mut self, records: Vec<VectorRecord>) -> Result<()> {
        self.core()?.check_batch(&records)?;
        let codes = records
            .iter()
            .map(|r| self.encode(&r.embedding))
            .collect::<Result<Vec<_>>>()?;
        let core = self.core_mut()?;
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            ids.push(record.id.clone());
            core.insert(record)?;
        }
        for (id, code) in ids.into_iter().zip(codes) {
            if let Some(code) = code {
                self.codes.insert(id, code);
            }
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        let core = self.core()?;
        core.check_dimension(query, None)?;
        match (options.strategy, &self.quantizer) {
            (SearchStrategy::QuantizedScan { rerank }, Some(q)) if q.is_trained() => {
                self.quantized_scan(core, q.as_ref(), query, k, rerank, options)
            }
            _ => core.search(query, k, options),
        }
    }

    fn remove(&mut self, id: &str) -> Result<bool> {
        let removed = self.core_mut()?.remove(id);
        self.codes.remove(id);
        Ok(removed)
    }

    fn get_vector(&self, id: &str) -> Result<Option<VectorRecord>> {
        Ok(self.core()?.get_vector(id))
    }

    fn stats(&self) -> Result<BackendStats> {
        let mut stats = self.core()?.stats(BackendKind::Native);
        stats.memory_usage += self.codes.values().map(QuantizedCode::byte_len).sum::<usize>();
        Ok(stats)
    }

    fn save(&self, path: &Path) -> Result<()> {
        let core = self.core()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let snapshot = NativeSnapshot {
            format: SNAPSHOT_FORMAT,
            graph: core.index.snapshot(),
        };
        let tmp = sidecar_path(path, "tmp");
        std::fs::write(&tmp, bincode::serialize(&snapshot)?)?;
        std::fs::rename(&tmp, path)?;
        core.metadata.save(path)?;
        info!(path = %path.display(), count = core.index.len(), "native index saved");
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let bytes = std::fs::read(path)?;
        let snapshot: NativeSnapshot = bincode::deserialize(&bytes)?;
        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(VectorError::InvalidInput(format!(
                "unsupported snapshot format {} (expected {SNAPSHOT_FORMAT})",
                snapshot.format
            )));
        }
        let core = IndexCore {
            index: HnswIndex::restore(snapshot.graph, self.kernel)?,
            metadata: MetadataStore::load(path)?,
        };
        core.check_loaded_shape(self.core.as_ref().map(|c| c.index.config()))?;
        info!(path = %path.display(), count = core.index.len(), "native index loaded");
        self.core = Some(core);
        // Codes belong to the previous contents.
        self.quantizer = None;
        self.codes.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.core = None;
        self.quantizer = None;
        self.codes.clear();
        Ok(())
    }

    fn train_quantizer(&mut self, config: &QuantizationConfig, ctx: &TrainContext) -> TrainOutcome {
        let Some(core) = self.core.as_ref() else {
            return TrainOutcome::Skipped("backend not initialized".into());
        };
        let mut fresh = match create_quantizer(config, core.dimension()) {
            Ok(Some(q)) => q,
            Ok(None) => return TrainOutcome::Skipped("quantization disabled".into()),
            Err(e) => {
                warn!(error = %e, "could not build quantizer");
                return TrainOutcome::Skipped(e.to_string());
            }
        };

        let sample: Vec<Vec<f32>> = core
            .index
            .iter()
            .take(MAX_TRAINING_SAMPLE)
            .map(|(_, v)| v.to_vec())
            .collect();
        if let Err(e) = fresh.train(&sample, ctx) {
            warn!(error = %e, strategy = %config.strategy, "quantizer training skipped");
            return TrainOutcome::Skipped(e.to_string());
        }

        let mut codes = HashMap::with_capacity(core.index.len());
        for (id, v) in core.index.iter() {
            match fresh.encode(v) {
                Ok(code) => {
                    codes.insert(id.to_string(), code);
                }
                Err(e) => {
                    warn!(error = %e, id, "re-encoding failed, keeping previous quantizer");
                    return TrainOutcome::Skipped(e.to_string());
                }
            }
        }

        let stats = fresh.stats();
        self.quantizer = Some(Arc::from(fresh));
        self.codes = codes;
        info!(
            strategy = %stats.strategy,
            samples = stats.training_samples,
            compression = stats.compression_ratio,
            "quantizer trained"
        );
        TrainOutcome::Trained(stats)
    }

    fn quantizer_stats(&self) -> Option<QuantizerStats> {
        self.quantizer.as_ref().map(|q| q.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantization::QuantizationStrategy;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn unit(rng: &mut StdRng, dim: usize) -> Vec<f32> {
        let v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
        crate::simd::normalized(&v)
    }

    fn filled(n: usize, dim: usize) -> NativeBackend {
        let mut rng = StdRng::seed_from_u64(11);
        let mut b = NativeBackend::new(Kernel::scalar());
        b.initialize(&IndexConfig::with_dimension(dim)).unwrap();
        let records = (0..n).map(|i| VectorRecord::new(format!("v{i}"), unit(&mut rng, dim))).collect();
        b.insert_batch(records).unwrap();
        b
    }

    #[test]
    fn operations_fail_before_initialize_and_after_close() {
        let mut b = NativeBackend::new(Kernel::scalar());
        assert!(matches!(b.stats(), Err(VectorError::NotInitialized)));
        assert!(matches!(
            b.insert(VectorRecord::new("a", vec![0.0; 4])),
            Err(VectorError::NotInitialized)
        ));
        b.initialize(&IndexConfig::with_dimension(4)).unwrap();
        b.close().unwrap();
        assert!(matches!(
            b.search(&[0.0; 4], 1, &SearchOptions::default()),
            Err(VectorError::NotInitialized)
        ));
    }

    #[test]
    fn quantized_scan_finds_exact_match() {
        let mut b = filled(200, 16);
        let config = QuantizationConfig {
            strategy: QuantizationStrategy::Binary,
            ..QuantizationConfig::default()
        };
        let outcome = b.train_quantizer(&config, &TrainContext::new());
        assert!(matches!(outcome, TrainOutcome::Trained(_)));

        let query = b.get_vector("v42").unwrap().unwrap().embedding;
        let opts = SearchOptions::default().with_strategy(SearchStrategy::QuantizedScan { rerank: 10 });
        let hits = b.search(&query, 3, &opts).unwrap();
        assert_eq!(hits[0].id, "v42");
        assert!(hits[0].distance.abs() < 1e-5);
    }

    #[test]
    fn failed_training_keeps_previous_quantizer() {
        let mut b = filled(8, 16);
        let scalar = QuantizationConfig {
            strategy: QuantizationStrategy::Scalar,
            ..QuantizationConfig::default()
        };
        assert!(matches!(
            b.train_quantizer(&scalar, &TrainContext::new()),
            TrainOutcome::Trained(_)
        ));

        let product = QuantizationConfig {
            strategy: QuantizationStrategy::Product,
            subspaces: 4,
            centroids: 256,
            ..QuantizationConfig::default()
        };
        let outcome = b.train_quantizer(&product, &TrainContext::new());
        assert!(matches!(outcome, TrainOutcome::Skipped(_)));
        assert_eq!(b.quantizer_stats().unwrap().strategy, "scalar8");
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        let b = filled(50, 8);
        b.save(&path).unwrap();

        let mut loaded = NativeBackend::new(Kernel::scalar());
        loaded.load(&path).unwrap();
        assert_eq!(loaded.stats().unwrap().count, 50);
        let q = b.get_vector("v3").unwrap().unwrap().embedding;
        let opts = SearchOptions::default();
        assert_eq!(b.search(&q, 5, &opts).unwrap(), loaded.search(&q, 5, &opts).unwrap());
    }

    #[test]
    fn load_rejects_other_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        filled(5, 8).save(&path).unwrap();

        let mut b = NativeBackend::new(Kernel::scalar());
        b.initialize(&IndexConfig::with_dimension(16)).unwrap();
        assert!(matches!(
            b.load(&path),
            Err(VectorError::DimensionMismatch { expected: 16, actual: 8, .. })
        ));
        assert_eq!(b.stats().unwrap().dimension, 16);
    }
}
